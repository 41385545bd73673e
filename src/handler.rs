use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::{future, stream, FutureExt, StreamExt};
use serde::Serialize;

use crate::{
    batch::{check_concurrency, panic_message},
    executor::Executor,
    pool::ConnectionPool,
    BatchRequest, BatchResult, HandlerConfig, HttpError, Payload, RequestDescriptor, Result,
};

/// Async HTTP handler with retry, backoff, and concurrent batches.
///
/// One pooled `reqwest::Client` backs every request made through the
/// handler. Call [`AsyncHttpHandler::close`] (or drop the handler) to
/// release it; requests after that fail with [`HttpError::Closed`].
pub struct AsyncHttpHandler {
    executor: Executor,
    pool: ConnectionPool<reqwest::Client>,
}

impl fmt::Debug for AsyncHttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncHttpHandler")
            .field("base_url", &self.executor.base_url().as_str())
            .field("config", self.executor.config())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl AsyncHttpHandler {
    /// Creates a handler for `base_url` with default retry settings.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(HandlerConfig::new(base_url))
    }

    /// Creates a handler from a full configuration.
    ///
    /// Fails with [`HttpError::Config`] when the configuration is invalid.
    pub fn with_config(config: HandlerConfig) -> Result<Self> {
        let executor = Executor::new(config)?;
        let client = reqwest::Client::builder()
            .timeout(executor.config().request_timeout)
            .build()
            .map_err(|err| HttpError::Config(format!("could not build http client: {err}")))?;
        Ok(Self {
            executor,
            pool: ConnectionPool::new(client),
        })
    }

    /// Creates a handler from `HTTP_HANDLER_*` environment variables.
    ///
    /// See [`HandlerConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        Self::with_config(HandlerConfig::from_env()?)
    }

    pub fn config(&self) -> &HandlerConfig {
        self.executor.config()
    }

    /// Runs one logical request through the attempt/retry loop.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        let client = self.pool.acquire()?;
        self.executor.execute_async(&client, &descriptor).await
    }

    pub async fn get(&self, path: &str) -> Result<Payload> {
        self.execute(RequestDescriptor::get(path)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Payload> {
        self.execute(RequestDescriptor::post(path).json(body)?).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Payload> {
        self.execute(RequestDescriptor::put(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<Payload> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    /// Runs every item concurrently and returns index-aligned outcomes.
    ///
    /// All requests are polled from the caller's task; nothing is spawned,
    /// so this can be awaited from inside any runtime. Item failures never
    /// fail the batch. Loose items without `decode_json` are decoded as JSON.
    pub async fn execute_batch<I>(&self, items: I) -> BatchResult
    where
        I: IntoIterator,
        I::Item: Into<BatchRequest>,
    {
        self.run_batch(items.into_iter().map(Into::into).collect(), true)
            .await
    }

    /// Like [`execute_batch`](Self::execute_batch), but loose items without
    /// `decode_json` return the raw response.
    pub async fn execute_batch_raw<I>(&self, items: I) -> BatchResult
    where
        I: IntoIterator,
        I::Item: Into<BatchRequest>,
    {
        self.run_batch(items.into_iter().map(Into::into).collect(), false)
            .await
    }

    /// Like [`execute_batch`](Self::execute_batch) with at most
    /// `max_concurrency` requests in flight.
    ///
    /// Fails with [`HttpError::Config`] only when `max_concurrency` is zero.
    pub async fn execute_batch_bounded<I>(
        &self,
        items: I,
        max_concurrency: usize,
    ) -> Result<BatchResult>
    where
        I: IntoIterator,
        I::Item: Into<BatchRequest>,
    {
        check_concurrency(max_concurrency)?;
        let items: Vec<BatchRequest> = items.into_iter().map(Into::into).collect();
        log_event!(
            info,
            "starting {} concurrent requests (limit {})",
            items.len(),
            max_concurrency
        );

        let results: BatchResult = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| self.execute_item(index, item, true))
            .buffered(max_concurrency)
            .collect()
            .await;

        log_event!(info, "finished {} concurrent requests", results.len());
        Ok(results)
    }

    async fn run_batch(&self, items: Vec<BatchRequest>, default_decode: bool) -> BatchResult {
        log_event!(info, "starting {} concurrent requests", items.len());

        let results = future::join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.execute_item(index, item, default_decode)),
        )
        .await;

        log_event!(info, "finished {} concurrent requests", results.len());
        results
    }

    async fn execute_item(
        &self,
        index: usize,
        item: BatchRequest,
        default_decode: bool,
    ) -> Result<Payload> {
        let outcome = match item.into_descriptor(default_decode) {
            Ok(descriptor) => AssertUnwindSafe(self.execute(descriptor))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HttpError::Unexpected(panic_message(&*panic)))),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            log_event!(error, "batch request {} failed: {}", index, err);
        }
        outcome
    }

    /// Releases the connection pool. Idempotent.
    pub async fn close(&self) {
        self.release();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn release(&self) {
        if self.pool.close() {
            log_event!(info, "asynchronous HTTP client closed");
        } else {
            log_event!(debug, "asynchronous HTTP client already closed");
        }
    }
}

impl Drop for AsyncHttpHandler {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::AsyncHttpHandler;
    use crate::HttpError;

    #[test]
    fn rejects_invalid_base_url() {
        let err = AsyncHttpHandler::new("not a url").expect_err("base url must be rejected");
        assert!(matches!(err, HttpError::Config(_)));
    }

    #[test]
    fn debug_shows_endpoint_and_state() {
        let handler = AsyncHttpHandler::new("http://127.0.0.1:8000/api").expect("handler");
        let debug = format!("{handler:?}");
        assert!(debug.contains("http://127.0.0.1:8000/api/"));
        assert!(debug.contains("closed: false"));
    }

    #[tokio::test]
    async fn close_twice_then_use_fails_explicitly() {
        let handler = AsyncHttpHandler::new("http://127.0.0.1:8000").expect("handler");
        handler.close().await;
        handler.close().await;
        assert!(handler.is_closed());

        let err = handler.get("/data").await.expect_err("closed handler must fail");
        assert!(matches!(err, HttpError::Closed));
    }

    #[tokio::test]
    async fn bounded_batch_rejects_zero_concurrency() {
        let handler = AsyncHttpHandler::new("http://127.0.0.1:8000").expect("handler");
        let err = handler
            .execute_batch_bounded(Vec::<crate::BatchRequest>::new(), 0)
            .await
            .expect_err("zero concurrency must be rejected");
        assert!(matches!(err, HttpError::Config(_)));
    }
}
