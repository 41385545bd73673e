//! Blocking flavor of the handler.
//!
//! Attempts block the calling thread and backoff uses `std::thread::sleep`.
//! Batches run on a bounded pool of OS threads sharing one pooled
//! `reqwest::blocking::Client`.
//!
//! Like `reqwest::blocking`, this handler must not be created, used, or
//! dropped from within an async runtime; use [`crate::AsyncHttpHandler`]
//! there.

use std::fmt;

use serde::Serialize;

use crate::{
    batch::{check_concurrency, run_worker_pool, DEFAULT_MAX_CONCURRENCY},
    executor::Executor,
    pool::ConnectionPool,
    BatchRequest, BatchResult, HandlerConfig, HttpError, Payload, RequestDescriptor, Result,
};

/// Blocking HTTP handler with retry, backoff, and worker-pool batches.
pub struct BlockingHttpHandler {
    executor: Executor,
    pool: ConnectionPool<reqwest::blocking::Client>,
}

impl fmt::Debug for BlockingHttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingHttpHandler")
            .field("base_url", &self.executor.base_url().as_str())
            .field("config", self.executor.config())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl BlockingHttpHandler {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_config(HandlerConfig::new(base_url))
    }

    pub fn with_config(config: HandlerConfig) -> Result<Self> {
        let executor = Executor::new(config)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(executor.config().request_timeout)
            .build()
            .map_err(|err| HttpError::Config(format!("could not build http client: {err}")))?;
        Ok(Self {
            executor,
            pool: ConnectionPool::new(client),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::with_config(HandlerConfig::from_env()?)
    }

    pub fn config(&self) -> &HandlerConfig {
        self.executor.config()
    }

    pub fn execute(&self, descriptor: RequestDescriptor) -> Result<Payload> {
        let client = self.pool.acquire()?;
        self.executor.execute_blocking(&client, &descriptor)
    }

    pub fn get(&self, path: &str) -> Result<Payload> {
        self.execute(RequestDescriptor::get(path))
    }

    pub fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Payload> {
        self.execute(RequestDescriptor::post(path).json(body)?)
    }

    pub fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Payload> {
        self.execute(RequestDescriptor::put(path).json(body)?)
    }

    pub fn delete(&self, path: &str) -> Result<Payload> {
        self.execute(RequestDescriptor::delete(path))
    }

    /// Runs the batch on [`DEFAULT_MAX_CONCURRENCY`] worker threads.
    ///
    /// Loose items without `decode_json` are decoded as JSON.
    pub fn execute_batch<I>(&self, items: I) -> BatchResult
    where
        I: IntoIterator,
        I::Item: Into<BatchRequest>,
    {
        let items: Vec<BatchRequest> = items.into_iter().map(Into::into).collect();
        self.run_batch(items, DEFAULT_MAX_CONCURRENCY, true)
    }

    /// Like [`execute_batch`](Self::execute_batch), but loose items without
    /// `decode_json` return the raw response.
    pub fn execute_batch_raw<I>(&self, items: I) -> BatchResult
    where
        I: IntoIterator,
        I::Item: Into<BatchRequest>,
    {
        let items: Vec<BatchRequest> = items.into_iter().map(Into::into).collect();
        self.run_batch(items, DEFAULT_MAX_CONCURRENCY, false)
    }

    /// Runs the batch on at most `max_concurrency` worker threads.
    ///
    /// With `max_concurrency == 1` requests run strictly one after another.
    /// Fails with [`HttpError::Config`] only when `max_concurrency` is zero.
    pub fn execute_batch_with_concurrency<I>(
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
        Ok(self.run_batch(items, max_concurrency, true))
    }

    fn run_batch(
        &self,
        items: Vec<BatchRequest>,
        max_concurrency: usize,
        default_decode: bool,
    ) -> BatchResult {
        log_event!(
            info,
            "starting {} parallel requests on {} workers",
            items.len(),
            max_concurrency.min(items.len())
        );
        let results = run_worker_pool(items, max_concurrency, |index, item| {
            let outcome = item
                .into_descriptor(default_decode)
                .and_then(|descriptor| self.execute(descriptor));
            if let Err(err) = &outcome {
                log_event!(error, "parallel request {} failed: {}", index, err);
            }
            outcome
        });
        log_event!(info, "finished {} parallel requests", results.len());
        results
    }

    /// Releases the connection pool. Idempotent.
    pub fn close(&self) {
        if self.pool.close() {
            log_event!(info, "synchronous HTTP client closed");
        } else {
            log_event!(debug, "synchronous HTTP client already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl Drop for BlockingHttpHandler {
    fn drop(&mut self) {
        self.close();
    }
}
