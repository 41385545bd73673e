//! Attempt/retry loop for a single logical request.
//!
//! The decision logic lives in [`Executor::step`] and is shared by both
//! execution modes; `execute_async` and `execute_blocking` only differ in
//! how they send and how they wait.

use std::time::Duration;

use reqwest::Url;

use crate::{
    classify::{classify_response, classify_transport},
    prepare::WireRequest,
    retry::{RetryPolicy, RetryState},
    AttemptOutcome, HandlerConfig, HttpError, Payload, RequestDescriptor, Response, Result,
};

/// What to do after classifying an attempt.
#[derive(Debug)]
pub(crate) enum Step {
    /// The request is resolved.
    Done(Result<Payload>),
    /// Wait, then attempt again.
    Retry(Duration),
}

/// Immutable per-handler request context.
#[derive(Debug)]
pub(crate) struct Executor {
    base_url: Url,
    config: HandlerConfig,
    policy: RetryPolicy,
}

impl Executor {
    pub(crate) fn new(config: HandlerConfig) -> Result<Self> {
        let base_url = config.validate()?;
        Ok(Self {
            base_url,
            policy: RetryPolicy::from_config(&config),
            config,
        })
    }

    pub(crate) fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn prepare(&self, descriptor: &RequestDescriptor) -> Result<WireRequest> {
        WireRequest::build(&self.base_url, descriptor, self.config.request_timeout)
    }

    pub(crate) async fn execute_async(
        &self,
        client: &reqwest::Client,
        descriptor: &RequestDescriptor,
    ) -> Result<Payload> {
        let wire = self.prepare(descriptor)?;
        let decode_json = descriptor.options().decode_json;
        let mut state = RetryState::new();

        loop {
            let outcome = self.attempt_async(client, wire.clone(), decode_json).await;
            match self.step(&mut state, &wire, outcome) {
                Step::Done(result) => return result,
                Step::Retry(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    pub(crate) fn execute_blocking(
        &self,
        client: &reqwest::blocking::Client,
        descriptor: &RequestDescriptor,
    ) -> Result<Payload> {
        let wire = self.prepare(descriptor)?;
        let decode_json = descriptor.options().decode_json;
        let mut state = RetryState::new();

        loop {
            let outcome = self.attempt_blocking(client, wire.clone(), decode_json);
            match self.step(&mut state, &wire, outcome) {
                Step::Done(result) => return result,
                Step::Retry(delay) => std::thread::sleep(delay),
            }
        }
    }

    async fn attempt_async(
        &self,
        client: &reqwest::Client,
        wire: WireRequest,
        decode_json: bool,
    ) -> AttemptOutcome {
        let response = match wire.into_async(client).send().await {
            Ok(response) => response,
            Err(err) => return classify_transport(err),
        };
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(body) => classify_response(
                Response::new(status, url, headers, body.to_vec()),
                decode_json,
                &self.config.retryable_status_codes,
            ),
            Err(err) => classify_transport(err),
        }
    }

    fn attempt_blocking(
        &self,
        client: &reqwest::blocking::Client,
        wire: WireRequest,
        decode_json: bool,
    ) -> AttemptOutcome {
        let response = match wire.into_blocking(client).send() {
            Ok(response) => response,
            Err(err) => return classify_transport(err),
        };
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        match response.bytes() {
            Ok(body) => classify_response(
                Response::new(status, url, headers, body.to_vec()),
                decode_json,
                &self.config.retryable_status_codes,
            ),
            Err(err) => classify_transport(err),
        }
    }

    /// Turns a classified attempt into the next action and updates `state`.
    pub(crate) fn step(
        &self,
        state: &mut RetryState,
        wire: &WireRequest,
        outcome: AttemptOutcome,
    ) -> Step {
        let delay = self.policy.delay(state.attempt_count(), &outcome);
        match outcome {
            AttemptOutcome::Success(payload) => Step::Done(Ok(payload)),
            AttemptOutcome::Fatal(error) => {
                match &error {
                    HttpError::Decode {
                        message, snippet, ..
                    } => log_event!(
                        error,
                        "{} {}: JSON decoding failed: {}; body: {}",
                        wire.method,
                        wire.url,
                        message,
                        snippet
                    ),
                    _ => log_event!(
                        warn,
                        "{} {}: non-retryable error: {}",
                        wire.method,
                        wire.url,
                        error
                    ),
                }
                Step::Done(Err(error))
            }
            AttemptOutcome::Retryable { error, status } => match delay {
                Some(delay) => {
                    log_event!(
                        warn,
                        "{} {}: {} (status {}); retrying in {:.2}s ({}/{})",
                        wire.method,
                        wire.url,
                        error,
                        status.map_or_else(|| "N/A".to_owned(), |code| code.to_string()),
                        delay.as_secs_f64(),
                        state.attempt_count() + 1,
                        self.policy.max_retries
                    );
                    state.record_retry(error);
                    Step::Retry(delay)
                }
                None => {
                    let attempts = state.attempt_count() + 1;
                    log_event!(
                        error,
                        "{} {}: maximum retries ({}) exceeded; last status {:?}, last error: {}",
                        wire.method,
                        wire.url,
                        self.policy.max_retries,
                        status,
                        error
                    );
                    Step::Done(Err(HttpError::ExhaustedRetries {
                        attempts,
                        last: Box::new(error),
                    }))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::{header::HeaderMap, StatusCode, Url};
    use serde_json::json;

    use super::{Executor, Step};
    use crate::{
        classify::classify_response, prepare::WireRequest, retry::RetryState, AttemptOutcome,
        HandlerConfig, HttpError, Payload, RequestDescriptor, Response, Result,
    };

    fn executor(max_retries: u32) -> Executor {
        Executor::new(
            HandlerConfig::new("http://127.0.0.1:9")
                .with_max_retries(max_retries)
                .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5)),
        )
        .expect("config must be valid")
    }

    fn wire(executor: &Executor) -> WireRequest {
        WireRequest::build(
            executor.base_url(),
            &RequestDescriptor::get("/data"),
            Duration::from_secs(1),
        )
        .expect("request must build")
    }

    fn outcome(executor: &Executor, status: u16, body: &str) -> AttemptOutcome {
        classify_response(
            Response::new(
                StatusCode::from_u16(status).expect("status must be valid"),
                Url::parse("http://127.0.0.1:9/data").expect("url must parse"),
                HeaderMap::new(),
                body.as_bytes().to_vec(),
            ),
            true,
            &executor.config().retryable_status_codes,
        )
    }

    /// Feeds scripted statuses through the step machine; returns the result
    /// and how many attempts were consumed.
    fn drive(executor: &Executor, script: &[(u16, &str)]) -> (Result<Payload>, usize) {
        let wire = wire(executor);
        let mut state = RetryState::new();
        for (index, (status, body)) in script.iter().enumerate() {
            match executor.step(&mut state, &wire, outcome(executor, *status, body)) {
                Step::Done(result) => return (result, index + 1),
                Step::Retry(delay) => assert!(delay <= Duration::from_millis(5)),
            }
        }
        panic!("script ran out after {} attempts", script.len());
    }

    #[test]
    fn fatal_status_makes_one_attempt() {
        let (result, attempts) = drive(&executor(3), &[(404, "{}"), (200, "{}")]);
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(HttpError::Status { status: 404, .. })));
    }

    #[test]
    fn retryable_status_exhausts_after_max_retries_plus_one() {
        let script = [(503, ""); 10];
        let (result, attempts) = drive(&executor(3), &script);
        assert_eq!(attempts, 4);
        let err = result.expect_err("must exhaust");
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn succeeds_after_two_retries() {
        let (result, attempts) = drive(
            &executor(3),
            &[(503, ""), (429, ""), (200, r#"{"ok": true}"#)],
        );
        assert_eq!(attempts, 3);
        let payload = result.expect("third attempt must succeed");
        assert_eq!(payload.into_json(), Some(json!({"ok": true})));
    }

    #[test]
    fn decode_error_is_never_retried() {
        let (result, attempts) = drive(&executor(3), &[(200, "{broken"), (200, "{}")]);
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(HttpError::Decode { status: Some(200), .. })));
    }

    #[test]
    fn state_tracks_retries() {
        let executor = executor(2);
        let wire = wire(&executor);
        let mut state = RetryState::new();
        let step = executor.step(&mut state, &wire, outcome(&executor, 502, "bad gateway"));
        assert!(matches!(step, Step::Retry(_)));
        assert_eq!(state.attempt_count(), 1);
        assert_eq!(state.last_error().and_then(HttpError::status), Some(502));
    }

    #[test]
    fn zero_retries_exhausts_on_first_retryable_failure() {
        let (result, attempts) = drive(&executor(0), &[(500, ""), (200, "{}")]);
        assert_eq!(attempts, 1);
        let err = result.expect_err("must exhaust");
        assert_eq!(err.attempts(), 1);
        assert!(err.is_exhausted());
    }
}
