//! `http-handler` is a resilient HTTP request layer on top of `reqwest`.
//!
//! Requests are described relative to a base URL, classified per attempt,
//! and retried with jittered exponential backoff:
//! - [`AsyncHttpHandler`] suspends on the transport and on backoff waits
//! - [`BlockingHttpHandler`] blocks the calling thread
//!
//! Both run batches concurrently with index-aligned, per-item outcomes
//! ([`AsyncHttpHandler::execute_batch`], [`BlockingHttpHandler::execute_batch`]).

// Forwards to `tracing` when the feature is enabled; otherwise the
// arguments are only type-checked.
macro_rules! log_event {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "tracing")]
        tracing::$level!($($arg)+);
        #[cfg(not(feature = "tracing"))]
        {
            let _ = format_args!($($arg)+);
        }
    }};
}

mod batch;
mod blocking;
mod classify;
mod error;
mod executor;
mod handler;
mod options;
mod pool;
mod prepare;
mod request;
mod retry;

pub use batch::{BatchItem, BatchRequest, BatchResult, DEFAULT_MAX_CONCURRENCY};
pub use blocking::BlockingHttpHandler;
pub use classify::{classify_response, classify_transport, AttemptOutcome, Payload, Response};
pub use error::{HttpError, TransportKind};
pub use handler::AsyncHttpHandler;
pub use options::{HandlerConfig, DEFAULT_RETRYABLE_STATUS_CODES};
pub use prepare::WireRequest;
pub use request::{Method, RequestDescriptor, RequestOptions, WireHook};
pub use retry::{RetryPolicy, RetryState};

pub type Result<T> = std::result::Result<T, HttpError>;
