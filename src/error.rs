use std::collections::BTreeSet;
use std::fmt;

use crate::DEFAULT_RETRYABLE_STATUS_CODES;

/// Transport-level failure category, derived from the `reqwest` error flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    /// The connection could not be established.
    Connect,
    /// The attempt exceeded its timeout.
    Timeout,
    /// The request failed while being sent.
    Request,
    /// The response body could not be read.
    Body,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Request => "request",
            Self::Body => "body",
        };
        f.write_str(name)
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Connect, read, or timeout failure from `reqwest`.
    #[error("transport error ({kind}): {source}")]
    Transport {
        kind: TransportKind,
        #[source]
        source: reqwest::Error,
    },
    /// Non-success HTTP status code with a snippet of the response body.
    #[error("http error {status} for {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    /// Response body is not valid JSON although JSON decoding was requested,
    /// or a decoded payload does not match the requested type.
    #[error("decode error: {message}; body: {snippet}")]
    Decode {
        /// Status of the response the body came from, when one is known.
        status: Option<u16>,
        message: String,
        /// First characters of the offending body.
        snippet: String,
    },
    /// Retry budget spent; wraps the last retryable failure.
    #[error("request failed after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: Box<HttpError> },
    /// Malformed request descriptor or batch item.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Invalid handler configuration or batch concurrency.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The handler was used after `close()`.
    #[error("handler is closed")]
    Closed,
    /// Failure that fits no other category.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl HttpError {
    /// HTTP status attached to this error, looking through exhausted retries.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Decode { status, .. } => *status,
            Self::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Number of transport attempts represented by this error.
    ///
    /// Fatal errors report a single attempt; validation and lifecycle errors
    /// report zero since nothing was sent.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ExhaustedRetries { attempts, .. } => *attempts,
            Self::Transport { .. } | Self::Status { .. } | Self::Decode { .. } => 1,
            Self::Unexpected(_) => 1,
            Self::Validation(_) | Self::Config(_) | Self::Closed => 0,
        }
    }

    /// Whether the retry budget was spent before giving up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ExhaustedRetries { .. })
    }

    /// Whether a single attempt failing with this error would be retried
    /// under the default retryable status set.
    ///
    /// Use [`HandlerConfig::is_retryable`](crate::HandlerConfig::is_retryable)
    /// for a handler with a custom set.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => DEFAULT_RETRYABLE_STATUS_CODES.contains(status),
            _ => self.is_retryable_transport(),
        }
    }

    /// Like [`is_retryable`](Self::is_retryable) against an explicit status set.
    pub fn is_retryable_with(&self, retryable_status_codes: &BTreeSet<u16>) -> bool {
        match self {
            Self::Status { status, .. } => retryable_status_codes.contains(status),
            _ => self.is_retryable_transport(),
        }
    }

    fn is_retryable_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Transport failure category, looking through exhausted retries.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            Self::ExhaustedRetries { last, .. } => last.transport_kind(),
            _ => None,
        }
    }

    /// The innermost error, unwrapping exhausted retries.
    pub fn last_cause(&self) -> &HttpError {
        match self {
            Self::ExhaustedRetries { last, .. } => last.last_cause(),
            other => other,
        }
    }
}
