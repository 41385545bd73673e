//! Per-attempt outcome classification.
//!
//! Every attempt ends in exactly one [`AttemptOutcome`]. The functions here
//! are pure over a fully buffered [`Response`] or a transport error, so the
//! classification table is testable without network I/O.

use std::collections::BTreeSet;

use reqwest::{header::HeaderMap, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{error::TransportKind, HttpError, Result};

/// Characters of a response body kept in error messages.
const SNIPPET_CHARS: usize = 100;

/// Buffered HTTP response, returned as-is when JSON decoding is disabled.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode, url: Url, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            url,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| self.decode_error(&err))
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    fn snippet(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .chars()
            .take(SNIPPET_CHARS)
            .collect()
    }

    fn decode_error(&self, err: &serde_json::Error) -> HttpError {
        HttpError::Decode {
            status: Some(self.status.as_u16()),
            message: err.to_string(),
            snippet: self.snippet(),
        }
    }
}

/// Successful result of a request.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Decoded JSON body.
    Json(Value),
    /// Undecoded response, requested with `decode_json = false`.
    Raw(Response),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Response> {
        match self {
            Self::Raw(response) => Some(response),
            Self::Json(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<Response> {
        match self {
            Self::Raw(response) => Some(response),
            Self::Json(_) => None,
        }
    }

    /// Deserializes the payload into `T`, whichever form it is in.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value).map_err(|err| HttpError::Decode {
                status: None,
                message: err.to_string(),
                snippet: String::new(),
            }),
            Self::Raw(response) => response.json(),
        }
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Payload),
    /// Transient failure, eligible for another attempt.
    Retryable {
        error: HttpError,
        status: Option<u16>,
    },
    /// Failure that must propagate without retry.
    Fatal(HttpError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Classifies a completed HTTP exchange.
///
/// Statuses in `retryable_status_codes` are retryable; any other status
/// `>= 400` is fatal. Below 400 the body is decoded when `decode_json` is
/// set, and a malformed body is fatal regardless of status.
pub fn classify_response(
    response: Response,
    decode_json: bool,
    retryable_status_codes: &BTreeSet<u16>,
) -> AttemptOutcome {
    let status = response.status.as_u16();

    if retryable_status_codes.contains(&status) {
        return AttemptOutcome::Retryable {
            error: status_error(&response),
            status: Some(status),
        };
    }
    if response.status.is_client_error() || response.status.is_server_error() {
        return AttemptOutcome::Fatal(status_error(&response));
    }

    if !decode_json {
        return AttemptOutcome::Success(Payload::Raw(response));
    }
    match serde_json::from_slice::<Value>(&response.body) {
        Ok(value) => AttemptOutcome::Success(Payload::Json(value)),
        Err(err) => AttemptOutcome::Fatal(response.decode_error(&err)),
    }
}

/// Classifies a `reqwest` error raised before a response was available.
///
/// Connect, timeout, send, and body-read failures are retryable; builder and
/// redirect failures are fatal.
pub fn classify_transport(err: reqwest::Error) -> AttemptOutcome {
    match transport_kind(&err) {
        Some(kind) => AttemptOutcome::Retryable {
            error: HttpError::Transport { kind, source: err },
            status: None,
        },
        None => AttemptOutcome::Fatal(HttpError::Unexpected(err.to_string())),
    }
}

fn transport_kind(err: &reqwest::Error) -> Option<TransportKind> {
    if err.is_timeout() {
        Some(TransportKind::Timeout)
    } else if err.is_connect() {
        Some(TransportKind::Connect)
    } else if err.is_body() || err.is_decode() {
        Some(TransportKind::Body)
    } else if err.is_request() {
        Some(TransportKind::Request)
    } else {
        None
    }
}

fn status_error(response: &Response) -> HttpError {
    HttpError::Status {
        status: response.status.as_u16(),
        url: response.url.to_string(),
        body: response.snippet(),
    }
}
