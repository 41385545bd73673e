use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::{prepare::WireRequest, HttpError, Result};

/// HTTP method supported by the handlers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = HttpError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(HttpError::Validation(format!(
                "unsupported http method '{other}'"
            ))),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Closure applied to the fully built wire request right before it is sent.
///
/// This is the escape hatch for transport-specific tweaks, such as headers
/// or query pairs derived from the final URL.
pub type WireHook = Arc<dyn Fn(&mut WireRequest) + Send + Sync>;

/// Per-request options.
#[derive(Clone)]
pub struct RequestOptions {
    /// Decode the response body as JSON. When `false` the raw response is returned.
    pub decode_json: bool,
    /// Overrides the handler's per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Transport passthrough, applied last.
    pub hook: Option<WireHook>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            decode_json: true,
            timeout: None,
            hook: None,
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("decode_json", &self.decode_json)
            .field("timeout", &self.timeout)
            .field("hook", &self.hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RequestOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(HttpError::Validation(
                "request timeout must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Description of one logical HTTP call, relative to the handler's base URL.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<Value>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    options: RequestOptions,
}

impl RequestDescriptor {
    /// Creates a descriptor with no body, query, or headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Sets an already structured JSON body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serializes `body` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| HttpError::Validation(format!("request body is not valid JSON: {err}")))?;
        Ok(self.body(value))
    }

    /// Appends a query pair. Pairs are sent in insertion order.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Appends several query pairs.
    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the raw response instead of decoding JSON.
    pub fn raw(mut self) -> Self {
        self.options.decode_json = false;
        self
    }

    pub fn decode_json(mut self, decode: bool) -> Self {
        self.options.decode_json = decode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut WireRequest) + Send + Sync + 'static,
    {
        self.options.hook = Some(Arc::new(hook));
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body_value(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(HttpError::Validation(format!(
                "{} request requires a non-empty path",
                self.method
            )));
        }
        self.options.validate()
    }
}
