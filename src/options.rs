use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Url;

use crate::{HttpError, Result};

/// Status codes retried when no explicit set is configured.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Configures the base endpoint, timeout, and retry behavior of a handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandlerConfig {
    /// Absolute endpoint every request path is resolved against.
    pub base_url: String,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff base for the first retry.
    pub min_retry_delay: Duration,
    /// Upper bound for any single backoff delay.
    pub max_retry_delay: Duration,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// HTTP statuses treated as transient.
    pub retryable_status_codes: BTreeSet<u16>,
}

impl HandlerConfig {
    /// Creates a configuration with default retry settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_retries: 3,
            min_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, min: Duration, max: Duration) -> Self {
        self.min_retry_delay = min;
        self.max_retry_delay = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retryable_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Reads a configuration from environment variables.
    ///
    /// Reads:
    /// - `HTTP_HANDLER_BASE_URL` — required base endpoint
    /// - `HTTP_HANDLER_MAX_RETRIES`
    /// - `HTTP_HANDLER_MIN_RETRY_DELAY_MS` / `HTTP_HANDLER_MAX_RETRY_DELAY_MS`
    /// - `HTTP_HANDLER_TIMEOUT_MS`
    /// - `HTTP_HANDLER_RETRYABLE_STATUS` — comma-separated status codes
    ///
    /// Unset optional variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("HTTP_HANDLER_BASE_URL").ok_or_else(|| {
            HttpError::Config("missing HTTP_HANDLER_BASE_URL environment variable".to_owned())
        })?;
        if base_url.trim().is_empty() {
            return Err(HttpError::Config(
                "HTTP_HANDLER_BASE_URL is set but empty".to_owned(),
            ));
        }

        let mut config = Self::new(base_url.trim());
        if let Some(value) = lookup("HTTP_HANDLER_MAX_RETRIES") {
            config.max_retries = parse_number("HTTP_HANDLER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("HTTP_HANDLER_MIN_RETRY_DELAY_MS") {
            config.min_retry_delay =
                Duration::from_millis(parse_number("HTTP_HANDLER_MIN_RETRY_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("HTTP_HANDLER_MAX_RETRY_DELAY_MS") {
            config.max_retry_delay =
                Duration::from_millis(parse_number("HTTP_HANDLER_MAX_RETRY_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("HTTP_HANDLER_TIMEOUT_MS") {
            config.request_timeout =
                Duration::from_millis(parse_number("HTTP_HANDLER_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("HTTP_HANDLER_RETRYABLE_STATUS") {
            config.retryable_status_codes = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| parse_number("HTTP_HANDLER_RETRYABLE_STATUS", code))
                .collect::<Result<BTreeSet<u16>>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants and returns the parsed base URL.
    ///
    /// The returned URL always ends with a single `/` so relative paths
    /// append to it instead of replacing its last segment.
    pub fn validate(&self) -> Result<Url> {
        let base_url = normalize_base_url(&self.base_url)?;

        if self.min_retry_delay > self.max_retry_delay {
            return Err(HttpError::Config(format!(
                "min_retry_delay ({:?}) exceeds max_retry_delay ({:?})",
                self.min_retry_delay, self.max_retry_delay
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(HttpError::Config(
                "request_timeout must be greater than zero".to_owned(),
            ));
        }
        if let Some(code) = self
            .retryable_status_codes
            .iter()
            .find(|code| !(400..=599).contains(*code))
        {
            return Err(HttpError::Config(format!(
                "retryable status code {code} is not an HTTP error status"
            )));
        }

        Ok(base_url)
    }

    /// Whether a single attempt failing with `error` would be retried under
    /// this configuration.
    pub fn is_retryable(&self, error: &HttpError) -> bool {
        error.is_retryable_with(&self.retryable_status_codes)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| HttpError::Config(format!("{key} has invalid value '{value}'")))
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let mut url = Url::parse(trimmed)
        .map_err(|err| HttpError::Config(format!("invalid base url '{raw}': {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpError::Config(format!(
            "base url '{raw}' must use http or https"
        )));
    }
    if url.cannot_be_a_base() {
        return Err(HttpError::Config(format!("base url '{raw}' cannot be a base")));
    }
    let path = format!("{}/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}
