//! Translation of a [`RequestDescriptor`] into a wire-level request.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Url,
};

use crate::{HttpError, RequestDescriptor, Result};

/// Fully resolved request, ready to hand to either transport.
#[derive(Clone, Debug)]
pub struct WireRequest {
    pub method: reqwest::Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl WireRequest {
    /// Resolves `descriptor` against `base_url` and merges its query,
    /// headers, and body.
    ///
    /// `base_url` must end with `/` (see `HandlerConfig::validate`).
    pub fn build(
        base_url: &Url,
        descriptor: &RequestDescriptor,
        default_timeout: Duration,
    ) -> Result<Self> {
        descriptor.validate()?;

        let relative = descriptor.path().trim().trim_start_matches('/');
        let mut url = base_url.join(relative).map_err(|err| {
            HttpError::Validation(format!("invalid path '{}': {err}", descriptor.path()))
        })?;
        if url.origin() != base_url.origin() {
            return Err(HttpError::Validation(format!(
                "path '{}' escapes the base url",
                descriptor.path()
            )));
        }
        if !descriptor.query_params().is_empty() {
            url.query_pairs_mut()
                .extend_pairs(descriptor.query_params().iter());
        }

        let mut headers = HeaderMap::new();
        for (name, value) in descriptor.headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                HttpError::Validation(format!("invalid header name '{name}': {err}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                HttpError::Validation(format!("invalid value for header '{name}': {err}"))
            })?;
            headers.insert(name, value);
        }

        let body = match descriptor.body_value() {
            Some(value) => {
                let bytes = serde_json::to_vec(value).map_err(|err| {
                    HttpError::Validation(format!("request body is not valid JSON: {err}"))
                })?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(bytes)
            }
            None => None,
        };

        let options = descriptor.options();
        let mut wire = Self {
            method: descriptor.method().into(),
            url,
            headers,
            body,
            timeout: options.timeout.unwrap_or(default_timeout),
        };
        if let Some(hook) = &options.hook {
            hook(&mut wire);
        }
        Ok(wire)
    }

    pub(crate) fn into_async(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method, self.url)
            .headers(self.headers)
            .timeout(self.timeout);
        match self.body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }

    pub(crate) fn into_blocking(
        self,
        client: &reqwest::blocking::Client,
    ) -> reqwest::blocking::RequestBuilder {
        let builder = client
            .request(self.method, self.url)
            .headers(self.headers)
            .timeout(self.timeout);
        match self.body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}
