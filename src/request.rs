use std::{collections::BTreeMap, time::Duration};

use reqwest::Method;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

/// Immutable description of one logical HTTP call.
///
/// Interceptors receive a descriptor by value and hand back a new one;
/// builder methods consume `self` the same way.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) body: Option<JsonValue>,
    pub(crate) params: BTreeMap<String, JsonValue>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_attempts: Option<u32>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            params: BTreeMap::new(),
            timeout: None,
            retry_attempts: None,
            cancel: None,
        }
    }

    /// Sets a header, replacing any previous value with the same
    /// case-insensitive name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers
            .retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Adds a query parameter. Parameters are also part of the cache key.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON request body.
    pub fn body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-call timeout, overriding the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Per-call attempt budget, overriding the client default.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Attaches an external cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Applies per-call options on top of this descriptor.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        let RequestOptions {
            headers,
            params,
            timeout,
            retry_attempts,
            cancel,
        } = options;

        for (name, value) in headers {
            self = self.header(name, value);
        }
        self.params.extend(params);
        if timeout.is_some() {
            self.timeout = timeout;
        }
        if retry_attempts.is_some() {
            self.retry_attempts = retry_attempts;
        }
        if cancel.is_some() {
            self.cancel = cancel;
        }
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &BTreeMap<String, JsonValue> {
        &self.params
    }

    pub fn request_body(&self) -> Option<&JsonValue> {
        self.body.as_ref()
    }

    /// Key identifying logically equivalent requests: `METHOD:URL:JSON(params)`.
    pub fn cache_key(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_else(|_| "{}".to_owned());
        format!("{}:{}:{}", self.method, self.url, params)
    }

    /// Key under which concurrent identical calls share one transfer.
    ///
    /// Equal to [`cache_key`](Self::cache_key) for requests without a
    /// body; requests carrying a body append it so that two writes with
    /// different payloads never collapse into one.
    pub fn dedup_key(&self) -> String {
        let key = self.cache_key();
        match &self.body {
            Some(body) => format!("{key}:{body}"),
            None => key,
        }
    }

    /// Query pairs built from `params`; strings are sent unquoted, other
    /// values as JSON text.
    pub(crate) fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    JsonValue::String(text) => text.clone(),
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// Per-call overrides accepted by the convenience methods of
/// [`ApiClient`](crate::ApiClient).
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, JsonValue>,
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
