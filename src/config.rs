use std::{collections::BTreeMap, time::Duration};

use url::Url;

use crate::{rate_limit::RateLimit, ApiError, Result};

pub const DEFAULT_BASE_URL: &str = "/api";

/// Client-wide settings. A snapshot is taken when a call starts, so
/// [`ApiClient::update_config`](crate::ApiClient::update_config) only
/// affects calls issued afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Prefix joined in front of every relative request URL.
    pub base_url: String,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts per logical call, including the first one.
    pub retry_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub retry_delay: Duration,
    /// Maximum number of requests per URL within `rate_limit_window`.
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    /// Lifetime of cached GET responses.
    pub cache_ttl: Duration,
    /// Headers added to every request unless the request already sets them.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_millis(30_000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_millis(60_000),
            cache_ttl: Duration::from_secs(300),
            default_headers: BTreeMap::from([
                ("Content-Type".to_owned(), "application/json".to_owned()),
                ("Accept".to_owned(), "application/json".to_owned()),
            ]),
        }
    }
}

impl ClientConfig {
    /// Creates a default configuration pointing at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads configuration overrides from environment variables.
    ///
    /// Reads:
    /// - `SMARTGOALS_API_BASE_URL`
    /// - `SMARTGOALS_API_TIMEOUT_MS`
    /// - `SMARTGOALS_API_RETRY_ATTEMPTS`
    /// - `SMARTGOALS_API_RETRY_DELAY_MS`
    ///
    /// Unset variables keep their defaults. Variables that are set but
    /// empty or unparsable are rejected.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut config = Self::default();
        if let Some(base_url) = read_env("SMARTGOALS_API_BASE_URL")? {
            config.base_url = base_url;
        }
        if let Some(timeout) = read_env("SMARTGOALS_API_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(parse_env("SMARTGOALS_API_TIMEOUT_MS", &timeout)?);
        }
        if let Some(attempts) = read_env("SMARTGOALS_API_RETRY_ATTEMPTS")? {
            config.retry_attempts = parse_env("SMARTGOALS_API_RETRY_ATTEMPTS", &attempts)?;
        }
        if let Some(delay) = read_env("SMARTGOALS_API_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(parse_env("SMARTGOALS_API_RETRY_DELAY_MS", &delay)?);
        }
        Ok(config)
    }

    /// Applies a partial update in place.
    pub fn apply(&mut self, update: ConfigUpdate) {
        let ConfigUpdate {
            base_url,
            timeout,
            retry_attempts,
            retry_delay,
            rate_limit_requests,
            rate_limit_window,
            cache_ttl,
            default_headers,
        } = update;

        if let Some(base_url) = base_url {
            self.base_url = base_url;
        }
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        if let Some(retry_attempts) = retry_attempts {
            self.retry_attempts = retry_attempts;
        }
        if let Some(retry_delay) = retry_delay {
            self.retry_delay = retry_delay;
        }
        if let Some(rate_limit_requests) = rate_limit_requests {
            self.rate_limit_requests = rate_limit_requests;
        }
        if let Some(rate_limit_window) = rate_limit_window {
            self.rate_limit_window = rate_limit_window;
        }
        if let Some(cache_ttl) = cache_ttl {
            self.cache_ttl = cache_ttl;
        }
        if let Some(default_headers) = default_headers {
            self.default_headers = default_headers;
        }
    }

    pub(crate) fn rate_limit(&self) -> RateLimit {
        RateLimit {
            max_requests: self.rate_limit_requests,
            window: self.rate_limit_window,
        }
    }

    /// Joins `url` onto the base URL and appends `query` pairs.
    ///
    /// Absolute `http(s)` URLs bypass the base URL. The result must be an
    /// absolute URL with a host, since there is no document origin to
    /// resolve against. Query pairs land before any `#fragment`.
    pub(crate) fn resolve_url(&self, url: &str, query: &[(String, String)]) -> Result<String> {
        let mut resolved = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.join_base(url)?,
            Err(err) => {
                return Err(ApiError::InvalidRequest(format!("invalid URL '{url}': {err}")));
            }
        };
        validate_http_url(&resolved, url)?;

        if !query.is_empty() {
            resolved.query_pairs_mut().extend_pairs(query);
        }
        Ok(resolved.into())
    }

    fn join_base(&self, path: &str) -> Result<Url> {
        let mut base = Url::parse(&self.base_url).map_err(|err| {
            ApiError::InvalidRequest(format!(
                "base_url '{}' is not an absolute URL ({err}); configure an absolute base_url",
                self.base_url
            ))
        })?;
        validate_http_url(&base, &self.base_url)?;
        if base.query().is_some() || base.fragment().is_some() {
            return Err(ApiError::InvalidRequest(format!(
                "base_url '{}' must not carry a query or fragment",
                self.base_url
            )));
        }

        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(base);
        }
        if !base.path().ends_with('/') {
            let prefix = format!("{}/", base.path());
            base.set_path(&prefix);
        }
        base.join(relative)
            .map_err(|err| ApiError::InvalidRequest(format!("invalid URL '{path}': {err}")))
    }
}

fn validate_http_url(url: &Url, raw: &str) -> Result<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidRequest(format!(
            "'{raw}' must use the http or https scheme"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ApiError::InvalidRequest(format!("'{raw}' has no host")));
    }
    Ok(())
}

/// Partial configuration update; `None` fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub rate_limit_requests: Option<usize>,
    pub rate_limit_window: Option<Duration>,
    pub cache_ttl: Option<Duration>,
    pub default_headers: Option<BTreeMap<String, String>>,
}

fn read_env(name: &str) -> std::result::Result<Option<String>, String> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Err(format!("{name} is set but empty")),
        Ok(value) => Ok(Some(value.trim().to_owned())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(format!("{name} is not valid unicode")),
    }
}

fn parse_env<T>(name: &str, value: &str) -> std::result::Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| format!("invalid {name} '{value}': {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientConfig, ConfigUpdate};
    use crate::ApiError;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "/api");
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_millis(60_000));
    }

    #[test]
    fn apply_only_touches_provided_fields() {
        let mut config = ClientConfig::with_base_url("http://localhost:8080/api");
        config.apply(ConfigUpdate {
            timeout: Some(Duration::from_millis(100)),
            retry_attempts: Some(1),
            ..ConfigUpdate::default()
        });

        assert_eq!(config.base_url, "http://localhost:8080/api");
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.rate_limit_requests, 100);
    }

    #[test]
    fn resolve_url_joins_base_and_query() {
        let config = ClientConfig::with_base_url("http://localhost:8080/api/");
        let url = config
            .resolve_url("/goals", &pairs(&[("page", "2")]))
            .expect("must resolve");
        assert_eq!(url, "http://localhost:8080/api/goals?page=2");

        let config = ClientConfig::with_base_url("http://localhost:8080/api");
        let url = config.resolve_url("tasks", &[]).expect("must resolve");
        assert_eq!(url, "http://localhost:8080/api/tasks");
    }

    #[test]
    fn resolve_url_keeps_absolute_urls() {
        let config = ClientConfig::with_base_url("http://localhost:8080/api");
        let url = config
            .resolve_url("https://metrics.example.com/v1?x=1", &pairs(&[("y", "2")]))
            .expect("must resolve");
        assert_eq!(url, "https://metrics.example.com/v1?x=1&y=2");
    }

    #[test]
    fn resolve_url_rejects_relative_base() {
        let err = ClientConfig::default()
            .resolve_url("/goals", &[])
            .expect_err("relative base must fail");
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[test]
    fn resolve_url_places_query_before_fragment() {
        let config = ClientConfig::with_base_url("http://localhost:8080/api");
        let url = config
            .resolve_url("/goals#top", &pairs(&[("page", "2")]))
            .expect("must resolve");
        assert_eq!(url, "http://localhost:8080/api/goals?page=2#top");
    }

    #[test]
    fn resolve_url_rejects_hostless_and_non_http_urls() {
        for base in ["http://", "ftp://files.example.com/api"] {
            let err = ClientConfig::with_base_url(base)
                .resolve_url("/goals", &[])
                .expect_err("base must be rejected");
            assert!(matches!(err, ApiError::InvalidRequest(_)), "{base}: {err:?}");
        }

        let err = ClientConfig::with_base_url("http://localhost:8080/api")
            .resolve_url("mailto:team@example.com", &[])
            .expect_err("non-http absolute URL must fail");
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[test]
    fn resolve_url_encodes_query_pairs() {
        let config = ClientConfig::with_base_url("http://localhost:8080");
        let url = config
            .resolve_url("goals", &pairs(&[("q", "run 5k"), ("tag", "a&b")]))
            .expect("must resolve");
        assert_eq!(url, "http://localhost:8080/goals?q=run+5k&tag=a%26b");
    }
}
