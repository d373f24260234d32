use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    auth::{self, AuthInjector, CredentialStore, MemoryCredentialStore, SessionGuard},
    cache::ResponseCache,
    dedup::Deduplicator,
    interceptor::{InterceptorChain, InterceptorHandle, RequestInterceptor, ResponseInterceptor},
    rate_limit::SlidingWindowLimiter,
    retry::with_retry,
    transfer::{self, CancelHandle},
    ApiError, ApiResponse, ClientConfig, ConfigUpdate, Payload, RequestDescriptor, RequestOptions,
    Result,
};

/// Counters describing the client's shared state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub cache_size: usize,
    pub pending_requests: usize,
    pub rate_limit_trackers: usize,
}

struct Inner {
    transfers: Transfers,
    config: Arc<RwLock<ClientConfig>>,
    credentials: Arc<dyn CredentialStore>,
    interceptors: Arc<InterceptorChain>,
    limiter: SlidingWindowLimiter,
    dedup: Deduplicator,
}

/// State reachable from an in-flight transfer. It must not own `Inner`,
/// since the dedup registry inside `Inner` owns the transfer.
#[derive(Clone)]
struct Transfers {
    http: reqwest::Client,
    cache: Arc<ResponseCache>,
    online: Arc<AtomicBool>,
}

/// HTTP client for the goals API.
///
/// Every call runs the same pipeline: request interceptors, rate-limit
/// check, cache lookup (GET only), in-flight deduplication, retried
/// transfer, cache store (GET only), response interceptors. Clones share
/// the cache, the in-flight registry, the rate-limit windows and the
/// interceptors.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config())
            .field("stats", &self.get_stats())
            .field("credentials", &"<redacted>")
            .finish()
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl ApiClient {
    /// Creates a client with an in-memory credential store.
    pub fn new(config: ClientConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Creates a client from `SMARTGOALS_API_*` environment variables.
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_env() -> std::result::Result<Self, String> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Runs `request` through the full pipeline and decodes the payload into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<ApiResponse<T>> {
        self.request_raw(request).await?.decode()
    }

    /// Runs `request` through the full pipeline, leaving the payload untyped.
    pub async fn request_raw(&self, request: RequestDescriptor) -> Result<ApiResponse<Payload>> {
        let config = self.config();
        let request = self.inner.interceptors.apply_request(request).await?;
        let outcome = self.dispatch(request, config).await;
        self.inner.interceptors.apply_response(outcome).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        self.request(RequestDescriptor::new(Method::GET, url).with_options(options))
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        self.request(with_body(Method::POST, url, body)?.with_options(options))
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        self.request(with_body(Method::PUT, url, body)?.with_options(options))
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        self.request(with_body(Method::PATCH, url, body)?.with_options(options))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        self.request(RequestDescriptor::new(Method::DELETE, url).with_options(options))
            .await
    }

    /// Appends a request interceptor after the ones already installed.
    pub fn add_request_interceptor<I>(&self, interceptor: I) -> InterceptorHandle
    where
        I: RequestInterceptor + 'static,
    {
        self.inner.interceptors.add_request(Arc::new(interceptor))
    }

    /// Appends a response interceptor after the ones already installed.
    pub fn add_response_interceptor<I>(&self, interceptor: I) -> InterceptorHandle
    where
        I: ResponseInterceptor + 'static,
    {
        self.inner.interceptors.add_response(Arc::new(interceptor))
    }

    /// Applies a partial configuration update to calls started afterwards.
    pub fn update_config(&self, update: ConfigUpdate) {
        match self.inner.config.write() {
            Ok(mut config) => config.apply(update),
            Err(poisoned) => poisoned.into_inner().apply(update),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        match self.inner.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Evicts cached responses; `pattern` is a regular expression matched
    /// against `METHOD:URL:JSON(params)` keys. Returns the number removed.
    pub fn clear_cache(&self, pattern: Option<&str>) -> Result<usize> {
        self.inner.transfers.cache.clear(pattern)
    }

    /// Forgets every rate-limit window.
    pub fn reset_rate_limits(&self) {
        self.inner.limiter.reset();
    }

    pub fn create_cancel_token(&self) -> CancelHandle {
        CancelHandle::new()
    }

    /// Whether the last transfer reached the server. Starts out `true`.
    pub fn is_online(&self) -> bool {
        self.inner.transfers.online.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> ClientStats {
        ClientStats {
            cache_size: self.inner.transfers.cache.len(),
            pending_requests: self.inner.dedup.len(),
            rate_limit_trackers: self.inner.limiter.tracker_count(),
        }
    }

    /// Stores the bearer token sent with subsequent requests.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        self.inner
            .credentials
            .set(auth::AUTH_TOKEN_KEY, token.into());
    }

    pub fn clear_auth_token(&self) {
        self.inner.credentials.remove(auth::AUTH_TOKEN_KEY);
    }

    async fn dispatch(
        &self,
        request: RequestDescriptor,
        config: ClientConfig,
    ) -> Result<ApiResponse<Payload>> {
        let full_url = config.resolve_url(&request.url, &request.query_pairs())?;
        let limit = config.rate_limit();
        self.inner.limiter.check(&full_url, limit)?;

        let is_get = request.method == Method::GET;
        let cache_key = request.cache_key();
        if is_get {
            if let Some(cached) = self.inner.transfers.cache.get(&cache_key) {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %cache_key, "serving cached response");

                return Ok(cached);
            }
        }

        // Recorded immediately before the transfer; cache hits never count.
        self.inner.limiter.try_acquire(&full_url, limit)?;

        let transfers = self.inner.transfers.clone();
        self.inner
            .dedup
            .dedupe(request.dedup_key(), move || {
                transfers.run(request, full_url, config, is_get.then_some(cache_key))
            })
            .await
    }
}

impl Transfers {
    /// Retried transfer shared by every caller of one dedup key; stores
    /// the response under `cache_key` when given.
    async fn run(
        self,
        request: RequestDescriptor,
        full_url: String,
        config: ClientConfig,
        cache_key: Option<String>,
    ) -> Result<ApiResponse<Payload>> {
        let attempts = request.retry_attempts.unwrap_or(config.retry_attempts);
        let response = with_retry(
            |_attempt| self.attempt(&request, &full_url, &config),
            attempts,
            config.retry_delay,
        )
        .await?;

        if let Some(cache_key) = cache_key {
            self.cache.set(cache_key, response.clone(), config.cache_ttl);
        }
        Ok(response)
    }

    async fn attempt(
        &self,
        request: &RequestDescriptor,
        full_url: &str,
        config: &ClientConfig,
    ) -> Result<ApiResponse<Payload>> {
        let outcome = transfer::execute(&self.http, request, full_url, config.timeout).await;
        match &outcome {
            Ok(_) | Err(ApiError::Http { .. }) => self.online.store(true, Ordering::Relaxed),
            Err(ApiError::Network(_)) => self.online.store(false, Ordering::Relaxed),
            Err(_) => {}
        }
        outcome
    }
}

fn with_body<B: Serialize + ?Sized>(method: Method, url: &str, body: &B) -> Result<RequestDescriptor> {
    let body = serde_json::to_value(body)
        .map_err(|err| ApiError::InvalidRequest(format!("unserializable body: {err}")))?;
    Ok(RequestDescriptor::new(method, url).body(body))
}

/// Assembles an [`ApiClient`].
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ClientConfig>,
    credentials: Option<Arc<dyn CredentialStore>>,
    http: Option<reqwest::Client>,
}

impl ApiClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `store` for the bearer token instead of an in-memory store.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Sends requests through a pre-configured `reqwest` client.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Builds the client and installs the default interceptors: header and
    /// bearer-token injection on requests, credential clearing on 401 and
    /// 429 conversion on responses.
    pub fn build(self) -> ApiClient {
        let config = Arc::new(RwLock::new(self.config.unwrap_or_default()));
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let interceptors = Arc::new(InterceptorChain::default());

        interceptors.add_request(Arc::new(AuthInjector {
            store: Arc::clone(&credentials),
            config: Arc::clone(&config),
        }));
        interceptors.add_response(Arc::new(SessionGuard {
            store: Arc::clone(&credentials),
        }));

        ApiClient {
            inner: Arc::new(Inner {
                transfers: Transfers {
                    http: self.http.unwrap_or_default(),
                    cache: Arc::new(ResponseCache::new()),
                    online: Arc::new(AtomicBool::new(true)),
                },
                config,
                credentials,
                interceptors,
                limiter: SlidingWindowLimiter::new(),
                dedup: Deduplicator::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ApiClient;
    use crate::{ClientConfig, ClientStats, ConfigUpdate};

    #[test]
    fn debug_redacts_credentials() {
        let client = ApiClient::new(ClientConfig::with_base_url("http://localhost/api"));
        client.set_auth_token("secret-token");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn update_config_is_visible_to_clones() {
        let client = ApiClient::default();
        let clone = client.clone();
        client.update_config(ConfigUpdate {
            base_url: Some("http://localhost:9000".to_owned()),
            ..ConfigUpdate::default()
        });
        assert_eq!(clone.config().base_url, "http://localhost:9000");
    }

    #[test]
    fn fresh_client_reports_empty_stats() {
        let client = ApiClient::default();
        assert_eq!(client.get_stats(), ClientStats::default());
        assert!(client.is_online());
    }
}
