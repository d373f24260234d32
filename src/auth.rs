use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};

use crate::{
    interceptor::{ErrorOutcome, RequestInterceptor, ResponseInterceptor},
    util::lock_unpoisoned,
    ApiError, ClientConfig, RequestDescriptor, Result,
};

/// Storage key of the bearer token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Key-value credential storage consulted on every request.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Process-local credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = lock_unpoisoned(&self.values).keys().cloned().collect();
        f.debug_struct("MemoryCredentialStore")
            .field("keys", &keys)
            .finish()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        lock_unpoisoned(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        lock_unpoisoned(&self.values).insert(key.to_owned(), value);
    }

    fn remove(&self, key: &str) {
        lock_unpoisoned(&self.values).remove(key);
    }
}

/// Default request interceptor: adds the client's default headers and the
/// stored bearer token, without overriding headers the caller set.
pub(crate) struct AuthInjector {
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) config: Arc<RwLock<ClientConfig>>,
}

#[async_trait]
impl RequestInterceptor for AuthInjector {
    async fn intercept(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        let defaults: BTreeMap<String, String> = match self.config.read() {
            Ok(config) => config.default_headers.clone(),
            Err(poisoned) => poisoned.into_inner().default_headers.clone(),
        };
        for (name, value) in defaults {
            if request.header_value(&name).is_none() {
                request = request.header(name, value);
            }
        }

        if request.header_value(header::AUTHORIZATION.as_str()).is_none() {
            if let Some(token) = self.store.get(AUTH_TOKEN_KEY) {
                request = request.header(
                    header::AUTHORIZATION.as_str(),
                    normalize_bearer_authorization(&token),
                );
            }
        }

        Ok(request)
    }
}

/// Default response interceptor: drops the stored token when the server
/// answers 401 and turns 429 into [`ApiError::ServerRateLimited`].
pub(crate) struct SessionGuard {
    pub(crate) store: Arc<dyn CredentialStore>,
}

#[async_trait]
impl ResponseInterceptor for SessionGuard {
    async fn on_error(&self, error: ApiError) -> ErrorOutcome {
        match &error {
            ApiError::Http { status: 401, .. } => {
                #[cfg(feature = "tracing")]
                tracing::warn!("received 401 Unauthorized; clearing stored credentials");

                self.store.remove(AUTH_TOKEN_KEY);
                ErrorOutcome::Propagate(error)
            }
            ApiError::Http {
                status: 429,
                headers,
                ..
            } => ErrorOutcome::Propagate(ApiError::ServerRateLimited {
                retry_after: retry_after(headers),
            }),
            _ => ErrorOutcome::Propagate(error),
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, RwLock},
        time::Duration,
    };

    use reqwest::{
        header::{HeaderMap, HeaderValue, RETRY_AFTER},
        Method,
    };

    use super::{
        normalize_bearer_authorization, AuthInjector, CredentialStore, MemoryCredentialStore,
        SessionGuard, AUTH_TOKEN_KEY,
    };
    use crate::{
        interceptor::{ErrorOutcome, RequestInterceptor, ResponseInterceptor},
        ApiError, ClientConfig, Payload, RequestDescriptor,
    };

    fn http_error(status: u16, headers: HeaderMap) -> ApiError {
        ApiError::Http {
            status,
            status_text: String::new(),
            body: Payload::Empty,
            headers,
        }
    }

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[tokio::test]
    async fn injects_token_and_default_headers() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(AUTH_TOKEN_KEY, "secret".to_owned());
        let injector = AuthInjector {
            store,
            config: Arc::new(RwLock::new(ClientConfig::default())),
        };

        let request = injector
            .intercept(RequestDescriptor::new(Method::GET, "/goals").header("accept", "text/csv"))
            .await
            .expect("must pass");

        assert_eq!(request.header_value("authorization"), Some("Bearer secret"));
        assert_eq!(request.header_value("content-type"), Some("application/json"));
        assert_eq!(request.header_value("accept"), Some("text/csv"));
    }

    #[tokio::test]
    async fn without_token_no_authorization_header() {
        let injector = AuthInjector {
            store: Arc::new(MemoryCredentialStore::new()),
            config: Arc::new(RwLock::new(ClientConfig::default())),
        };

        let request = injector
            .intercept(RequestDescriptor::new(Method::GET, "/goals"))
            .await
            .expect("must pass");
        assert!(request.header_value("authorization").is_none());
    }

    #[tokio::test]
    async fn unauthorized_clears_stored_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(AUTH_TOKEN_KEY, "expired".to_owned());
        let guard = SessionGuard {
            store: store.clone(),
        };

        let outcome = guard.on_error(http_error(401, HeaderMap::new())).await;

        assert!(matches!(
            outcome,
            ErrorOutcome::Propagate(ApiError::Http { status: 401, .. })
        ));
        assert!(store.get(AUTH_TOKEN_KEY).is_none());
    }

    #[tokio::test]
    async fn too_many_requests_becomes_rate_limit_error() {
        let guard = SessionGuard {
            store: Arc::new(MemoryCredentialStore::new()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

        match guard.on_error(http_error(429, headers)).await {
            ErrorOutcome::Propagate(ApiError::ServerRateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected server rate limit, got {other:?}"),
        }
    }
}
