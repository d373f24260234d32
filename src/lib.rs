//! `smartgoals-http` is the async HTTP orchestration layer of the SMART
//! goals dashboard.
//!
//! [`ApiClient`] wraps `reqwest` with:
//! - request/response interceptors ([`RequestInterceptor`], [`ResponseInterceptor`])
//! - per-URL sliding-window rate limiting
//! - TTL caching of GET responses
//! - deduplication of concurrent identical requests
//! - retries with exponential backoff and jitter
//! - timeouts and caller-driven cancellation ([`CancelHandle`])
//!
//! ```no_run
//! use smartgoals_http::{ApiClient, ClientConfig, RequestOptions};
//!
//! # async fn run() -> smartgoals_http::Result<()> {
//! let client = ApiClient::new(ClientConfig::with_base_url("https://goals.example.com/api"));
//! let goals = client
//!     .get::<serde_json::Value>("/goals", RequestOptions::new().param("status", "active"))
//!     .await?;
//! println!("{}", goals.data);
//! # Ok(())
//! # }
//! ```

mod auth;
mod cache;
mod client;
mod config;
mod dedup;
mod error;
mod interceptor;
mod rate_limit;
mod request;
mod response;
mod retry;
mod transfer;
mod util;

pub use auth::{CredentialStore, MemoryCredentialStore, AUTH_TOKEN_KEY};
pub use cache::ResponseCache;
pub use client::{ApiClient, ApiClientBuilder, ClientStats};
pub use config::{ClientConfig, ConfigUpdate, DEFAULT_BASE_URL};
pub use dedup::Deduplicator;
pub use error::ApiError;
pub use interceptor::{ErrorOutcome, InterceptorHandle, RequestInterceptor, ResponseInterceptor};
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
pub use request::{RequestDescriptor, RequestOptions};
pub use response::{ApiResponse, Payload};
pub use retry::{backoff_delay, with_retry, MAX_JITTER};
pub use transfer::CancelHandle;

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ApiError>;
