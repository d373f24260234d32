use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{ApiError, ApiResponse, Payload, RequestDescriptor, Result};

/// Performs one attempt of `request` against `full_url`.
///
/// The attempt races the transfer against the effective timeout and the
/// descriptor's cancellation token; whichever fires first drops the
/// in-flight transfer along with the timer.
pub(crate) async fn execute(
    http: &reqwest::Client,
    request: &RequestDescriptor,
    full_url: &str,
    default_timeout: Duration,
) -> Result<ApiResponse<Payload>> {
    let timeout = request.timeout.unwrap_or(default_timeout);
    let cancel = request.cancel.clone().unwrap_or_default();
    let builder = build_request(http, request, full_url)?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiError::Cancelled),
        _ = sleep(timeout) => Err(ApiError::Timeout(timeout)),
        outcome = send(builder, timeout) => outcome,
    }
}

fn build_request(
    http: &reqwest::Client,
    request: &RequestDescriptor,
    full_url: &str,
) -> Result<reqwest::RequestBuilder> {
    let mut builder = http
        .request(request.method.clone(), full_url)
        .headers(header_map(request)?);
    if let Some(body) = &request.body {
        let body = serde_json::to_vec(body)
            .map_err(|err| ApiError::InvalidRequest(format!("unserializable body: {err}")))?;
        builder = builder.body(body);
    }
    Ok(builder)
}

fn header_map(request: &RequestDescriptor) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::InvalidRequest(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ApiError::InvalidRequest(format!("invalid value for header '{name}': {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

async fn send(builder: reqwest::RequestBuilder, timeout: Duration) -> Result<ApiResponse<Payload>> {
    let response = builder
        .send()
        .await
        .map_err(|err| ApiError::from_transport(&err, timeout))?;

    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or_default().to_owned();
    let headers = response.headers().clone();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);
    let body = response
        .text()
        .await
        .map_err(|err| ApiError::from_transport(&err, timeout))?;

    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: Payload::from_error_body(&body, &status_text),
            status_text,
            headers,
        });
    }

    Ok(ApiResponse {
        data: Payload::from_body(content_type.as_deref(), body)?,
        status: status.as_u16(),
        status_text,
        headers,
    })
}

/// Caller-side cancellation handle backed by one token.
///
/// Pass [`token`](Self::token) to any number of requests; [`cancel`](Self::cancel)
/// aborts all of them.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
