use reqwest::header::{self, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::{ApiError, Result};

/// Response body, selected by the response content type.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(JsonValue),
    Text(String),
    Empty,
}

impl Payload {
    /// Chooses JSON or text decoding from the `Content-Type` header.
    ///
    /// A body labelled JSON that fails to parse is reported as a decode error.
    pub(crate) fn from_body(content_type: Option<&str>, body: String) -> Result<Self> {
        if body.is_empty() {
            return Ok(Self::Empty);
        }
        if content_type.is_some_and(is_json_content_type) {
            return serde_json::from_str(&body)
                .map(Self::Json)
                .map_err(|err| ApiError::Decode(format!("invalid JSON response: {err}")));
        }
        Ok(Self::Text(body))
    }

    /// Decodes the body of a non-success response.
    ///
    /// Falls back to `{"message": <status text>}` when the body is not JSON.
    pub(crate) fn from_error_body(body: &str, status_text: &str) -> Self {
        match serde_json::from_str::<JsonValue>(body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Json(serde_json::json!({ "message": status_text })),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// Text bodies are offered to `T` as a JSON string and empty bodies as
    /// `null`, so `String` and `Option<_>`/`()` targets work without JSON.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        let value = match self {
            Self::Json(value) => value,
            Self::Text(text) => JsonValue::String(text),
            Self::Empty => JsonValue::Null,
        };
        serde_json::from_value(value)
            .map_err(|err| ApiError::Decode(format!("unexpected response shape: {err}")))
    }
}

fn is_json_content_type(value: &str) -> bool {
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// Successful response returned to callers.
#[derive(Clone, Debug)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
}

impl ApiResponse<Payload> {
    /// Decodes the payload into a typed response, keeping the metadata.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ApiResponse<T>> {
        let ApiResponse {
            data,
            status,
            status_text,
            headers,
        } = self;
        Ok(ApiResponse {
            data: data.decode()?,
            status,
            status_text,
            headers,
        })
    }

    pub(crate) fn etag(&self) -> Option<String> {
        self.headers
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
    }
}
