//! Request and response values passed through the executor.
//!
//! Payloads are opaque JSON here: building message requests and decoding
//! message responses into typed DTOs happens outside the transport core.

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClassifiedError, Outcome};

/// An already-built API call: method, path relative to the base URL, and an
/// optional JSON body.
///
/// The body is serialized once and replayed verbatim on every retry, so the
/// call must be safe to repeat.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Headers for this call only, applied over the configured ones.
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Serialized body bytes.
    pub fn body_bytes(&self) -> Option<Bytes> {
        self.body.as_ref().map(|b| Bytes::from(b.to_string()))
    }

    /// Full URL of this call under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// A complete response as returned by the transport.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body. A body that does not match `T` is a
    /// [`ParseFailure`](crate::error::ErrorKind::ParseFailure).
    pub fn json<T: DeserializeOwned>(&self) -> Outcome<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ClassifiedError::parse_failure(
                format!("failed to decode response body: {e}"),
                Some(self.status),
            )
        })
    }

    /// Total tokens from a `usage` object, if the body carries one.
    pub fn usage_tokens(&self) -> Option<u64> {
        #[derive(Deserialize)]
        struct WithUsage {
            usage: Usage,
        }

        #[derive(Deserialize)]
        struct Usage {
            #[serde(default)]
            input_tokens: u64,
            #[serde(default)]
            output_tokens: u64,
        }

        serde_json::from_slice::<WithUsage>(&self.body)
            .ok()
            .map(|w| w.usage.input_tokens + w.usage.output_tokens)
    }
}
