//! Error taxonomy and failure classification.
//!
//! Every failure the client can observe, whether a non-2xx response or a
//! transport-level fault, is folded into a [`ClassifiedError`] here. The
//! retryability verdict attached to it comes from one table
//! ([`is_retryable_status`] and [`ErrorKind::is_transient`]) that the retry
//! policy reads as well.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::http::TransportError;

/// Result of a single logical API call.
pub type Outcome<T> = Result<T, ClassifiedError>;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    InvalidRequest,
    ServerError,
    NetworkFailure,
    Cancelled,
    ParseFailure,
    Unknown,
}

impl ErrorKind {
    /// Kinds that are worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::ServerError | ErrorKind::NetworkFailure
        )
    }

    /// Kinds that must never be retried, whatever the status says.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Authentication | ErrorKind::InvalidRequest | ErrorKind::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure, tagged with its kind and whether retrying may help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}{}", .http_status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    http_status: Option<u16>,
    retryable: bool,
}

impl ClassifiedError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        http_status: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status,
            retryable,
        }
    }

    /// The error raised when a caller's cancellation token fires.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled", None, false)
    }

    /// A body that arrived fine but could not be decoded.
    pub fn parse_failure(message: impl Into<String>, http_status: Option<u16>) -> Self {
        Self::new(ErrorKind::ParseFailure, message, http_status, false)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Statuses the service uses for transient conditions: request timeout,
/// throttling and every 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: Option<String>,
}

/// Classify a raw failure. A transport failure takes precedence over any
/// status; with neither, the result is [`ErrorKind::Unknown`].
pub fn classify(
    status: Option<u16>,
    body: Option<&str>,
    transport: Option<&TransportError>,
) -> ClassifiedError {
    if let Some(err) = transport {
        return classify_transport_error(err);
    }
    match status {
        Some(status) => classify_http_status(status, body),
        None => ClassifiedError::new(ErrorKind::Unknown, "request failed", None, false),
    }
}

/// Classify a transport-level failure.
pub fn classify_transport_error(err: &TransportError) -> ClassifiedError {
    match err {
        TransportError::Cancelled => ClassifiedError::cancelled(),
        TransportError::Request(_) => {
            ClassifiedError::new(ErrorKind::InvalidRequest, err.to_string(), None, false)
        }
        other => ClassifiedError::new(ErrorKind::NetworkFailure, other.to_string(), None, true),
    }
}

/// Classify a non-2xx response from its status and error envelope.
pub fn classify_http_status(status: u16, body: Option<&str>) -> ClassifiedError {
    let envelope = body.and_then(|b| serde_json::from_str::<ErrorEnvelope>(b).ok());

    let Some(envelope) = envelope else {
        let message = match body.map(str::trim).filter(|b| !b.is_empty()) {
            Some(raw) => format!("request failed with status {status}: {raw}"),
            None => format!("request failed with status {status}"),
        };
        return ClassifiedError::new(
            ErrorKind::ParseFailure,
            message,
            Some(status),
            is_retryable_status(status),
        );
    };

    let kind = kind_for_error_type(&envelope.error.error_type, status);
    let message = envelope
        .error
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("request failed with status {status}"));

    ClassifiedError::new(kind, message, Some(status), kind.is_transient())
}

fn kind_for_error_type(error_type: &str, status: u16) -> ErrorKind {
    match error_type {
        "authentication_error" | "permission_error" => ErrorKind::Authentication,
        "rate_limit_error" => ErrorKind::RateLimited,
        "invalid_request_error" | "not_found_error" => ErrorKind::InvalidRequest,
        "api_error" | "overloaded_error" => ErrorKind::ServerError,
        _ => match status {
            408 => ErrorKind::NetworkFailure,
            429 => ErrorKind::RateLimited,
            400..=499 => ErrorKind::InvalidRequest,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        },
    }
}
