//! Caller-supplied telemetry hooks.
//!
//! The executor reports through an injected [`TelemetrySink`]; there is no
//! global instance. [`TracingSink`] forwards everything to `tracing`.

use std::time::Duration;

use crate::error::ErrorKind;

/// Receives one report per logical call, plus one per skipped stream line.
pub trait TelemetrySink: Send + Sync {
    fn record_success(&self, operation: &str, duration: Duration, tokens: Option<u64>);

    fn record_failure(&self, operation: &str, duration: Duration, kind: ErrorKind);

    /// A `data:` line that could not be decoded and was skipped.
    fn record_stream_parse_failure(&self, _raw: &str) {}
}

/// Sink that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_success(&self, operation: &str, duration: Duration, tokens: Option<u64>) {
        tracing::info!(
            operation,
            duration_ms = duration.as_millis() as u64,
            tokens,
            "request succeeded"
        );
    }

    fn record_failure(&self, operation: &str, duration: Duration, kind: ErrorKind) {
        tracing::warn!(
            operation,
            duration_ms = duration.as_millis() as u64,
            kind = %kind,
            "request failed"
        );
    }

    fn record_stream_parse_failure(&self, raw: &str) {
        tracing::warn!(raw, "skipped undecodable stream event");
    }
}
