//! # anthropic-transport - resilient request and streaming core
//!
//! The transport layer underneath a typed client for the Anthropic API. It
//! takes already-built JSON requests and resolved configuration and takes
//! care of the parts that need care:
//!
//! - classifying failures into a small, stable taxonomy
//! - retrying transient failures with exponential backoff and jitter
//! - decoding `text/event-stream` bodies into typed events, incrementally
//!   and regardless of how the bytes are chunked
//! - cooperative cancellation of calls, backoff sleeps and streams
//!
//! ## Architecture
//!
//! - **[`error`]**: `ClassifiedError`, `ErrorKind` and the classifier
//! - **[`retry`]**: the pure `RetryPolicy::decide` function
//! - **[`sse`]**: `StreamDecoder` and the lazy `decode_stream`
//! - **[`client`]**: `RequestExecutor`, which ties the above to a transport
//! - **[`http`]**: the `Transport` seam and its reqwest implementation
//!
//! ## Example
//! ```no_run
//! use anthropic_transport::{ApiRequest, ClientOptions, RequestExecutor};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions::new("your-api-key").with_max_retries(3);
//!     let executor = RequestExecutor::from_options(options)?;
//!
//!     let request = ApiRequest::post(
//!         "/v1/messages",
//!         json!({
//!             "model": "claude-sonnet-4-5",
//!             "max_tokens": 100,
//!             "messages": [{"role": "user", "content": "Hello!"}],
//!         }),
//!     );
//!
//!     let response: serde_json::Value = executor
//!         .execute_json(&request, &CancellationToken::new())
//!         .await?;
//!     println!("{response}");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod http;
pub mod model;
pub mod options;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod telemetry;

// Re-exports for convenience
pub use client::RequestExecutor;
pub use error::{ClassifiedError, ErrorKind, Outcome};
pub use model::{ApiRequest, RawResponse};
pub use options::ClientOptions;
pub use retry::{RetryDecision, RetryPolicy};
pub use stream::{EventStream, StreamEvent};
