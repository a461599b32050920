//! Streaming chat example.
//!
//! Run with:
//! ```bash
//! export ANTHROPIC_API_KEY="your-api-key"
//! cargo run --example stream_chat -- "Write a haiku about Rust programming."
//! ```

use std::io::Write;

use anthropic_transport::{ApiRequest, ClientOptions, RequestExecutor, StreamEvent};
use anthropic_transport::telemetry::TracingSink;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,anthropic_transport=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Write a haiku about Rust programming.".to_string());

    let executor =
        RequestExecutor::from_options(ClientOptions::from_env()?)?.with_telemetry(Arc::new(TracingSink));

    let request = ApiRequest::post(
        "/v1/messages",
        json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 1024,
            "stream": true,
            "messages": [{"role": "user", "content": prompt}],
        }),
    );

    // Ctrl-C cancels the stream instead of killing the process mid-line.
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut events = executor.execute_streaming(&request, &cancel).await?;
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            Ok(StreamEvent::Error(payload)) => eprintln!("\nstream error: {payload}"),
            Ok(event) => {
                if let Some(text) = event.text_delta() {
                    print!("{text}");
                    stdout.flush()?;
                }
            }
            Err(e) => {
                eprintln!("\n{e}");
                break;
            }
        }
    }

    println!();
    Ok(())
}
