//! Request execution: one exchange, retried exchanges, and streaming.
//!
//! [`RequestExecutor`] owns a [`Transport`] and the resolved options. Every
//! call is independent: the attempt counter and the stream decoder belong to
//! the call, and the retry policy and classifier are pure functions.
//!
//! Non-streaming calls are retried according to [`RetryPolicy`]. Streaming
//! calls are never retried: once part of a stream has reached the caller a
//! transparent retry would duplicate or drop output, so failures of the
//! initial response are returned up front and failures mid-stream end the
//! stream with an error.
//!
//! # Example
//! ```no_run
//! use anthropic_transport::client::RequestExecutor;
//! use anthropic_transport::model::ApiRequest;
//! use anthropic_transport::options::ClientOptions;
//! use futures::StreamExt;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = RequestExecutor::from_options(ClientOptions::from_env()?)?;
//!     let request = ApiRequest::post(
//!         "/v1/messages",
//!         json!({
//!             "model": "claude-sonnet-4-5",
//!             "max_tokens": 256,
//!             "stream": true,
//!             "messages": [{"role": "user", "content": "Hello!"}],
//!         }),
//!     );
//!
//!     let cancel = CancellationToken::new();
//!     let mut events = executor.execute_streaming(&request, &cancel).await?;
//!     while let Some(event) = events.next().await {
//!         if let Some(text) = event?.text_delta() {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{classify_http_status, classify_transport_error, ClassifiedError, Outcome};
use crate::http::{HttpRequest, ReqwestTransport, Transport};
use crate::model::{ApiRequest, RawResponse};
use crate::options::{ClientOptions, ConfigError};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sse::decode_stream;
use crate::stream::EventStream;
use crate::telemetry::TelemetrySink;

/// Runs API calls over a [`Transport`].
pub struct RequestExecutor<T = ReqwestTransport> {
    transport: T,
    options: ClientOptions,
    headers: reqwest::header::HeaderMap,
    policy: RetryPolicy,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl RequestExecutor<ReqwestTransport> {
    /// Executor over a reqwest client built from `options`.
    pub fn from_options(options: ClientOptions) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::from_options(&options)?;
        Self::new(transport, options)
    }
}

impl<T: Transport> RequestExecutor<T> {
    /// Validates `options` and resolves the header set once.
    pub fn new(transport: T, options: ClientOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let headers = options.headers()?;
        Ok(Self {
            transport,
            options,
            headers,
            policy: RetryPolicy::default(),
            telemetry: None,
        })
    }

    /// Replace the default backoff policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report every call's outcome to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Exactly one round trip, no retry.
    pub async fn execute_once(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<RawResponse> {
        let started = Instant::now();
        let result = self.send_once(self.prepare(request), cancel).await;
        self.record(&request.path, started, &result);
        result
    }

    /// Run `request`, retrying transient failures with backoff.
    ///
    /// The same serialized body is sent on every attempt; the caller must
    /// only pass requests that are safe to repeat. At most
    /// `max_retries + 1` attempts are made.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<RawResponse> {
        let started = Instant::now();
        let result = self.execute_with_retry(request, cancel).await;
        self.record(&request.path, started, &result);
        result
    }

    /// [`execute`](Self::execute), then decode the body as `R`. A body that
    /// does not decode is reported as a failed call.
    pub async fn execute_json<R: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<R> {
        let started = Instant::now();
        let decoded = self
            .execute_with_retry(request, cancel)
            .await
            .and_then(|response| Ok((response.json::<R>()?, response.usage_tokens())));
        match decoded {
            Ok((value, tokens)) => {
                self.record_success(&request.path, started, tokens);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&request.path, started, &err);
                Err(err)
            }
        }
    }

    /// Issue a streaming request and decode its body lazily.
    ///
    /// A non-2xx status is classified and returned before any event. After
    /// that the stream yields events until the end marker or end of body, or
    /// ends with one error on a read failure or cancellation.
    ///
    /// Telemetry sees the terminal outcome: a failure to open, the error that
    /// ended the stream, or a success once the stream is drained. A stream
    /// dropped before its end is not reported.
    pub async fn execute_streaming(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<EventStream> {
        let started = Instant::now();
        match self.open_stream(request, cancel).await {
            Ok(events) => match &self.telemetry {
                Some(sink) => Ok(report_on_end(
                    events,
                    sink.clone(),
                    request.path.clone(),
                    started,
                )),
                None => Ok(events),
            },
            Err(err) => {
                self.record_failure(&request.path, started, &err);
                Err(err)
            }
        }
    }

    async fn execute_with_retry(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<RawResponse> {
        let http_request = self.prepare(request);
        let max_retries = self.options.max_retries;
        let mut attempt = 0u32;

        loop {
            tracing::debug!(attempt, path = %request.path, "sending request");
            let err = match self.send_once(http_request.clone(), cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let delay = match self.policy.decide(attempt, &err, max_retries) {
                RetryDecision::Stop => return Err(err),
                RetryDecision::Retry(delay) => delay,
            };

            tracing::warn!(
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = %err.kind(),
                error = %err,
                "request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClassifiedError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Outcome<RawResponse> {
        if cancel.is_cancelled() {
            return Err(ClassifiedError::cancelled());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::cancelled()),
            response = self.transport.send(request) => response,
        };

        let response = response.map_err(|e| classify_transport_error(&e))?;
        if response.is_success() {
            Ok(response)
        } else {
            let body = response.text();
            Err(classify_http_status(response.status, Some(&body)))
        }
    }

    async fn open_stream(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Outcome<EventStream> {
        if cancel.is_cancelled() {
            return Err(ClassifiedError::cancelled());
        }

        let http_request = self.prepare(request);
        tracing::debug!(path = %request.path, "opening stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifiedError::cancelled()),
            response = self.transport.send_streaming(http_request) => response,
        };
        let response = response.map_err(|e| classify_transport_error(&e))?;

        if !(200..300).contains(&response.status) {
            let status = response.status;
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClassifiedError::cancelled()),
                body = response.into_text() => body,
            };
            // A body that cannot be read still leaves the status to classify on.
            let body = body.ok();
            return Err(classify_http_status(status, body.as_deref()));
        }

        Ok(decode_stream(
            response.body,
            cancel.clone(),
            self.telemetry.clone(),
        ))
    }

    fn prepare(&self, request: &ApiRequest) -> HttpRequest {
        let mut headers = self.headers.clone();
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }
        HttpRequest {
            method: request.method.clone(),
            url: request.url(&self.options.base_url),
            headers,
            body: request.body_bytes(),
        }
    }

    fn record(&self, operation: &str, started: Instant, result: &Outcome<RawResponse>) {
        match result {
            Ok(response) => self.record_success(operation, started, response.usage_tokens()),
            Err(err) => self.record_failure(operation, started, err),
        }
    }

    fn record_success(&self, operation: &str, started: Instant, tokens: Option<u64>) {
        if let Some(sink) = &self.telemetry {
            sink.record_success(operation, started.elapsed(), tokens);
        }
    }

    fn record_failure(&self, operation: &str, started: Instant, err: &ClassifiedError) {
        if let Some(sink) = &self.telemetry {
            sink.record_failure(operation, started.elapsed(), err.kind());
        }
    }
}

/// Pass `events` through, reporting to `sink` once when the stream ends.
fn report_on_end(
    events: EventStream,
    sink: Arc<dyn TelemetrySink>,
    operation: String,
    started: Instant,
) -> EventStream {
    stream::unfold((events, Some(sink)), move |(mut events, mut sink)| {
        let operation = operation.clone();
        async move {
            let item = events.next().await;
            match (&item, sink.take()) {
                (Some(Ok(_)), pending) => sink = pending,
                (Some(Err(err)), Some(sink)) => {
                    sink.record_failure(&operation, started.elapsed(), err.kind())
                }
                (None, Some(sink)) => sink.record_success(&operation, started.elapsed(), None),
                (_, None) => {}
            }
            item.map(|item| (item, (events, sink)))
        }
    })
    .boxed()
}
