//! Streaming transport: SSE over HTTP with cancellation and bounded
//! retry.
//!
//! The transport is a trait so the retry and abort behaviour can be
//! exercised against scripted streams; the HTTP implementation is a thin
//! `reqwest` adapter on top.

pub mod provider;
pub mod retry;
mod sse;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use provider::{
    ChatMessage, ChatRole, ModelInfo, Provider, ProviderRequest, ProviderSettings, build_request,
    list_models,
};
pub use retry::MAX_RETRIES;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream aborted")]
    Aborted,
    #[error("network error: {0}")]
    Network(String),
    #[error("API error: {message}")]
    Api { status: Option<u16>, message: String },
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl StreamError {
    /// Transient failures worth another attempt: network trouble and the
    /// gateway/overload statuses. Auth and validation errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status: Some(code), .. } => matches!(code, 502 | 503 | 529),
            _ => false,
        }
    }
}

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Opens one SSE attempt for a prepared request.
#[async_trait]
pub trait SseTransport: Send + Sync {
    async fn open(&self, request: &ProviderRequest) -> Result<ByteStream, StreamError>;
}

/// Production transport: POST the request body and stream the response.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SseTransport for HttpTransport {
    async fn open(&self, request: &ProviderRequest) -> Result<ByteStream, StreamError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| StreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider::parse_api_error(status.as_u16(), &body));
        }

        Ok(Box::pin(
            response.bytes_stream().map_err(std::io::Error::other),
        ))
    }
}

/// Per-call knobs for [`stream_completion`]. `existing_text` seeds the
/// accumulated text, which is how a stopped generation resumes without
/// re-streaming what it already has.
pub struct StreamOptions<'a> {
    pub cancel: CancellationToken,
    pub max_retries: u32,
    pub existing_text: String,
    /// Called after every appended delta with the full accumulated text
    /// and the chunk count so far.
    pub on_chunk: Option<&'a mut (dyn FnMut(&str, u64) + Send)>,
    /// Called before each backoff wait: (attempt, max_retries, delay_ms).
    pub on_retry: Option<&'a mut (dyn FnMut(u32, u32, u64) + Send)>,
}

impl Default for StreamOptions<'_> {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            max_retries: retry::MAX_RETRIES,
            existing_text: String::new(),
            on_chunk: None,
            on_retry: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub full_text: String,
    pub chunks: u64,
}

/// Stream a completion to the end, retrying transient failures with
/// exponential backoff. Cancellation always wins: it is checked before
/// each attempt, during reads, and during backoff waits, and is never
/// retried. Text accumulated by a failed attempt is kept, so a retry that
/// resumes mid-answer still converges on a parseable document.
pub async fn stream_completion(
    transport: &dyn SseTransport,
    request: &ProviderRequest,
    mut opts: StreamOptions<'_>,
) -> Result<StreamOutcome, StreamError> {
    let mut full_text = std::mem::take(&mut opts.existing_text);
    let mut chunks: u64 = 0;
    let total_tries = opts.max_retries.saturating_add(1);

    for attempt in 1..=total_tries {
        if opts.cancel.is_cancelled() {
            return Err(StreamError::Aborted);
        }
        let result = run_attempt(
            transport,
            request,
            &opts.cancel,
            &mut full_text,
            &mut chunks,
            &mut opts.on_chunk,
        )
        .await;
        match result {
            Ok(()) => return Ok(StreamOutcome { full_text, chunks }),
            Err(StreamError::Aborted) => return Err(StreamError::Aborted),
            Err(err) if err.is_retryable() && attempt < total_tries => {
                let delay = retry::backoff_delay(attempt);
                log::warn!(
                    "stream attempt {attempt}/{total_tries} failed ({err}), retrying in {}ms",
                    delay.as_millis()
                );
                if let Some(on_retry) = opts.on_retry.as_deref_mut() {
                    on_retry(attempt, opts.max_retries, delay.as_millis() as u64);
                }
                tokio::select! {
                    biased;
                    _ = opts.cancel.cancelled() => return Err(StreamError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) if err.is_retryable() => {
                return Err(StreamError::RetriesExhausted {
                    attempts: total_tries,
                    last: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    Err(StreamError::RetriesExhausted { attempts: 0, last: "no attempts made".into() })
}

async fn run_attempt(
    transport: &dyn SseTransport,
    request: &ProviderRequest,
    cancel: &CancellationToken,
    full_text: &mut String,
    chunks: &mut u64,
    on_chunk: &mut Option<&mut (dyn FnMut(&str, u64) + Send)>,
) -> Result<(), StreamError> {
    let frames = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Aborted),
        opened = transport.open(request) => opened?,
    };
    sse::read_sse_frames(frames, request.extract, cancel, |delta| {
        full_text.push_str(delta);
        *chunks += 1;
        if let Some(cb) = on_chunk.as_deref_mut() {
            cb(full_text, *chunks);
        }
    })
    .await
}
