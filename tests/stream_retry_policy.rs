//! Retry, backoff, and cancellation behaviour of the streaming client,
//! exercised against scripted transports with paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use coursemap::infra::stream::{
    ByteStream, ProviderRequest, SseTransport, StreamError, StreamOptions, stream_completion,
};

fn extract_delta(frame: &Value) -> Option<String> {
    frame["delta"].as_str().map(str::to_string)
}

fn request() -> ProviderRequest {
    ProviderRequest {
        url: "http://localhost/test".into(),
        headers: Vec::new(),
        body: json!({}),
        extract: extract_delta,
    }
}

fn frames(parts: &[&str]) -> ByteStream {
    let owned: Vec<std::io::Result<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
        .collect();
    Box::pin(stream::iter(owned))
}

/// Every open fails with a retryable network error.
struct AlwaysFailing {
    opens: AtomicU32,
}

#[async_trait]
impl SseTransport for AlwaysFailing {
    async fn open(&self, _request: &ProviderRequest) -> Result<ByteStream, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err(StreamError::Network("connection reset".into()))
    }
}

/// Replays one scripted byte stream per open, then fails.
struct Scripted {
    opens: AtomicU32,
    scripts: Vec<Vec<ScriptItem>>,
}

enum ScriptItem {
    Line(&'static str),
    IoError,
}

#[async_trait]
impl SseTransport for Scripted {
    async fn open(&self, _request: &ProviderRequest) -> Result<ByteStream, StreamError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) as usize;
        let Some(script) = self.scripts.get(n) else {
            return Err(StreamError::Network("script exhausted".into()));
        };
        let items: Vec<std::io::Result<Bytes>> = script
            .iter()
            .map(|item| match item {
                ScriptItem::Line(line) => Ok(Bytes::copy_from_slice(line.as_bytes())),
                ScriptItem::IoError => Err(std::io::Error::other("mid-stream drop")),
            })
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

#[tokio::test(start_paused = true)]
async fn hello_frame_then_done_yields_hello() {
    struct Hello;
    #[async_trait]
    impl SseTransport for Hello {
        async fn open(&self, _request: &ProviderRequest) -> Result<ByteStream, StreamError> {
            Ok(frames(&["data: {\"delta\":\"Hello\"}\n\ndata: [DONE]\n\n"]))
        }
    }

    let outcome = stream_completion(&Hello, &request(), StreamOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.full_text, "Hello");
    assert_eq!(outcome.chunks, 1);
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_get_exactly_four_tries() {
    let transport = AlwaysFailing { opens: AtomicU32::new(0) };
    let start = tokio::time::Instant::now();

    let mut retries: Vec<(u32, u32, u64)> = Vec::new();
    let mut on_retry = |attempt: u32, max: u32, delay_ms: u64| {
        retries.push((attempt, max, delay_ms));
    };
    let err = stream_completion(
        &transport,
        &request(),
        StreamOptions { on_retry: Some(&mut on_retry), ..Default::default() },
    )
    .await
    .unwrap_err();

    match err {
        StreamError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(last.contains("connection reset"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(transport.opens.load(Ordering::SeqCst), 4);
    assert_eq!(retries, vec![(1, 3, 1000), (2, 3, 2000), (3, 3, 4000)]);
    // Backoff waits are the only time spent: 1s + 2s + 4s.
    assert_eq!(start.elapsed(), Duration::from_millis(7000));
}

#[tokio::test(start_paused = true)]
async fn abort_during_backoff_stops_retrying() {
    let transport = AlwaysFailing { opens: AtomicU32::new(0) };
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = stream_completion(
        &transport,
        &request(),
        StreamOptions { cancel, ..Default::default() },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, StreamError::Aborted));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn pre_cancelled_token_never_opens_a_stream() {
    let transport = AlwaysFailing { opens: AtomicU32::new(0) };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = stream_completion(
        &transport,
        &request(),
        StreamOptions { cancel, ..Default::default() },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, StreamError::Aborted));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn auth_errors_are_not_retried() {
    struct Unauthorized {
        opens: AtomicU32,
    }
    #[async_trait]
    impl SseTransport for Unauthorized {
        async fn open(&self, _request: &ProviderRequest) -> Result<ByteStream, StreamError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(StreamError::Api { status: Some(401), message: "bad key".into() })
        }
    }

    let transport = Unauthorized { opens: AtomicU32::new(0) };
    let err = stream_completion(&transport, &request(), StreamOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::Api { status: Some(401), .. }));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn overload_status_is_retried() {
    struct Overloaded {
        opens: AtomicU32,
    }
    #[async_trait]
    impl SseTransport for Overloaded {
        async fn open(&self, _request: &ProviderRequest) -> Result<ByteStream, StreamError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StreamError::Api { status: Some(529), message: "overloaded".into() })
            } else {
                Ok(frames(&["data: {\"delta\":\"ok\"}\ndata: [DONE]\n"]))
            }
        }
    }

    let transport = Overloaded { opens: AtomicU32::new(0) };
    let outcome = stream_completion(&transport, &request(), StreamOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.full_text, "ok");
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn text_accumulates_across_a_mid_stream_drop() {
    let transport = Scripted {
        opens: AtomicU32::new(0),
        scripts: vec![
            vec![
                ScriptItem::Line("data: {\"delta\":\"Hel\"}\n"),
                ScriptItem::IoError,
            ],
            vec![
                ScriptItem::Line("data: {\"delta\":\"lo\"}\n"),
                ScriptItem::Line("data: [DONE]\n"),
            ],
        ],
    };

    let mut seen: Vec<String> = Vec::new();
    let mut on_chunk = |text: &str, _count: u64| seen.push(text.to_string());
    let outcome = stream_completion(
        &transport,
        &request(),
        StreamOptions {
            existing_text: "Say: ".into(),
            on_chunk: Some(&mut on_chunk),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.full_text, "Say: Hello");
    assert_eq!(outcome.chunks, 2);
    assert_eq!(seen, vec!["Say: Hel".to_string(), "Say: Hello".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn abort_wins_over_a_ready_frame() {
    let transport = Scripted {
        opens: AtomicU32::new(0),
        scripts: vec![vec![ScriptItem::Line("data: {\"delta\":\"x\"}\n")]],
    };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = stream_completion(
        &transport,
        &request(),
        StreamOptions { cancel, ..Default::default() },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StreamError::Aborted));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
}
