//! SSE frame decoding: byte stream -> lines -> `data:` payloads -> text
//! deltas.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::StreamError;

// Generous cap; a single frame can carry a whole section's worth of text.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Read one attempt's worth of SSE frames. Returns `Ok` on `[DONE]` or
/// end of stream. Frames that are not `data:` lines or do not parse as
/// JSON are ignored; keep-alive comments and provider chatter fall out
/// here.
pub(crate) async fn read_sse_frames<S>(
    frames: S,
    extract: fn(&Value) -> Option<String>,
    cancel: &CancellationToken,
    mut on_delta: impl FnMut(&str),
) -> Result<(), StreamError>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let reader = StreamReader::new(frames);
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Aborted),
            next = lines.next() => next,
        };
        let line = match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(StreamError::Network(e.to_string())),
            Some(Ok(line)) => line,
        };
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim_start();
        if payload == "[DONE]" {
            return Ok(());
        }
        let Ok(frame) = serde_json::from_str::<Value>(payload) else {
            continue;
        };
        if let Some(delta) = extract(&frame) {
            on_delta(&delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn extract_delta(frame: &Value) -> Option<String> {
        frame["delta"].as_str().map(str::to_string)
    }

    fn byte_chunks(parts: &[&str]) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
        let owned: Vec<std::io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn frames_split_across_chunks_reassemble() {
        let frames = byte_chunks(&[
            "data: {\"delta\": \"Hel",
            "lo\"}\n\n",
            ": keep-alive\n",
            "data: {\"delta\": \" world\"}\n\n",
            "data: [DONE]\n\n",
            "data: {\"delta\": \"after done\"}\n\n",
        ]);
        let mut text = String::new();
        read_sse_frames(frames, extract_delta, &CancellationToken::new(), |d| {
            text.push_str(d)
        })
        .await
        .unwrap();
        assert_eq!(text, "Hello world");
    }

    #[tokio::test]
    async fn unparseable_frames_are_skipped() {
        let frames = byte_chunks(&[
            "data: not json\n",
            "event: ping\n",
            "data: {\"other\": 1}\n",
            "data: {\"delta\": \"ok\"}\n",
        ]);
        let mut text = String::new();
        read_sse_frames(frames, extract_delta, &CancellationToken::new(), |d| {
            text.push_str(d)
        })
        .await
        .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn io_error_surfaces_as_network() {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"delta\": \"x\"}\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let err = read_sse_frames(
            stream::iter(chunks),
            extract_delta,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::Network(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_token_aborts_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = read_sse_frames(
            byte_chunks(&["data: {\"delta\": \"x\"}\n"]),
            extract_delta,
            &cancel,
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StreamError::Aborted));
    }
}
