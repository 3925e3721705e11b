//! Incremental server-sent-events reader shared by the streaming backends.
//!
//! Bytes arrive in arbitrary chunks; [`SseBuffer::push`] returns the `data:`
//! payloads of every line completed so far and keeps the partial tail.

use futures::StreamExt;
use streamrelay_core::error::ProviderError;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of the completed `data:` lines.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        // split on raw bytes so a char cut across chunks is decoded whole
        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(data) = data_payload(&String::from_utf8_lossy(&line)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a final line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&String::from_utf8_lossy(&rest))
    }
}

fn data_payload(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    // blank separators and `:` comments carry nothing
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    (!data.is_empty()).then(|| data.to_string())
}

/// What a backend does with one payload.
pub(crate) enum Step {
    Continue,
    Stop,
}

/// Drive a streaming HTTP response, handing each payload to `on_data`.
///
/// Transport failures are forwarded through `error_event`. The loop ends
/// when the body ends, `on_data` returns [`Step::Stop`], or the receiver is
/// dropped. Returns `true` only when the body was drained, in which case
/// the caller still owes the receiver its closing events.
pub(crate) async fn pump<T, F>(
    provider: &str,
    response: reqwest::Response,
    tx: &mpsc::Sender<T>,
    error_event: impl Fn(ProviderError) -> T,
    mut on_data: F,
) -> bool
where
    F: FnMut(&str) -> Option<(Vec<T>, Step)>,
{
    let mut byte_stream = response.bytes_stream();
    let mut sse = SseBuffer::new();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(error_event(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return false;
            }
        };

        for data in sse.push(&bytes) {
            if !dispatch(tx, &mut on_data, &data).await {
                return false;
            }
        }
    }

    if let Some(data) = sse.finish() {
        if !dispatch(tx, &mut on_data, &data).await {
            return false;
        }
    }
    debug!(provider, "SSE body ended");
    true
}

async fn dispatch<T, F>(tx: &mpsc::Sender<T>, on_data: &mut F, data: &str) -> bool
where
    F: FnMut(&str) -> Option<(Vec<T>, Step)>,
{
    let Some((events, step)) = on_data(data) else {
        return true;
    };
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    matches!(step, Step::Continue)
}
