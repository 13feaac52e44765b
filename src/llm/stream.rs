//! Incremental line framing for streamed responses (SSE and NDJSON).

use futures_util::StreamExt;

use crate::error::ProviderError;

#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and drains every complete, non-blank line.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub(crate) fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Payload of an SSE `data:` line. Comments, event names and ids yield `None`.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Feeds every line of a streamed body to `on_line` in arrival order.
pub(crate) async fn for_each_line<F>(
    response: reqwest::Response,
    mut on_line: F,
) -> Result<(), ProviderError>
where
    F: FnMut(&str) -> Result<(), ProviderError> + Send,
{
    let mut buffer = LineBuffer::default();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| ProviderError::Response(err.to_string()))?;
        for line in buffer.push(&chunk) {
            on_line(&line)?;
        }
    }

    if let Some(line) = buffer.finish() {
        on_line(&line)?;
    }
    Ok(())
}
