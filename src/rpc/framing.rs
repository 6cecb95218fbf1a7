//! Line-delimited JSON framing
//!
//! Reassembles newline-terminated JSON values from arbitrarily chunked text.
//! Every line is parsed on its own, so a malformed line is reported and
//! skipped without affecting the lines around it.
//!
//! Wire format: `<json>\n<json>\n...`

use serde_json::Value;
use tracing::trace;

/// Maximum size of an unterminated tail before it is discarded
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024; // 16MB

/// Result of feeding one chunk into the decoder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodeOutput {
    /// Successfully parsed values, in stream order
    pub messages: Vec<Value>,

    /// One entry per line that failed to parse: `<parser message>\n<line>`
    pub errors: Vec<String>,
}

impl DecodeOutput {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.errors.is_empty()
    }
}

/// Incremental JSONL decoder
///
/// Owns the unterminated tail of the stream. One decoder belongs to exactly
/// one child process; a fresh one is created on every spawn.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Text received after the last newline
    receive_buffer: String,

    /// Prefix of `receive_buffer` already searched for a newline
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line it finished
    pub fn feed(&mut self, chunk: &str) -> DecodeOutput {
        self.receive_buffer.push_str(chunk);

        let mut output = DecodeOutput::default();
        let mut consumed = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = self.receive_buffer[search_from..].find('\n') {
            let line_end = search_from + offset;
            let line = self.receive_buffer[consumed..line_end].trim();
            consumed = line_end + 1;
            search_from = consumed;

            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(line) {
                Ok(value) => output.messages.push(value),
                Err(e) => {
                    trace!("LineDecoder: rejected line ({} bytes): {}", line.len(), e);
                    output.errors.push(format!("{e}\n{line}"));
                }
            }
        }

        self.receive_buffer.drain(..consumed);
        self.scanned = self.receive_buffer.len();

        if self.receive_buffer.len() > MAX_BUFFERED_BYTES {
            output.errors.push(format!(
                "Line too large: {} bytes without newline (max: {})",
                self.receive_buffer.len(),
                MAX_BUFFERED_BYTES
            ));
            self.receive_buffer.clear();
            self.scanned = 0;
        }

        output
    }

    /// Bytes waiting for a terminating newline
    pub fn pending_len(&self) -> usize {
        self.receive_buffer.len()
    }
}
