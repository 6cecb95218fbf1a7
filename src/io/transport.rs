//! Transport layer - byte streams to text chunks and back
//!
//! Writes outbound lines to the child's stdin from a dedicated task, and turns
//! the child's stdout/stderr into UTF-8 text chunks without ever splitting a
//! multi-byte character. Message boundaries are not this layer's concern.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for pipe reads
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Error types for stdio transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,
}

// ============================================================================
// Outbound
// ============================================================================

/// Write side of the child's stdio
///
/// `send` never blocks: lines are queued and written in order by a background
/// task. Once a write fails the queue closes and later sends report
/// `Disconnected`.
#[derive(Debug)]
pub struct StdioTransport {
    stdin_sender: Option<mpsc::UnboundedSender<String>>,
}

impl StdioTransport {
    pub fn new(stdin: BoxedWriter) -> Self {
        let (stdin_sender, stdin_receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::stdin_writer_task(stdin, stdin_receiver));

        Self {
            stdin_sender: Some(stdin_sender),
        }
    }

    /// Queue one already-framed message
    pub fn send(&self, message: String) -> Result<(), TransportError> {
        let sender = self
            .stdin_sender
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(message)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Stop accepting messages; stdin is closed once the queue drains
    pub fn close(&mut self) {
        self.stdin_sender.take();
    }

    pub fn is_connected(&self) -> bool {
        self.stdin_sender
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Background task that writes messages to stdin
    async fn stdin_writer_task(
        mut stdin: BoxedWriter,
        mut receiver: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(message) = receiver.recv().await {
            trace!(
                "StdioTransport: Writing message (length: {})",
                message.len()
            );

            if let Err(e) = stdin.write_all(message.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }

            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        let _ = stdin.shutdown().await;
        trace!("StdioTransport: stdin writer task finished");
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Byte accumulation for a reader task
struct Utf8ReaderState {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl Utf8ReaderState {
    fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix of the buffer
    ///
    /// Invalid sequences (as opposed to incomplete ones) are replaced with
    /// U+FFFD so a misbehaving child cannot wedge the stream.
    fn extract_text(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }

        match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => {
                let bytes: Vec<u8> = self.byte_buffer.drain(..).collect();
                String::from_utf8(bytes).ok()
            }
            Err(e) => match e.error_len() {
                // Incomplete sequence at the end: wait for the rest
                None if e.valid_up_to() == 0 => None,
                None => {
                    let bytes: Vec<u8> = self.byte_buffer.drain(..e.valid_up_to()).collect();
                    String::from_utf8(bytes).ok()
                }
                Some(invalid_len) => {
                    let end = e.valid_up_to() + invalid_len;
                    let bytes: Vec<u8> = self.byte_buffer.drain(..end).collect();
                    Some(String::from_utf8_lossy(&bytes).into_owned())
                }
            },
        }
    }

    fn should_compact(&self) -> bool {
        self.byte_buffer.capacity() > self.buffer_capacity * 2
    }

    fn compact(&mut self) {
        if self.should_compact() {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }
}

/// Read `reader` to EOF on a background task, yielding UTF-8 text chunks
///
/// The receiver closes at EOF or on a read error. Dropping the receiver stops
/// the task at its next chunk.
pub fn spawn_text_reader(reader: BoxedReader, stream: &'static str) -> mpsc::UnboundedReceiver<String> {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(text_reader_task(reader, sender, stream));
    receiver
}

async fn text_reader_task(
    reader: BoxedReader,
    sender: mpsc::UnboundedSender<String>,
    stream: &'static str,
) {
    let mut reader = BufReader::new(reader);
    let mut state = Utf8ReaderState::new();
    let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

    loop {
        match reader.read(read_buffer.as_mut()).await {
            Ok(0) => {
                handle_eof(&mut state, &sender, stream);
                break;
            }
            Ok(n) => {
                state.add_bytes(&read_buffer[..n]);

                while let Some(text) = state.extract_text() {
                    if sender.send(text).is_err() {
                        trace!("Transport: {} receiver dropped, stopping reader", stream);
                        return;
                    }
                }

                state.compact();
            }
            Err(e) => {
                error!("Failed to read from {}: {}", stream, e);
                break;
            }
        }
    }

    trace!("Transport: {} reader task finished", stream);
}

/// Flush what is left at EOF; a truncated trailing character is lossy-decoded
fn handle_eof(state: &mut Utf8ReaderState, sender: &mpsc::UnboundedSender<String>, stream: &str) {
    trace!("Transport: {} reached EOF", stream);

    while let Some(text) = state.extract_text() {
        if sender.send(text).is_err() {
            return;
        }
    }

    if !state.byte_buffer.is_empty() {
        error!(
            "Transport: {} incomplete bytes remaining at {} EOF: {:?}",
            state.byte_buffer.len(),
            stream,
            state.byte_buffer
        );
        let tail = String::from_utf8_lossy(&state.byte_buffer).into_owned();
        state.byte_buffer.clear();
        let _ = sender.send(tail);
    }
}

// ============================================================================
// Tests
// ============================================================================
