//! Output streaming for executions.
//!
//! Two layers: [`OutputStream`] is a single-channel writer that tags every
//! chunk with a fixed event type, and [`MultiStreamWriter`] owns one stream
//! per standard pipe plus a combined fan-in channel. Both are bounded and
//! drop events when a consumer falls behind, so a slow subscriber can never
//! stall the program under execution. Callers that need losslessness
//! register an inline handler instead of consuming the channel.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Kinds of stream events. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventType {
    /// Execution is about to begin.
    Start,
    /// A chunk of standard output.
    Stdout,
    /// A chunk of standard error.
    Stderr,
    /// Execution finished; carries the exit code.
    Complete,
    /// Execution failed below the process level.
    Error,
}

impl fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One delivery record of a streaming execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    /// Chunk payload for `stdout`/`stderr`; empty otherwise.
    pub data: String,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Exit code; set when `event_type` is `Complete`.
    pub exit_code: Option<i32>,
    /// Rendered error; set when `event_type` is `Error`.
    pub error: Option<String>,
}

impl StreamEvent {
    fn tagged(event_type: StreamEventType, data: String) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
            exit_code: None,
            error: None,
        }
    }

    /// The `start` marker.
    #[must_use]
    pub fn start() -> Self {
        Self::tagged(StreamEventType::Start, String::new())
    }

    /// A stdout chunk.
    #[must_use]
    pub fn stdout(data: impl Into<String>) -> Self {
        Self::tagged(StreamEventType::Stdout, data.into())
    }

    /// A stderr chunk.
    #[must_use]
    pub fn stderr(data: impl Into<String>) -> Self {
        Self::tagged(StreamEventType::Stderr, data.into())
    }

    /// The terminal `complete` marker.
    #[must_use]
    pub fn complete(exit_code: i32) -> Self {
        let mut event = Self::tagged(StreamEventType::Complete, String::new());
        event.exit_code = Some(exit_code);
        event
    }

    /// The terminal `error` marker.
    #[must_use]
    pub fn from_error(error: &dyn fmt::Display) -> Self {
        let mut event = Self::tagged(StreamEventType::Error, String::new());
        event.error = Some(error.to_string());
        event
    }

    /// Whether no further events follow this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            StreamEventType::Complete | StreamEventType::Error
        )
    }
}

/// Errors from the stream plumbing.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream was closed before the write.
    #[error("stream closed")]
    Closed,
    /// An inline handler rejected the event.
    #[error("stream handler failed: {0}")]
    Handler(String),
}

/// Callback receiving stream events as they occur.
pub type StreamHandler = Arc<dyn Fn(&StreamEvent) -> Result<(), StreamError> + Send + Sync>;

/// Writer that tags every chunk with one event type and fans it out.
///
/// Each write goes to a bounded channel (dropped when full) and to every
/// registered inline handler, synchronously and in registration order.
/// Writes after [`OutputStream::close`] fail with [`StreamError::Closed`];
/// close itself is idempotent.
pub struct OutputStream {
    event_type: StreamEventType,
    sender: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    receiver: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    handlers: RwLock<Vec<StreamHandler>>,
}

impl OutputStream {
    /// Create a stream with the given channel capacity.
    #[must_use]
    pub fn new(buffer_size: usize, event_type: StreamEventType) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        Self {
            event_type,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Write a chunk of bytes, tagged with this stream's event type.
    ///
    /// # Errors
    ///
    /// [`StreamError::Closed`] after close, or a handler error.
    pub fn write(&self, data: &[u8]) -> Result<usize, StreamError> {
        let event = StreamEvent::tagged(
            self.event_type,
            String::from_utf8_lossy(data).into_owned(),
        );
        self.write_event(event)?;
        Ok(data.len())
    }

    /// Push a pre-built event through the stream.
    ///
    /// The channel send is best-effort; inline handlers are invoked
    /// synchronously and may reject the event.
    pub fn write_event(&self, event: StreamEvent) -> Result<(), StreamError> {
        {
            let sender = self.sender.lock().unwrap();
            let Some(sender) = sender.as_ref() else {
                return Err(StreamError::Closed);
            };
            // Drop on full rather than blocking the producer.
            let _ = sender.try_send(event.clone());
        }

        let handlers = self.handlers.read().unwrap().clone();
        for handler in handlers {
            handler(&event)?;
        }
        Ok(())
    }

    /// Take the consuming end of the channel. Returns `None` after the
    /// first call.
    #[must_use]
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.receiver.lock().unwrap().take()
    }

    /// Register an inline handler, invoked synchronously on every write.
    pub fn on_event(&self, handler: StreamHandler) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Close the stream. Idempotent; subsequent writes fail.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Whether the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }
}

/// Combined stdout + stderr plumbing for one execution.
///
/// Owns an [`OutputStream`] per pipe and a fan-in channel of capacity
/// `2 * buffer_size` fed by two forwarder tasks. An adapter hands the
/// per-pipe writers to its backend process and callers consume the single
/// merged channel (or register an inline handler for lossless delivery).
pub struct MultiStreamWriter {
    stdout: Arc<OutputStream>,
    stderr: Arc<OutputStream>,
    sender: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    receiver: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
}

impl MultiStreamWriter {
    /// Create the writer pair and start the forwarder tasks.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let stdout = Arc::new(OutputStream::new(buffer_size, StreamEventType::Stdout));
        let stderr = Arc::new(OutputStream::new(buffer_size, StreamEventType::Stderr));
        let (sender, receiver) = mpsc::channel(buffer_size.max(1) * 2);

        for stream in [&stdout, &stderr] {
            if let Some(source) = stream.take_receiver() {
                tokio::spawn(Self::forward(source, sender.clone()));
            }
        }

        Self {
            stdout,
            stderr,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    async fn forward(mut source: mpsc::Receiver<StreamEvent>, sink: mpsc::Sender<StreamEvent>) {
        while let Some(event) = source.recv().await {
            // Same drop-on-full discipline as the per-pipe channels.
            let _ = sink.try_send(event);
        }
    }

    /// The stdout writer.
    #[must_use]
    pub fn stdout(&self) -> Arc<OutputStream> {
        Arc::clone(&self.stdout)
    }

    /// The stderr writer.
    #[must_use]
    pub fn stderr(&self) -> Arc<OutputStream> {
        Arc::clone(&self.stderr)
    }

    /// Take the consuming end of the combined channel. Returns `None` after
    /// the first call.
    #[must_use]
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.receiver.lock().unwrap().take()
    }

    /// Register a handler on both pipes so every chunk is seen regardless
    /// of source.
    pub fn on_event(&self, handler: StreamHandler) {
        self.stdout.on_event(Arc::clone(&handler));
        self.stderr.on_event(handler);
    }

    /// Close both pipes and the combined channel. Idempotent.
    pub fn close(&self) {
        self.stdout.close();
        self.stderr.close();
        self.sender.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn write_tags_chunks_and_feeds_channel() {
        let stream = OutputStream::new(8, StreamEventType::Stdout);
        let mut rx = stream.take_receiver().unwrap();

        stream.write(b"hello").unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, StreamEventType::Stdout);
        assert_eq!(event.data, "hello");
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let stream = OutputStream::new(2, StreamEventType::Stdout);
        let mut rx = stream.take_receiver().unwrap();

        for i in 0..10 {
            stream.write(format!("chunk-{i}").as_bytes()).unwrap();
        }
        stream.close();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn inline_handlers_see_every_chunk() {
        let stream = OutputStream::new(1, StreamEventType::Stderr);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        stream.on_event(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for _ in 0..5 {
            stream.write(b"x").unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let stream = OutputStream::new(4, StreamEventType::Stdout);
        stream.close();
        stream.close(); // idempotent

        assert!(matches!(
            stream.write(b"late"),
            Err(StreamError::Closed)
        ));
    }

    #[tokio::test]
    async fn multi_writer_merges_both_pipes() {
        let writer = MultiStreamWriter::new(16);
        let mut rx = writer.take_receiver().unwrap();

        writer.stdout().write(b"out").unwrap();
        writer.stderr().write(b"err").unwrap();
        writer.close();

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type);
        }
        kinds.sort_by_key(|k| format!("{k}"));
        assert_eq!(kinds, vec![StreamEventType::Stderr, StreamEventType::Stdout]);
    }

    #[tokio::test]
    async fn multi_writer_handler_sees_both_sources() {
        let writer = MultiStreamWriter::new(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        writer.on_event(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        writer.stdout().write(b"a").unwrap();
        writer.stderr().write(b"b").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
