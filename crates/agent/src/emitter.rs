//! Event sinks and the per-run emitter.
//!
//! The emitter stamps every event with the run's ids and a timestamp that
//! never goes backwards, and it refuses to send anything after a terminal
//! event. A closed sink means the client went away; the loop treats that as
//! cancellation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use infrapilot_core::error::{Error, Result};
use infrapilot_core::tool::ToolResult;
use tokio::sync::mpsc;

use crate::events::RunEvent;

/// Where run events go.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event; fails with [`Error::Cancelled`] once the receiver is gone.
    async fn send(&self, event: RunEvent) -> Result<()>;

    /// Whether the receiver has gone away.
    fn is_closed(&self) -> bool;
}

/// Sink backed by a bounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RunEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: RunEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Cancelled("client disconnected".into()))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn send(&self, event: RunEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Internal("event buffer poisoned".into()))?
            .push(event);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Split `text` into pieces of at most `size` characters.
///
/// Boundaries always fall between characters, so multi-byte code points are
/// never split. A `size` of zero is treated as one.
pub fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            chunks.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Emits the events of one run.
pub struct RunEmitter {
    sink: Arc<dyn EventSink>,
    run_id: String,
    thread_id: String,
    message_id: String,
    chunk_size: usize,
    last_timestamp: i64,
    finished: bool,
}

impl RunEmitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            sink,
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            chunk_size,
            last_timestamp: 0,
            finished: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether a terminal event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the client has gone away.
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    fn next_timestamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }

    async fn emit(&mut self, event: RunEvent) -> Result<()> {
        if self.finished {
            return Err(Error::Internal(format!(
                "run {} already ended, dropping {}",
                self.run_id,
                event.event_type()
            )));
        }
        if event.is_terminal() {
            self.finished = true;
        }
        self.sink.send(event).await
    }

    pub async fn run_started(&mut self) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            timestamp,
        })
        .await
    }

    pub async fn message_started(&mut self) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::MessageStarted {
            message_id: self.message_id.clone(),
            role: "assistant".into(),
            timestamp,
        })
        .await
    }

    pub async fn tool_result(&mut self, tool_call_id: &str, tool_name: &str, result: &ToolResult) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::ToolResultEvent {
            message_id: self.message_id.clone(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result: result.clone(),
            timestamp,
        })
        .await
    }

    /// Stream `text` as content chunks.
    pub async fn content(&mut self, text: &str) -> Result<()> {
        for delta in chunk_text(text, self.chunk_size) {
            let timestamp = self.next_timestamp();
            self.emit(RunEvent::MessageContentChunk {
                message_id: self.message_id.clone(),
                delta: delta.to_string(),
                timestamp,
            })
            .await?;
        }
        Ok(())
    }

    pub async fn message_ended(&mut self) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::MessageEnded {
            message_id: self.message_id.clone(),
            timestamp,
        })
        .await
    }

    pub async fn run_finished(&mut self) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::RunFinished {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            timestamp,
        })
        .await
    }

    pub async fn run_error(&mut self, message: impl Into<String>) -> Result<()> {
        let timestamp = self.next_timestamp();
        self.emit(RunEvent::RunError {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            message: message.into(),
            timestamp,
        })
        .await
    }
}
