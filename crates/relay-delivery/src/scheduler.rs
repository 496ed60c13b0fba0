use std::sync::Arc;
use std::time::Duration;

use relay_core::config::DeliveryConfig;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::buffer::{BufferReader, StreamStatus};
use crate::error::DeliveryError;
use crate::sink::ChunkSink;
use crate::split::{settled_chunks, split_markdown};

/// Lifecycle of one turn's delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Nothing has been written yet.
    AwaitingContent,
    /// The buffer is growing; only settled chunks may be sent.
    Streaming,
    /// Generation finished; the remaining chunks, tail included, are flushed.
    Draining,
    /// Every chunk of the final split was handed to the sink.
    Done,
    /// Generation gave up; the abort notice replaced any unsent output.
    Aborted,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done | TurnState::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentChunk {
    /// Position in the final split result.
    pub index: usize,
    pub message_id: String,
}

/// Outcome of a delivery run, returned once the turn is terminal.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub state: TurnState,
    pub sent: Vec<SentChunk>,
    /// Chunks the sink failed to deliver. They are not resent.
    pub failed: Vec<(usize, DeliveryError)>,
    pub abort_notice_id: Option<String>,
}

impl DeliveryReport {
    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.sent
            .iter()
            .map(|c| c.message_id.as_str())
            .chain(self.abort_notice_id.as_deref())
    }
}

/// Drives one turn: watches the output buffer, re-splits it as it grows and
/// hands settled chunks to the sink in order, at most one send per
/// `min_send_interval`.
pub struct DeliveryScheduler {
    reader: BufferReader,
    sink: Arc<dyn ChunkSink>,
    max_chunk_length: usize,
    min_send_interval: Duration,
    tick: Duration,
    abort_message: String,
    state: TurnState,
    next: usize,
    last_send: Option<Instant>,
}

impl DeliveryScheduler {
    pub fn new(reader: BufferReader, sink: Arc<dyn ChunkSink>, config: &DeliveryConfig) -> Self {
        Self {
            reader,
            sink,
            max_chunk_length: config.max_chunk_length.max(1),
            min_send_interval: config.min_send_interval(),
            tick: config.scheduler_tick(),
            abort_message: config.abort_message.clone(),
            state: TurnState::AwaitingContent,
            next: 0,
            last_send: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Run until the turn reaches `Done` or `Aborted`.
    ///
    /// A writer dropped without finishing is treated as finished.
    pub async fn run(mut self) -> DeliveryReport {
        let mut report = DeliveryReport {
            state: self.state,
            sent: Vec::new(),
            failed: Vec::new(),
            abort_notice_id: None,
        };
        let mut writer_gone = false;

        loop {
            let (text, mut status) = self.reader.inspect(|s| (s.text.clone(), s.status.clone()));
            if writer_gone && status == StreamStatus::Streaming {
                status = StreamStatus::Finished;
            }

            let chunks = match status {
                StreamStatus::Aborted { reason } => {
                    self.transition(TurnState::Aborted);
                    warn!(
                        reason = %reason,
                        sent = report.sent.len(),
                        "generation aborted, sending notice"
                    );
                    report.abort_notice_id = self.send_abort_notice().await;
                    break;
                }
                StreamStatus::Finished => {
                    if self.state != TurnState::Draining {
                        self.transition(TurnState::Draining);
                    }
                    split_markdown(&text, self.max_chunk_length)
                }
                StreamStatus::Streaming => {
                    if self.state == TurnState::AwaitingContent && !text.is_empty() {
                        self.transition(TurnState::Streaming);
                    }
                    settled_chunks(&text, self.max_chunk_length)
                }
            };
            let last_split = Instant::now();

            if let Some(chunk) = chunks.get(self.next) {
                if let Some(ready_at) = self.next_send_at() {
                    if Instant::now() < ready_at {
                        // Re-observe after the wait; an abort may have arrived.
                        sleep_until(ready_at).await;
                        continue;
                    }
                }
                let index = self.next;
                match self.sink.send_chunk(chunk).await {
                    Ok(message_id) => {
                        debug!(chunk = index, len = chunk.chars().count(), id = %message_id, "chunk sent");
                        report.sent.push(SentChunk { index, message_id });
                    }
                    Err(e) => {
                        warn!(chunk = index, error = %e, "chunk send failed, skipping");
                        report.failed.push((index, e));
                    }
                }
                self.next += 1;
                self.last_send = Some(Instant::now());
                continue;
            }

            if self.state == TurnState::Draining {
                self.transition(TurnState::Done);
                info!(sent = report.sent.len(), failed = report.failed.len(), "delivery complete");
                break;
            }

            if !self.reader.changed().await {
                writer_gone = true;
                continue;
            }
            // Coalesce bursts of appends into one re-split per tick.
            sleep_until(last_split + self.tick).await;
        }

        report.state = self.state;
        report
    }

    fn next_send_at(&self) -> Option<Instant> {
        self.last_send.map(|at| at + self.min_send_interval)
    }

    async fn send_abort_notice(&mut self) -> Option<String> {
        if let Some(ready_at) = self.next_send_at() {
            sleep_until(ready_at).await;
        }
        let result = self.sink.send_chunk(&self.abort_message).await;
        self.last_send = Some(Instant::now());
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "abort notice send failed");
                None
            }
        }
    }

    fn transition(&mut self, to: TurnState) {
        debug!(from = ?self.state, to = ?to, "delivery state");
        self.state = to;
    }
}
