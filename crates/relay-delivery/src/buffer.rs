//! Append-only response buffer shared between the generation loop (writer)
//! and the delivery scheduler (reader).
//!
//! Backed by a `tokio::sync::watch` channel: every append wakes the reader,
//! and the reader always sees the latest full text.

use tokio::sync::watch;

/// Lifecycle of the upstream stream feeding a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// More text may still arrive.
    Streaming,
    /// Generation completed; the text is final.
    Finished,
    /// Generation gave up; unsent text must be discarded.
    Aborted { reason: String },
}

#[derive(Debug)]
pub struct BufferState {
    pub text: String,
    pub status: StreamStatus,
}

/// Create a connected writer/reader pair for one turn.
pub fn output_buffer() -> (BufferWriter, BufferReader) {
    let (tx, rx) = watch::channel(BufferState {
        text: String::new(),
        status: StreamStatus::Streaming,
    });
    (BufferWriter { tx }, BufferReader { rx })
}

/// Producer half. Appends are ignored once the stream is finished or aborted.
#[derive(Debug)]
pub struct BufferWriter {
    tx: watch::Sender<BufferState>,
}

impl BufferWriter {
    pub fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.tx.send_if_modified(|state| {
            if state.status != StreamStatus::Streaming {
                return false;
            }
            state.text.push_str(text);
            true
        });
    }

    /// Append `text` as a standalone block, separated from whatever precedes
    /// and follows it by blank lines.
    pub fn append_block(&self, text: &str) {
        self.append(&format!("\n\n{}\n\n", text.trim()));
    }

    pub fn finish(&self) {
        self.set_status(StreamStatus::Finished);
    }

    pub fn abort(&self, reason: impl Into<String>) {
        self.set_status(StreamStatus::Aborted {
            reason: reason.into(),
        });
    }

    /// Copy of the text written so far.
    pub fn snapshot(&self) -> String {
        self.tx.borrow().text.clone()
    }

    fn set_status(&self, status: StreamStatus) {
        self.tx.send_if_modified(|state| {
            if state.status != StreamStatus::Streaming {
                return false;
            }
            state.status = status;
            true
        });
    }
}

/// Consumer half, owned by the delivery scheduler.
#[derive(Debug)]
pub struct BufferReader {
    rx: watch::Receiver<BufferState>,
}

impl BufferReader {
    /// Run `f` over the current state and mark it as seen.
    ///
    /// The writer is blocked while `f` runs, so keep it short and never await
    /// inside it.
    pub fn inspect<R>(&mut self, f: impl FnOnce(&BufferState) -> R) -> R {
        let state = self.rx.borrow_and_update();
        f(&state)
    }

    /// Wait for the next change. Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
