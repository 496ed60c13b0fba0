use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::sink::ChunkSink;

/// Handle to a running typing-indicator loop.
///
/// Call `stop()` once the turn is terminal. Dropping the handle also stops
/// the loop.
pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    /// Spawn the typing loop: notify immediately, then every `interval`.
    pub fn start(sink: Arc<dyn ChunkSink>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                sink.notify_typing().await;
                tokio::time::sleep(interval).await;
            }
        });
        TypingHandle(handle)
    }

    /// Show the indicator while `work` runs: notify before polling it, then
    /// every `interval` until it completes.
    pub async fn during<F: Future>(sink: Arc<dyn ChunkSink>, interval: Duration, work: F) -> F::Output {
        sink.notify_typing().await;
        let handle = TypingHandle(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sink.notify_typing().await;
            }
        }));
        let output = work.await;
        handle.stop();
        output
    }

    /// Abort the typing indicator loop.
    pub fn stop(self) {
        self.0.abort();
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
