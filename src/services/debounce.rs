// Debouncer
// Coalesces bursts of calls: each new call cancels the pending one, and only
// the last call in a burst runs after the quiet period.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Debouncer {
    delay: Duration,
    current: Mutex<Option<CancellationToken>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: Mutex::new(None),
        }
    }

    /// Wait out the delay, then run `task`. Returns `None` when a newer call
    /// superseded this one before or while `task` was running.
    pub async fn run<F, Fut, T>(&self, task: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(self.delay) => {}
        }

        tokio::select! {
            _ = token.cancelled() => None,
            out = task() => Some(out),
        }
    }

    /// Abandon any pending call.
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }
}
