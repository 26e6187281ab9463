//! Exponential backoff for background reconnect loops.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Doubling delay with a cap. `reset()` after a success.
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Returns the current delay and doubles the next one.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Sleeps for `delay` unless cancelled first.
///
/// Returns `false` if the token fired, in which case the caller should
/// stop its loop.
pub(crate) async fn sleep_or_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
