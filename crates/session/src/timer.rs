//! Cancellable scheduled tasks.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A spawned timer that stops when cancelled or dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    cancel: CancellationToken,
}

impl ScheduledTask {
    /// Run `action` once after `delay`.
    pub fn after<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => action(),
            }
        });
        Self { cancel }
    }

    /// Run `action` every `period`, first after one full period. Stops when
    /// `action` returns `false`.
    pub fn every<F>(period: Duration, mut action: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.child_token();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        if !action() {
                            break;
                        }
                    }
                }
            }
        });
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
