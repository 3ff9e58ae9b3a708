//! Cadence ticker (§4.10, C10). Every source file under `original_source/`
//! open-codes `while True: work(); sleep(max(0, period - elapsed))`; this
//! factors that pattern into one utility shared by all pipelines, with a
//! cancellation token observed at the tick boundary so a shutdown signal is
//! honoured within one cycle (§5).

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Skew-correcting ticker: measures how long the previous cycle's work took
/// and sleeps only the remainder of `period`, so the pipeline keeps its
/// nominal cadence even when individual cycles run long (it never sleeps a
/// negative duration, and it never tries to "catch up" by skipping sleeps).
pub struct Ticker {
    period: Duration,
    cancel: CancellationToken,
    label: &'static str,
}

impl Ticker {
    pub fn new(period: Duration, cancel: CancellationToken, label: &'static str) -> Self {
        Self {
            period,
            cancel,
            label,
        }
    }

    /// Returns `true` once per tick until cancellation is observed, in which
    /// case it returns `false` and the caller's loop should exit.
    pub async fn tick(&self, cycle_start: Instant) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let elapsed = cycle_start.elapsed();
        let remaining = self.period.checked_sub(elapsed).unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            log::warn!(
                "[{}] cycle took {:?}, overran period {:?} - skipping sleep",
                self.label,
                elapsed,
                self.period
            );
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = sleep(remaining) => {}
            _ = self.cancel.cancelled() => return false,
        }
        !self.cancel.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Drive `body` at `period` until `cancel` fires. `body` receives the instant
/// the cycle started, in case it wants to log or budget its own elapsed time.
pub async fn run_cadenced<F, Fut>(
    period: Duration,
    cancel: CancellationToken,
    label: &'static str,
    mut body: F,
) where
    F: FnMut(Instant) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let ticker = Ticker::new(period, cancel.clone(), label);
    while !cancel.is_cancelled() {
        let cycle_start = Instant::now();
        body(cycle_start).await;
        if !ticker.tick(cycle_start).await {
            break;
        }
    }
    log::info!("[{label}] pipeline stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn stops_promptly_on_cancellation() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(run_cadenced(
            Duration::from_millis(10),
            cancel_clone,
            "test",
            move |_| {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overrun_cycle_does_not_sleep_negative() {
        let ticker = Ticker::new(Duration::from_millis(1), CancellationToken::new(), "test");
        let start = Instant::now() - Duration::from_millis(100);
        // Should return promptly (no panic on duration underflow).
        assert!(ticker.tick(start).await);
    }
}
