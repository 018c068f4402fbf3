//! Background work that repeats on a fixed period until cancelled.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A spawned loop calling `tick` every `period`. The first call happens one
/// period after start. Cancelling lets an in-flight tick finish.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn start<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            tracing::info!(task = name, "periodic task stopped");
        });
        Self { name, shutdown, handle }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn cancel(&self) { self.shutdown.cancel(); }

    pub fn is_cancelled(&self) -> bool { self.shutdown.is_cancelled() }

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }

    /// Waits for the loop to exit without cancelling it.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(task = self.name, error = %e, "periodic task panicked");
        }
    }

    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::start("counter", Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(task.name(), "counter");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!task.is_cancelled());
        task.shutdown().await;

        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 2, "ticked {seen} times");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::start("idle", Duration::from_secs(3600), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        task.cancel();
        assert!(task.is_cancelled());
        task.join().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
