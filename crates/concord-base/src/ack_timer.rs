//! Background acknowledgement timer.
//!
//! A tokio task that fires its job after the configured interval with
//! random jitter. [`AckTimer::bump`] restarts the wait (write activity
//! postpones the ack), [`AckTimer::asap`] fires immediately. The job
//! returns `false` to stop the timer, typically when the base it holds
//! a weak reference to is gone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct AckTimer {
    bump: Arc<Notify>,
    asap: Arc<Notify>,
    task: JoinHandle<()>,
}

impl AckTimer {
    /// Starts the timer task. Must be called inside a tokio runtime.
    pub fn start<F, Fut>(interval: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let bump = Arc::new(Notify::new());
        let asap = Arc::new(Notify::new());
        let task = {
            let bump = bump.clone();
            let asap = asap.clone();
            tokio::spawn(async move {
                loop {
                    let delay = jittered(interval);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = asap.notified() => {}
                        _ = bump.notified() => continue,
                    }
                    if !job().await {
                        tracing::debug!("ack timer stopped");
                        break;
                    }
                }
            })
        };
        tracing::debug!(interval_ms = interval.as_millis() as u64, "ack timer started");
        Self { bump, asap, task }
    }

    /// Restarts the current wait.
    pub fn bump(&self) {
        self.bump.notify_one();
    }

    /// Fires without waiting for the interval.
    pub fn asap(&self) {
        self.asap.notify_one();
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AckTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `interval` scaled by a random factor in [0.75, 1.25].
fn jittered(interval: Duration) -> Duration {
    let millis = interval.as_millis() as u64;
    if millis < 4 {
        return interval;
    }
    let spread = millis / 4;
    let offset = rand::thread_rng().gen_range(0..=2 * spread);
    Duration::from_millis(millis - spread + offset)
}
