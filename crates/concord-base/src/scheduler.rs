//! Single-flight async scheduler.
//!
//! [`Debounce::trigger`] starts a run of the job on a tokio task when none
//! is active. Triggers that arrive while a run is active are folded into
//! exactly one rerun after it. Each trigger returns a [`Ticket`] that
//! [`Debounce::wait`] resolves once a run started after the trigger has
//! finished.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Run number that satisfies one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    queued: bool,
    /// Runs started so far.
    started: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RunState>,
    /// Runs finished so far.
    finished: watch::Sender<u64>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the current run finished. Returns whether a queued rerun
    /// starts now.
    fn finish_run(&self) -> bool {
        let mut state = self.state();
        self.finished.send_replace(state.started);
        if state.queued {
            state.queued = false;
            state.started += 1;
            true
        } else {
            state.running = false;
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct Debounce {
    shared: Arc<Shared>,
}

impl Debounce {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::default()),
                finished,
            }),
        }
    }

    /// Requests a run of `job`. Must be called inside a tokio runtime.
    pub fn trigger<F, Fut>(&self, job: F) -> Ticket
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.shared.state();
        if state.running {
            state.queued = true;
            return Ticket(state.started + 1);
        }
        state.running = true;
        state.started += 1;
        let ticket = Ticket(state.started);
        drop(state);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                job().await;
                if !shared.finish_run() {
                    break;
                }
            }
        });
        ticket
    }

    /// Resolves once the run satisfying `ticket` has finished.
    pub async fn wait(&self, ticket: Ticket) {
        let mut finished = self.shared.finished.subscribe();
        // The sender lives as long as `self`.
        let _ = finished.wait_for(|done| *done >= ticket.0).await;
    }

    /// Resolves once no run is active or queued.
    pub async fn idle(&self) {
        let target = {
            let state = self.shared.state();
            if !state.running {
                return;
            }
            state.started + u64::from(state.queued)
        };
        self.wait(Ticket(target)).await;
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new()
    }
}
