use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::AppError;

struct TrackerState {
    active: bool,
    started_at: Option<Instant>,
    cancel: Option<CancellationToken>,
    // Incremented on every acquire so a stale guard from a taken-over run
    // cannot release its successor's slot.
    generation: u64,
}

/// In-process gate enforcing at-most-one active orchestrator run.
///
/// Constructed exactly once at bootstrap and handed to the orchestrator; the
/// process-wide property comes from that single construction, not from any
/// global. A run older than `timeout` is treated as dead and the slot
/// reclaimed, so a hung run cannot wedge the scheduler forever.
pub struct RunTracker {
    timeout: Duration,
    state: Mutex<TrackerState>,
}

impl RunTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(TrackerState {
                active: false,
                started_at: None,
                cancel: None,
                generation: 0,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a live (non-expired) run holds the slot. Expired holders are
    /// cleared as a side effect.
    pub fn is_active(&self) -> bool {
        let mut state = self.state.lock();
        if state.active {
            let expired = state
                .started_at
                .map(|t| t.elapsed() > self.timeout)
                .unwrap_or(true);
            if expired {
                warn!(
                    "⏰ Run tracker held past {}s timeout, reclaiming slot",
                    self.timeout.as_secs()
                );
                state.active = false;
                state.started_at = None;
                state.cancel = None;
            }
        }
        state.active
    }

    /// Atomically claim the slot. The returned guard releases it on drop,
    /// whatever exit path the run takes.
    pub fn try_acquire(self: Arc<Self>) -> Result<RunGuard, AppError> {
        let mut state = self.state.lock();
        if state.active {
            let expired = state
                .started_at
                .map(|t| t.elapsed() > self.timeout)
                .unwrap_or(true);
            if !expired {
                return Err(AppError::AlreadyRunning);
            }
            warn!("⏰ Previous run exceeded the tracker timeout, taking over");
        }

        let cancel = CancellationToken::new();
        state.active = true;
        state.started_at = Some(Instant::now());
        state.cancel = Some(cancel.clone());
        state.generation += 1;

        let generation = state.generation;
        drop(state);

        Ok(RunGuard {
            tracker: self,
            generation,
            cancel,
        })
    }

    /// Signal the active run to stop cooperatively. Returns false when no
    /// run holds the slot.
    pub fn cancel_active(&self) -> bool {
        let state = self.state.lock();
        match (&state.cancel, state.active) {
            (Some(token), true) => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn release(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.active = false;
        state.started_at = None;
        state.cancel = None;
    }
}

/// Holds the tracker slot for the lifetime of one run.
pub struct RunGuard {
    tracker: Arc<RunTracker>,
    generation: u64,
    pub cancel: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.tracker.release(self.generation);
    }
}
