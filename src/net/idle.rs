//! Per-connection read-idle timer.
//!
//! # Responsibilities
//! - Start a deadline when the connection is created
//! - Push the deadline out on every inbound read
//! - Fire at most once per silence interval
//! - Be cancelled when the connection closes, whatever the cause
//!
//! # Design Decisions
//! - One deadline per connection; the connection driver sleeps on it with
//!   `tokio::time`, which is backed by the runtime's timer wheel
//! - The handle is shared between the idle stage (resets/cancels) and the
//!   connection driver (schedules/fires), hence `Arc<Mutex<_>>`
//! - Only the read direction is timed

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct TimerState {
    timeout: Duration,
    deadline: Instant,
    fired: bool,
    cancelled: bool,
}

/// Shared read-idle timer for one connection.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    state: Arc<Mutex<TimerState>>,
}

impl IdleTimer {
    /// Start a timer that expires `timeout` from now.
    pub fn start(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState {
                timeout,
                deadline: Instant::now() + timeout,
                fired: false,
                cancelled: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        // The state is plain data; a panic while holding the lock cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record inbound activity: the deadline becomes `now + timeout`.
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.cancelled {
            return;
        }
        state.deadline = Instant::now() + state.timeout;
        state.fired = false;
    }

    /// The instant the driver should wake at, or `None` once fired or cancelled.
    pub fn deadline(&self) -> Option<Instant> {
        let state = self.lock();
        if state.fired || state.cancelled {
            None
        } else {
            Some(state.deadline)
        }
    }

    /// Returns `true` exactly once per silence interval, when `now` has reached
    /// the deadline and no reset happened in between.
    pub fn try_fire(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if state.fired || state.cancelled || now < state.deadline {
            return false;
        }
        state.fired = true;
        true
    }

    /// Stop the timer for good. Later resets are ignored.
    pub fn cancel(&self) {
        self.lock().cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }
}
