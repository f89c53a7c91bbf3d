// state.rs: Target lifecycle states and the shared state cell.
//
// The state value and the "update observed" flag live under one mutex so
// readers always see them as a consistent pair. Every published update
// wakes all waiters through a condition variable.
//
// There is no transition table: backends report transitions and the target
// trusts them.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The lifecycle state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// Freshly constructed, nothing attached yet.
    Created,
    Initialized,
    /// Halted; memory, registers and breakpoints may be touched.
    Stopped,
    /// Executing; only `stop()` is accepted.
    Running,
    Synching,
    /// The controlled process or device is gone.
    Exited,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Created => write!(f, "created"),
            TargetState::Initialized => write!(f, "initialized"),
            TargetState::Stopped => write!(f, "stopped"),
            TargetState::Running => write!(f, "running"),
            TargetState::Synching => write!(f, "synching"),
            TargetState::Exited => write!(f, "exited"),
        }
    }
}

/// Snapshot of the synchronized pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateSnapshot {
    pub state: TargetState,
    /// False between a state-changing request and the next reported update.
    pub settled: bool,
}

/// How a blocking wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Stopped,
    Exited,
    TimedOut,
}

pub(crate) struct StateCell {
    inner: Mutex<StateSnapshot>,
    changed: Condvar,
}

impl StateCell {
    pub fn new(state: TargetState) -> Self {
        Self {
            inner: Mutex::new(StateSnapshot {
                state,
                settled: false,
            }),
            changed: Condvar::new(),
        }
    }

    // The snapshot is two Copy fields; a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, StateSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        *self.lock()
    }

    pub fn current(&self) -> TargetState {
        self.lock().state
    }

    /// Run `f` with the pair locked. Used by the guard to check the state
    /// and clear `settled` in one step.
    pub fn with<R>(&self, f: impl FnOnce(&mut StateSnapshot) -> R) -> R {
        f(&mut self.lock())
    }

    /// Record a reported state, mark the update as observed and wake every
    /// waiter. Returns the previous state.
    pub fn publish(&self, state: TargetState) -> TargetState {
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state;
            inner.state = state;
            inner.settled = true;
            previous
        };
        self.changed.notify_all();
        previous
    }

    /// Block until an observed update leaves the target stopped or exited.
    ///
    /// With a deadline, gives up once it passes.
    pub fn wait_for_stop(&self, deadline: Option<Instant>) -> WaitOutcome {
        let mut inner = self.lock();
        loop {
            if inner.settled {
                match inner.state {
                    TargetState::Stopped => return WaitOutcome::Stopped,
                    TargetState::Exited => return WaitOutcome::Exited,
                    _ => {}
                }
            }

            inner = match deadline {
                None => self
                    .changed
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    self.changed
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
