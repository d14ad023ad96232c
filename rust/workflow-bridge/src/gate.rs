//! One-shot terminal gate.
//!
//! The bridge parks its calling thread on a [`Gate`] until a terminal engine
//! callback opens it. Opening is split in two steps so that exactly one
//! terminal path runs its side effects:
//!
//! 1. [`Gate::claim`] - the first caller wins the right to terminate the run.
//! 2. [`Gate::open`] - after recording its side effects, the winner wakes the waiter.
//!
//! Waiters only ever observe `unset` or `set`. Everything the opening thread
//! wrote before [`Gate::open`] is visible to the waiter once it wakes.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// Which terminal path ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The engine reported normal completion.
    Completed,
    /// The engine surfaced an unhandled workflow failure.
    Failed,
    /// The engine refused to start.
    StartFailed,
    /// The engine aborted the instance and the abort policy releases the gate.
    Aborted,
    /// The configured wait timeout elapsed first.
    TimedOut,
}

impl Termination {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::StartFailed => "start_failed",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Unset,
    Claimed(Termination),
    Set(Termination),
}

/// Set-once signal guarding the end of a run.
#[derive(Debug)]
pub struct Gate {
    state: Mutex<GateState>,
    opened: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Create an unset gate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Unset),
            opened: Condvar::new(),
        }
    }

    /// Claim the gate for a terminal path.
    ///
    /// Returns `false` when another path already claimed (or set) it; the
    /// caller must then skip its terminal side effects.
    pub fn claim(&self, termination: Termination) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Unset {
            *state = GateState::Claimed(termination);
            true
        } else {
            false
        }
    }

    /// Open a claimed gate and wake the waiter.
    ///
    /// Opening an unclaimed or already open gate does nothing.
    pub fn open(&self) {
        let mut state = self.state.lock();
        if let GateState::Claimed(termination) = *state {
            *state = GateState::Set(termination);
            self.opened.notify_all();
        }
    }

    /// Claim and open in one step. Returns whether this call set the gate.
    pub fn set(&self, termination: Termination) -> bool {
        let mut state = self.state.lock();
        if *state == GateState::Unset {
            *state = GateState::Set(termination);
            self.opened.notify_all();
            true
        } else {
            false
        }
    }

    /// Whether the gate has been opened.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(*self.state.lock(), GateState::Set(_))
    }

    /// The termination that claimed the gate, if any.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        match *self.state.lock() {
            GateState::Unset => None,
            GateState::Claimed(t) | GateState::Set(t) => Some(t),
        }
    }

    /// Block until the gate is set.
    pub fn wait(&self) -> Termination {
        let mut state = self.state.lock();
        loop {
            if let GateState::Set(termination) = *state {
                return termination;
            }
            self.opened.wait(&mut state);
        }
    }

    /// Block until the gate is set or `timeout` elapses.
    ///
    /// A gate that is claimed but not yet open counts as not set.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Termination> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let GateState::Set(termination) = *state {
                return Some(termination);
            }
            if self.opened.wait_until(&mut state, deadline).timed_out() {
                return match *state {
                    GateState::Set(termination) => Some(termination),
                    _ => None,
                };
            }
        }
    }
}
