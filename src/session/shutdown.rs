//! "Stop but wait for trailing tokens" grace-period policy.
//!
//! When the user stops, frames already sent may still produce final tokens,
//! so teardown is deferred behind a grace window. Every late final-token
//! batch restarts the window. The state machine here is pure; the session
//! actor owns the actual delayed task and feeds expirations back in with
//! the epoch they were armed under, which makes superseded timers inert.

use log::debug;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Active,
    PendingDisconnect,
    Done,
}

/// Grace timer armed under a specific epoch; an expiry only counts if its
/// epoch is still the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub epoch: u64,
    pub after: Duration,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: ShutdownPhase,
    grace: Duration,
    epoch: u64,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            phase: ShutdownPhase::Active,
            grace,
            epoch: 0,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase == ShutdownPhase::PendingDisconnect
    }

    /// User-initiated stop. Arms the grace timer on the first call; repeat
    /// stops while already pending arm nothing.
    pub fn request_stop(&mut self) -> Option<TimerArm> {
        match self.phase {
            ShutdownPhase::Active => {
                self.phase = ShutdownPhase::PendingDisconnect;
                Some(self.arm())
            }
            ShutdownPhase::PendingDisconnect | ShutdownPhase::Done => {
                debug!("stop while already pending, not arming a second timer");
                None
            }
        }
    }

    /// A final-token batch arrived while pending: restart the window so the
    /// backend gets a fresh grace period after every late delivery.
    pub fn on_final_words(&mut self) -> Option<TimerArm> {
        if self.phase == ShutdownPhase::PendingDisconnect {
            Some(self.arm())
        } else {
            None
        }
    }

    /// An armed timer fired. Returns true exactly once, and only for the
    /// most recently armed epoch.
    pub fn timer_expired(&mut self, epoch: u64) -> bool {
        if self.phase == ShutdownPhase::PendingDisconnect && epoch == self.epoch {
            self.phase = ShutdownPhase::Done;
            true
        } else {
            debug!("ignoring stale grace timer (epoch {})", epoch);
            false
        }
    }

    /// Teardown happened through another path (error, explicit disconnect);
    /// any outstanding timer becomes stale.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.phase = ShutdownPhase::Done;
    }

    fn arm(&mut self) -> TimerArm {
        self.epoch += 1;
        debug!("grace timer armed (epoch {})", self.epoch);
        TimerArm {
            epoch: self.epoch,
            after: self.grace,
        }
    }
}
