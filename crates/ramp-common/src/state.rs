//! Ramp lifecycle state machine.
//!
//! CONNECTING → WARMING_UP → RAMPING → STOPPED
//!
//! FAULTED is reachable from every non-terminal state. There is no
//! recovery path: a faulted ramp ends the process.

use crate::error::{RampError, RampResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle states of a ramp run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RampState {
    /// Opening the connection to the configuration service.
    #[default]
    Connecting,
    /// Connected; waiting out the warm-up delay.
    WarmingUp,
    /// Pushing elapsed values on every tick.
    Ramping,
    /// Shutdown observed; connection released.
    Stopped,
    /// Fatal error; the run is over.
    Faulted,
}

impl fmt::Display for RampState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::WarmingUp => write!(f, "WARMING_UP"),
            Self::Ramping => write!(f, "RAMPING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Faulted => write!(f, "FAULTED"),
        }
    }
}

impl RampState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RampState) -> bool {
        use RampState::{Connecting, Faulted, Ramping, Stopped, WarmingUp};

        matches!(
            (self, target),
            (Connecting, WarmingUp)
                | (WarmingUp, Ramping)
                | (Ramping, Stopped)
                | (Connecting | WarmingUp | Ramping, Faulted)
        )
    }

    /// Returns true once the run can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: RampState,
    previous: Option<RampState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in CONNECTING.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RampState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<RampState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`RampError::InvalidStateTransition`] if `target` is not reachable.
    pub fn transition(&mut self, target: RampState) -> RampResult<()> {
        if self.current.can_transition_to(target) {
            debug!(from = %self.current, to = %target, "State transition");
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            warn!(from = %self.current, to = %target, "Rejected state transition");
            Err(RampError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Move to FAULTED if not already terminal.
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(RampState::Faulted) {
            warn!(from = %self.current, "Entering FAULTED");
            self.previous = Some(self.current);
            self.current = RampState::Faulted;
            self.transition_count += 1;
        }
    }
}
