//! Controller state types.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Where the controller is in its tick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Waiting for the timer or a trigger.
    Idle,
    /// Executing the rotation stages.
    Running,
    /// Last tick succeeded; outcome being reported.
    Succeeded,
    /// Last tick failed; outcome being reported.
    Failed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// Atomic wrapper for controller state.
#[derive(Debug)]
pub struct AtomicControllerState(AtomicU32);

impl AtomicControllerState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ControllerState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ControllerState {
        match self.0.load(Ordering::SeqCst) {
            0 => ControllerState::Idle,
            1 => ControllerState::Running,
            2 => ControllerState::Succeeded,
            _ => ControllerState::Failed,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: ControllerState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }
}

impl Default for AtomicControllerState {
    fn default() -> Self {
        Self::new(ControllerState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_state_discriminants() {
        assert_eq!(ControllerState::Idle as u32, 0);
        assert_eq!(ControllerState::Running as u32, 1);
        assert_eq!(ControllerState::Succeeded as u32, 2);
        assert_eq!(ControllerState::Failed as u32, 3);
    }

    #[test]
    fn test_atomic_controller_state() {
        let state = AtomicControllerState::default();
        assert_eq!(state.load(), ControllerState::Idle);

        for next in [
            ControllerState::Running,
            ControllerState::Failed,
            ControllerState::Succeeded,
            ControllerState::Idle,
        ] {
            state.store(next);
            assert_eq!(state.load(), next);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ControllerState::Running.to_string(), "running");
    }
}
