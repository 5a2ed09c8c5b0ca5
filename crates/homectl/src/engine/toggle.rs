//! Optimistic single-device toggles.
//!
//! A toggle moves `Idle -> Sending -> {Committed, RolledBack}`. While
//! `Sending`, a [`PendingIntent`] overrides the displayed state of the device
//! and locks its control; when the outcome is known the intent is dropped and
//! the display falls back to the registry.

use serde::Serialize;

use super::batch::FailureReason;

/// A toggle waiting for the remote answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub device_id: String,
    /// Target state shown while the command is in flight.
    pub requested: bool,
    /// State displayed before the toggle, restored on failure.
    pub original: bool,
}

/// Final state of a toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// The remote accepted the command and the registry was refreshed.
    Committed { device_id: String, on: bool },
    /// Nothing changed remotely; the display shows `restored` again.
    RolledBack {
        device_id: String,
        restored: bool,
        reason: FailureReason,
    },
}

impl ToggleOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ToggleOutcome::Committed { .. })
    }
}

impl std::fmt::Display for ToggleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToggleOutcome::Committed { device_id, on } => {
                write!(f, "{} is now {}", device_id, if *on { "on" } else { "off" })
            }
            ToggleOutcome::RolledBack {
                device_id, reason, ..
            } => write!(f, "Command for {} failed: {}", device_id, reason),
        }
    }
}

/// Reasons a toggle is refused before anything happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    #[error("a batch is running")]
    BatchInFlight,

    #[error("a command for {0} is already in flight")]
    AlreadyPending(String),

    #[error("unknown device {0}")]
    UnknownDevice(String),
}
