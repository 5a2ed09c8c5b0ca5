use std::fmt;

use serde::Serialize;

use super::command::Intent;
use crate::remote::RemoteError;

/// Why a single command did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The device has no command for the intent. Nothing was sent.
    Unresolvable,
    /// The remote answered with a non-2xx status.
    Rejected(u16),
    /// The request never got an answer.
    Transport(String),
    TimedOut,
}

impl From<RemoteError> for FailureReason {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout => FailureReason::TimedOut,
            e => match e.status() {
                Some(code) => FailureReason::Rejected(code),
                None => FailureReason::Transport(e.to_string()),
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unresolvable => f.write_str("no matching command"),
            FailureReason::Rejected(code) => write!(f, "refused ({})", code),
            FailureReason::Transport(e) => write!(f, "transport error: {}", e),
            FailureReason::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFailure {
    pub device_id: String,
    pub reason: FailureReason,
}

/// Accounting of one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub intent: Intent,
    pub succeeded: usize,
    pub total: usize,
    pub failures: Vec<CommandFailure>,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} commands executed", self.succeeded, self.total)?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.device_id, failure.reason)?;
        }
        Ok(())
    }
}

/// Reasons a batch is refused before any command is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("select at least one device")]
    EmptySelection,

    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("a toggle on {0} is still in flight")]
    TogglePending(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_remote_error() {
        assert_eq!(
            FailureReason::from(RemoteError::Status(503)),
            FailureReason::Rejected(503)
        );
        assert_eq!(
            FailureReason::from(RemoteError::Unauthorized),
            FailureReason::Rejected(401)
        );
        assert_eq!(
            FailureReason::from(RemoteError::Timeout),
            FailureReason::TimedOut
        );
        assert!(matches!(
            FailureReason::from(RemoteError::NoHouse),
            FailureReason::Transport(_)
        ));
    }

    #[test]
    fn test_report_display() {
        let report = BatchReport {
            intent: Intent::Off,
            succeeded: 2,
            total: 4,
            failures: vec![
                CommandFailure {
                    device_id: "Sensor".to_string(),
                    reason: FailureReason::Unresolvable,
                },
                CommandFailure {
                    device_id: "Garage".to_string(),
                    reason: FailureReason::Rejected(500),
                },
            ],
        };

        insta::assert_snapshot!(report.to_string(), @r"
        2/4 commands executed
          Sensor: no matching command
          Garage: refused (500)
        ");
    }
}
