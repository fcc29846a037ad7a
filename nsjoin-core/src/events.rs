//! Re-execution lifecycle events with structured tracing

use std::fmt;
use std::time::Duration;

/// Events emitted while supervising a re-executed child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReexecEvent {
    /// Child copy of this process started
    Spawned {
        /// Action run by the child
        action: String,
        /// Child process ID
        pid: Option<u32>,
        /// Number of namespaces the child switches into
        namespaces: usize,
    },

    /// Parameter written to the child's stdin
    ParamSent {
        /// Action run by the child
        action: String,
        /// Encoded size in bytes
        bytes: usize,
    },

    /// Result decoding finished, successfully or not
    ResultDecoded {
        /// Action run by the child
        action: String,
        /// Whether a value was decoded
        ok: bool,
    },

    /// Child did not exit within the grace period and was killed
    Killed {
        /// Action run by the child
        action: String,
        /// Grace period that expired
        grace: Duration,
    },

    /// Child exited on its own
    Exited {
        /// Action run by the child
        action: String,
        /// Exit code, `None` if terminated by a signal
        exit_code: Option<i32>,
    },

    /// Child wrote to its stderr
    Stderr {
        /// Action run by the child
        action: String,
        /// Diagnostic text
        message: String,
    },
}

impl ReexecEvent {
    /// Get the action name from any event
    #[must_use]
    pub fn action(&self) -> &str {
        match self {
            Self::Spawned { action, .. }
            | Self::ParamSent { action, .. }
            | Self::ResultDecoded { action, .. }
            | Self::Killed { action, .. }
            | Self::Exited { action, .. }
            | Self::Stderr { action, .. } => action,
        }
    }

    /// Check if this event signals a child problem
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        match self {
            Self::ResultDecoded { ok, .. } => !*ok,
            Self::Exited { exit_code, .. } => !matches!(exit_code, Some(0)),
            Self::Stderr { .. } => true,
            _ => false,
        }
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Spawned {
                action,
                pid,
                namespaces,
            } => {
                tracing::info!(
                    action = %action,
                    pid = ?pid,
                    namespaces,
                    event = "spawned",
                    "Re-executed child started"
                );
            }
            Self::ParamSent { action, bytes } => {
                tracing::debug!(
                    action = %action,
                    bytes,
                    event = "param_sent",
                    "Parameter sent"
                );
            }
            Self::ResultDecoded { action, ok } => {
                tracing::debug!(
                    action = %action,
                    ok,
                    event = "result_decoded",
                    "Result decoding finished"
                );
            }
            Self::Killed { action, grace } => {
                tracing::warn!(
                    action = %action,
                    grace_ms = grace.as_millis(),
                    event = "killed",
                    "Child still running after grace period, killed"
                );
            }
            Self::Exited { action, exit_code } => {
                tracing::info!(
                    action = %action,
                    exit_code = ?exit_code,
                    event = "exited",
                    "Re-executed child exited"
                );
            }
            Self::Stderr { action, message } => {
                tracing::error!(
                    action = %action,
                    message = %message,
                    event = "stderr",
                    "Re-executed child reported failure"
                );
            }
        }
    }
}

impl fmt::Display for ReexecEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawned { action, pid, .. } => match pid {
                Some(pid) => write!(f, "Action {action} started as PID {pid}"),
                None => write!(f, "Action {action} started"),
            },
            Self::ParamSent { action, bytes } => {
                write!(f, "Action {action} received {bytes} parameter bytes")
            }
            Self::ResultDecoded { action, ok } => {
                if *ok {
                    write!(f, "Action {action} result decoded")
                } else {
                    write!(f, "Action {action} result undecodable")
                }
            }
            Self::Killed { action, grace } => {
                write!(f, "Action {action} killed after {grace:?}")
            }
            Self::Exited { action, exit_code } => match exit_code {
                Some(code) => write!(f, "Action {action} exited with code {code}"),
                None => write!(f, "Action {action} terminated by signal"),
            },
            Self::Stderr { action, message } => {
                write!(f, "Action {action} error: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_action() {
        let event = ReexecEvent::ParamSent {
            action: "echo".to_string(),
            bytes: 7,
        };
        assert_eq!(event.action(), "echo");
    }

    #[test]
    fn test_event_failure() {
        let event = ReexecEvent::Exited {
            action: "echo".to_string(),
            exit_code: Some(0),
        };
        assert!(!event.is_failure());

        let event = ReexecEvent::Exited {
            action: "echo".to_string(),
            exit_code: None,
        };
        assert!(event.is_failure());

        let event = ReexecEvent::Killed {
            action: "sleepy".to_string(),
            grace: Duration::from_secs(1),
        };
        assert!(!event.is_failure());
    }

    #[test]
    fn test_event_display() {
        let event = ReexecEvent::Exited {
            action: "echo".to_string(),
            exit_code: Some(3),
        };
        assert_eq!(event.to_string(), "Action echo exited with code 3");
    }
}
