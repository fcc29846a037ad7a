//! Error types for nsjoin

use thiserror::Error;

use crate::NamespaceType;

/// nsjoin error types
///
/// Programming errors in the embedding application (re-executing without
/// the entry check, re-executing from a child, unregistered actions) are
/// not represented here: they panic.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ordering or namespace references could not be resolved
    #[error("cannot resolve namespaces: {message}")]
    Resolution {
        /// Error message
        message: String,
    },

    /// Opening or joining a namespace failed
    #[error("cannot switch {ns_type} namespace: {message}")]
    Switch {
        /// Namespace type being switched
        ns_type: NamespaceType,
        /// Error message
        message: String,
    },

    /// The copy of this process could not be started
    #[error("cannot restart a copy of this process: {source}")]
    Spawn {
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The parameter could not be encoded or sent to the child
    #[error("cannot send parameter to child: {source}")]
    ParamEncode {
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The child wrote something to stderr
    #[error("child failed with stderr message {stderr:?}")]
    ChildFailed {
        /// Everything the child wrote to stderr
        stderr: String,
    },

    /// The child's stdout did not hold a valid result
    #[error("cannot decode child result: {source}")]
    ResultDecode {
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The child terminated unsuccessfully without a diagnostic
    #[error("child exited unsuccessfully: {status}")]
    ChildExit {
        /// Exit status reported by `wait(2)`
        status: std::process::ExitStatus,
    },

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this error came from the re-executed child rather than from
    /// preparing or supervising it
    #[must_use]
    pub const fn is_child_error(&self) -> bool {
        matches!(
            self,
            Self::ChildFailed { .. } | Self::ResultDecode { .. } | Self::ChildExit { .. }
        )
    }
}

/// Result type alias for nsjoin operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_failed_quotes_stderr() {
        let err = Error::ChildFailed {
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.to_string(), "child failed with stderr message \"boom\\n\"");
        assert!(err.is_child_error());
    }

    #[test]
    fn test_switch_message() {
        let err = Error::Switch {
            ns_type: NamespaceType::Net,
            message: "invalid reference".to_string(),
        };
        assert_eq!(err.to_string(), "cannot switch net namespace: invalid reference");
        assert!(!err.is_child_error());
    }

    #[test]
    fn test_errno_reaches_callers_as_io_error() {
        let eperm = nix::errno::Errno::EPERM as i32;
        let err = Error::from(std::io::Error::from_raw_os_error(eperm));
        assert!(matches!(err, Error::Io(ref e) if e.raw_os_error() == Some(eperm)));
        assert!(!err.is_child_error());
    }

    #[test]
    fn test_result_decode_from_serde() {
        let source = serde_json::from_str::<String>("42").unwrap_err();
        let err = Error::ResultDecode { source };
        assert!(err.to_string().starts_with("cannot decode child result"));
    }
}
