//! Process launcher for re-executed children
//!
//! The coordinator never spawns processes itself. It describes the child
//! in a [`ChildSpec`] and hands it to a [`Launcher`]:
//! - [`SelfExec`] - Production, starts `/proc/self/exe`
//! - test launchers recording what would have been started

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Executable of the running process
pub const SELF_EXE: &str = "/proc/self/exe";

/// Everything needed to start a re-executed child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSpec {
    /// Action the child runs
    pub action: String,
    /// Executable to start, without arguments
    pub program: PathBuf,
    /// Inherited variables to remove
    pub env_remove: Vec<OsString>,
    /// Variables to set, applied in order after the removals
    pub env: Vec<(OsString, OsString)>,
    /// Whether a parameter is sent; otherwise stdin is `/dev/null`
    pub stdin: bool,
}

impl ChildSpec {
    /// Effective value of a variable set for the child, last one wins
    #[must_use]
    pub fn var(&self, name: impl AsRef<OsStr>) -> Option<&OsStr> {
        let name = name.as_ref();
        self.env
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_os_str())
    }

    /// Whether an inherited variable is removed
    #[must_use]
    pub fn removes(&self, name: impl AsRef<OsStr>) -> bool {
        let name = name.as_ref();
        self.env_remove.iter().any(|key| key == name)
    }
}

/// Trait for starting re-executed children
///
/// # Thread Safety
/// Implementations must be `Send + Sync`, as one context serves concurrent
/// runs.
pub trait Launcher: Send + Sync {
    /// Start a child as described by `spec`
    ///
    /// The child's stdout and stderr must be piped, and stdin too if
    /// `spec.stdin` is set.
    ///
    /// # Errors
    /// Returns error if the process cannot be started
    fn launch(&self, spec: &ChildSpec) -> io::Result<Child>;
}

/// Launcher starting a fresh copy of the running executable
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfExec;

impl Launcher for SelfExec {
    fn launch(&self, spec: &ChildSpec) -> io::Result<Child> {
        let mut command = Command::new(&spec.program);
        for name in &spec.env_remove {
            command.env_remove(name);
        }
        for (name, value) in &spec.env {
            command.env(name, value);
        }

        command
            .stdin(if spec.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command.spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ChildSpec {
        ChildSpec {
            action: "echo".to_string(),
            program: PathBuf::from("/bin/sh"),
            env_remove: vec!["nsjoin_net".into()],
            env: vec![
                ("FOO".into(), "1".into()),
                ("nsjoin_reexec_action".into(), "echo".into()),
                ("FOO".into(), "2".into()),
            ],
            stdin: false,
        }
    }

    #[test]
    fn test_spec_var_last_wins() {
        let spec = spec();
        assert_eq!(spec.var("FOO"), Some(OsStr::new("2")));
        assert_eq!(spec.var("BAR"), None);
        assert!(spec.removes("nsjoin_net"));
        assert!(!spec.removes("nsjoin_ipc"));
    }

    #[tokio::test]
    async fn test_self_exec_pipes() {
        let mut child = SelfExec.launch(&spec()).unwrap();
        assert!(child.stdin.is_none());
        assert!(child.stdout.is_some());
        assert!(child.stderr.is_some());

        // sh without a script reads /dev/null and exits
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }
}
