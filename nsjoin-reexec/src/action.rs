//! Running an action in a re-executed child
//!
//! The child is a fresh copy of the running executable. It learns what to
//! do from its environment: the namespaces to join at startup and the
//! action name. The optional parameter goes to its stdin, the result comes
//! back on its stdout, and anything on its stderr is a failure.

use std::ffi::OsString;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::time::timeout;

use nsjoin_core::env::ACTION_VAR;
use nsjoin_core::{Error, NamespaceRef, NamespaceType, ReexecEvent, Result};
use nsjoin_namespace::NamespacePaths;

use crate::context::{ReexecContext, Role};
use crate::decode::decode_result;
use crate::launcher::{ChildSpec, SELF_EXE};

/// Time a child may keep running after its result was decoded
pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Builder for one run of a registered action in a re-executed child
///
/// # Example
/// ```no_run
/// use nsjoin_core::{NamespaceRef, NamespaceType};
/// use nsjoin_reexec::ReexecContext;
///
/// # async fn example(context: &ReexecContext) -> nsjoin_core::Result<()> {
/// let hostname: String = context
///     .action("hostname")
///     .namespace(NamespaceRef::of_process(NamespaceType::Uts, 1234))
///     .run_with_result()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "the action does nothing until run"]
pub struct ReexecAction<'a> {
    context: &'a ReexecContext,
    name: String,
    namespaces: Vec<NamespaceRef>,
    param: Option<serde_json::Result<Vec<u8>>>,
    env: Vec<(OsString, OsString)>,
}

impl<'a> ReexecAction<'a> {
    pub(crate) const fn new(context: &'a ReexecContext, name: String) -> Self {
        Self {
            context,
            name,
            namespaces: Vec::new(),
            param: None,
            env: Vec::new(),
        }
    }

    /// Join these namespaces in the child, in the given order
    pub fn namespaces(mut self, refs: impl IntoIterator<Item = NamespaceRef>) -> Self {
        self.namespaces.extend(refs);
        self
    }

    /// Join one more namespace in the child
    pub fn namespace(mut self, ns: NamespaceRef) -> Self {
        self.namespaces.push(ns);
        self
    }

    /// Send a parameter to the child's stdin
    ///
    /// Encoding errors are reported when the action is run.
    pub fn param<T: Serialize + ?Sized>(mut self, param: &T) -> Self {
        self.param = Some(serde_json::to_vec(param).map(|mut bytes| {
            bytes.push(b'\n');
            bytes
        }));
        self
    }

    /// Set an additional environment variable for the child
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set additional environment variables for the child
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Run the action, ignoring its stdout
    ///
    /// # Errors
    /// Returns error if the child cannot be started or fails, see
    /// [`run_with_result`](Self::run_with_result).
    ///
    /// # Panics
    /// Panics if re-execution is not enabled in this process or the action
    /// is not registered.
    pub async fn run(self) -> Result<()> {
        self.execute::<()>(false).await.map(|_| ())
    }

    /// Run the action and decode one JSON value from its stdout
    ///
    /// # Errors
    /// In order of precedence:
    /// - [`Error::ChildFailed`] if the child wrote to stderr
    /// - [`Error::ParamEncode`] if the parameter could not be sent
    /// - [`Error::ResultDecode`] if stdout held no value of type `R`
    /// - [`Error::ChildExit`] if the child exited unsuccessfully
    ///
    /// Errors preparing the child ([`Error::Resolution`], [`Error::Spawn`])
    /// are returned before it runs. A child killed after the grace period
    /// is not an error by itself.
    ///
    /// # Panics
    /// Panics if re-execution is not enabled in this process or the action
    /// is not registered.
    pub async fn run_with_result<R: DeserializeOwned>(self) -> Result<R> {
        self.execute::<R>(true)
            .await?
            .ok_or_else(|| Error::ResultDecode {
                source: serde::de::Error::custom("no result decoded"),
            })
    }

    /// Blocking [`run`](Self::run) on a private runtime
    ///
    /// # Errors
    /// See [`run`](Self::run).
    ///
    /// # Panics
    /// Panics when called from within an async runtime, and see
    /// [`run`](Self::run).
    pub fn run_blocking(self) -> Result<()> {
        current_thread_runtime()?.block_on(self.run())
    }

    /// Blocking [`run_with_result`](Self::run_with_result) on a private runtime
    ///
    /// # Errors
    /// See [`run_with_result`](Self::run_with_result).
    ///
    /// # Panics
    /// Panics when called from within an async runtime, and see
    /// [`run_with_result`](Self::run_with_result).
    pub fn run_blocking_with_result<R: DeserializeOwned>(self) -> Result<R> {
        current_thread_runtime()?.block_on(self.run_with_result())
    }

    fn check_preconditions(&self) {
        match self.context.role() {
            Role::Parent => {}
            Role::Uninitialized => panic!(
                "re-execution not enabled: run the entry check at the start of main \
                 before running action {:?}",
                self.name
            ),
            Role::Child => panic!(
                "tried to re-execute action {:?} from within a re-executed child",
                self.name
            ),
        }
        assert!(
            self.context.is_registered(&self.name),
            "unregistered re-execution action {:?}",
            self.name
        );
    }

    fn child_spec(&self, paths: &NamespacePaths, stdin: bool) -> ChildSpec {
        let mut env = self.env.clone();
        env.extend(
            paths
                .env_vars()
                .into_iter()
                .map(|(name, value)| (OsString::from(name), value)),
        );
        env.push((ACTION_VAR.into(), self.name.clone().into()));

        ChildSpec {
            action: self.name.clone(),
            program: SELF_EXE.into(),
            env_remove: NamespaceType::ALL
                .iter()
                .map(|ns_type| ns_type.env_var().into())
                .collect(),
            env,
            stdin,
        }
    }

    async fn execute<R: DeserializeOwned>(mut self, want_result: bool) -> Result<Option<R>> {
        self.check_preconditions();

        let paths = NamespacePaths::from_refs(&self.namespaces)?;
        let param = self
            .param
            .take()
            .transpose()
            .map_err(|e| Error::ParamEncode { source: e.into() })?;

        let spec = self.child_spec(&paths, param.is_some());
        tracing::debug!(
            action = %self.name,
            order = paths.order().unwrap_or_default(),
            extra_env = self.env.len(),
            "Re-executing"
        );
        let mut child = self
            .context
            .launcher()
            .launch(&spec)
            .map_err(|source| Error::Spawn { source })?;

        ReexecEvent::Spawned {
            action: self.name.clone(),
            pid: child.id(),
            namespaces: self.namespaces.len(),
        }
        .emit_trace();

        let outcome = supervise::<R>(&self.name, &mut child, param, want_result).await?;
        outcome.classify(&self.name)
    }
}

/// What happened to one child, before deciding on the error to report
struct ChildOutcome<R> {
    status: ExitStatus,
    killed: bool,
    stderr: Vec<u8>,
    param_error: Option<io::Error>,
    result: Option<serde_json::Result<R>>,
}

impl<R> ChildOutcome<R> {
    fn classify(self, action: &str) -> Result<Option<R>> {
        if !self.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&self.stderr).into_owned();
            ReexecEvent::Stderr {
                action: action.to_string(),
                message: stderr.trim_end().to_string(),
            }
            .emit_trace();
            return Err(Error::ChildFailed { stderr });
        }

        if let Some(source) = self.param_error {
            return Err(Error::ParamEncode { source });
        }

        let value = match self.result {
            Some(Ok(value)) => Some(value),
            Some(Err(source)) => return Err(Error::ResultDecode { source }),
            None => None,
        };

        if !self.killed && !self.status.success() {
            return Err(Error::ChildExit {
                status: self.status,
            });
        }

        Ok(value)
    }
}

/// Exchange data with a running child and wait for it to end
///
/// Returns only after the child was reaped and its stderr reached end of
/// stream.
async fn supervise<R: DeserializeOwned>(
    action: &str,
    child: &mut Child,
    param: Option<Vec<u8>>,
    want_result: bool,
) -> Result<ChildOutcome<R>> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Io(missing_pipe("stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Io(missing_pipe("stderr")))?;
    let stderr_task = tokio::spawn(read_to_end(stderr));

    let param_error = match (param, child.stdin.take()) {
        (Some(bytes), Some(stdin)) => match send_param(stdin, &bytes).await {
            Ok(()) => {
                ReexecEvent::ParamSent {
                    action: action.to_string(),
                    bytes: bytes.len(),
                }
                .emit_trace();
                None
            }
            Err(e) => Some(e),
        },
        (Some(_), None) => Some(missing_pipe("stdin")),
        (None, _) => None,
    };

    let result = if param_error.is_some() {
        None
    } else if want_result {
        let result = decode_result::<R, _>(&mut stdout).await?;
        ReexecEvent::ResultDecoded {
            action: action.to_string(),
            ok: result.is_ok(),
        }
        .emit_trace();
        Some(result)
    } else {
        // One value ends the exchange even unread, so a lingering child
        // still gets killed after the grace period
        let _ = decode_result::<IgnoredAny, _>(&mut stdout).await?;
        None
    };

    // stdout stays open until the child is gone, so late writes block
    // instead of failing
    let (status, killed) = match timeout(GRACE_PERIOD, child.wait()).await {
        Ok(status) => (status?, false),
        Err(_) => {
            child.kill().await?;
            ReexecEvent::Killed {
                action: action.to_string(),
                grace: GRACE_PERIOD,
            }
            .emit_trace();
            (child.wait().await?, true)
        }
    };
    drop(stdout);

    if !killed {
        ReexecEvent::Exited {
            action: action.to_string(),
            exit_code: status.code(),
        }
        .emit_trace();
    }

    let stderr = stderr_task.await??;

    Ok(ChildOutcome {
        status,
        killed,
        stderr,
        param_error,
        result,
    })
}

/// Write the encoded parameter and close stdin
async fn send_param(mut stdin: ChildStdin, bytes: &[u8]) -> io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

async fn read_to_end<S: AsyncRead + Unpin>(mut reader: S) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("child {name} is not piped"),
    )
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
