//! Joining existing namespaces with setns(2)
//!
//! Joining namespaces is only reliable while the process has a single
//! thread: the kernel refuses to switch a multi-threaded process into
//! another mount or user namespace, and other namespace types would only
//! apply to the calling thread.

use nix::errno::Errno;
use nix::sched::setns;
use std::fmt;
use std::path::Path;

use nsjoin_core::{Error, NamespaceRef, NamespaceType, Result};

use crate::resolver::{open_namespace, NamespacePaths, SwitchPlan};

/// Stage of a namespace switch that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStage {
    /// Opening the namespace path
    Open,
    /// Joining the opened namespace
    Join,
}

/// First failure of a switch sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchError<'a> {
    /// Namespace type that failed
    pub ns_type: NamespaceType,
    /// Path referencing the namespace
    pub path: &'a Path,
    /// What failed
    pub stage: SwitchStage,
    /// Reason
    pub errno: Errno,
}

impl fmt::Display for SwitchError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            SwitchStage::Open => write!(
                f,
                "invalid {} reference \"{}\": {}",
                self.ns_type,
                self.path.display(),
                self.errno
            ),
            SwitchStage::Join => write!(
                f,
                "cannot join {} to reference \"{}\": {}",
                self.ns_type,
                self.path.display(),
                self.errno
            ),
        }
    }
}

impl std::error::Error for SwitchError<'_> {}

impl From<SwitchError<'_>> for Error {
    fn from(err: SwitchError<'_>) -> Self {
        Self::Switch {
            ns_type: err.ns_type,
            message: err.to_string(),
        }
    }
}

/// Switch the calling process into the namespaces of a plan, in order
///
/// Paths not opened during resolution are opened right before their
/// switch, so they resolve against the mount namespace in effect at that
/// point. Each descriptor is closed as soon as its namespace was joined.
/// The sequence stops at the first failure; switches already done are not
/// undone.
///
/// Returns the number of namespaces joined. Does not log, allocate, or
/// panic, so it is usable before `main`.
///
/// # Errors
/// Returns the first open or `setns(2)` failure.
pub fn switch(plan: SwitchPlan<'_>) -> std::result::Result<usize, SwitchError<'_>> {
    let mut joined = 0;

    for step in plan {
        let fd = match step.handle {
            Some(fd) => fd,
            None => open_namespace(step.path).map_err(|errno| SwitchError {
                ns_type: step.ns_type,
                path: step.path,
                stage: SwitchStage::Open,
                errno,
            })?,
        };

        setns(&fd, step.ns_type.clone_flags()).map_err(|errno| SwitchError {
            ns_type: step.ns_type,
            path: step.path,
            stage: SwitchStage::Join,
            errno,
        })?;
        drop(fd);
        joined += 1;
    }

    Ok(joined)
}

/// Switch the calling process into the referenced namespaces
///
/// References are joined in the given order. The caller must be
/// single-threaded; otherwise re-execute with `nsjoin-reexec` instead.
///
/// # Errors
/// Returns error on duplicate types, unopenable paths, or failing joins.
pub fn enter(refs: &[NamespaceRef]) -> Result<()> {
    let paths = NamespacePaths::from_refs(refs)?;
    let plan = paths.resolve()?;

    tracing::info!(
        order = paths.order().unwrap_or_default(),
        "Joining namespaces"
    );

    let joined = switch(plan).map_err(|e| {
        tracing::error!(
            namespace = %e.ns_type,
            path = %e.path.display(),
            error = %e.errno,
            "Failed to join namespace"
        );
        Error::from(e)
    })?;

    tracing::debug!(joined, "Namespaces joined");
    Ok(())
}
