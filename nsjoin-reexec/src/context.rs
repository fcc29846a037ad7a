//! Action registry and entry check
//!
//! A program registers its actions, then runs the entry check at the very
//! start of `main`. In a re-executed child, the entry check runs the
//! requested action and exits; in the original process, it enables
//! re-execution and returns.
//!
//! # Example
//! ```no_run
//! use nsjoin_reexec::{child, ReexecContext};
//!
//! let context = ReexecContext::new();
//! context.register("hostname", || {
//!     let name = std::fs::read_to_string("/proc/sys/kernel/hostname").unwrap_or_default();
//!     let _ = child::reply(name.trim());
//! });
//! context.check_action();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use nsjoin_core::env::ACTION_VAR;

use crate::action::ReexecAction;
use crate::launcher::{Launcher, SelfExec};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Which side of a re-execution the current process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    /// The entry check has not run
    Uninitialized = 0,
    /// Original process, may re-execute itself
    Parent = 1,
    /// Re-executed child running an action
    Child = 2,
}

impl Role {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Parent,
            2 => Self::Child,
            _ => Self::Uninitialized,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Parent => "parent",
            Self::Child => "child",
        };
        write!(f, "{name}")
    }
}

/// Registered actions plus the entry check state of this process
///
/// Create one per program, register every action, and call
/// [`check_action`](Self::check_action) before doing anything else,
/// including installing a tracing subscriber that writes to stderr.
pub struct ReexecContext {
    actions: RwLock<HashMap<String, Callback>>,
    role: AtomicU8,
    launcher: Box<dyn Launcher>,
}

impl ReexecContext {
    /// Create a context re-executing `/proc/self/exe`
    #[must_use]
    pub fn new() -> Self {
        Self::with_launcher(SelfExec)
    }

    /// Create a context starting children through `launcher`
    #[must_use]
    pub fn with_launcher(launcher: impl Launcher + 'static) -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            role: AtomicU8::new(Role::Uninitialized as u8),
            launcher: Box::new(launcher),
        }
    }

    /// Register an action under a unique name
    ///
    /// Must happen before the entry check.
    ///
    /// # Panics
    /// Panics if an action with this name is already registered.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let mut actions = self.actions.write().unwrap_or_else(PoisonError::into_inner);
        assert!(
            !actions.contains_key(&name),
            "re-execution action {name:?} registered twice"
        );
        actions.insert(name, Arc::new(callback));
    }

    /// Check if an action is registered
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Run the action requested by the parent, if any
    ///
    /// Returns `false` in the original process, which may re-execute
    /// itself from now on. In a re-executed child, runs the action and
    /// returns `true`. If switching namespaces at startup failed, the
    /// child writes the failure to stderr and exits with code 1 instead.
    ///
    /// Only the first call decides the role; later calls report it.
    ///
    /// # Panics
    /// Panics if the requested action is not registered.
    pub fn run_action(&self) -> bool {
        let marker = std::env::var_os(ACTION_VAR)
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string_lossy().into_owned());
        self.enter(marker.as_deref())
    }

    /// Run the action requested by the parent and exit, if any
    ///
    /// Returns only in the original process.
    ///
    /// # Panics
    /// Panics if the requested action is not registered.
    pub fn check_action(&self) {
        if self.run_action() {
            let _ = std::io::stdout().flush();
            std::process::exit(0);
        }
    }

    /// Role of this process
    #[must_use]
    pub fn role(&self) -> Role {
        Role::from_u8(self.role.load(Ordering::Acquire))
    }

    /// Check if this process is a re-executed child
    #[must_use]
    pub fn is_reexecuted_child(&self) -> bool {
        self.role() == Role::Child
    }

    /// Prepare running a registered action in a re-executed child
    pub fn action(&self, name: impl Into<String>) -> ReexecAction<'_> {
        ReexecAction::new(self, name.into())
    }

    pub(crate) fn launcher(&self) -> &dyn Launcher {
        self.launcher.as_ref()
    }

    pub(crate) fn set_role(&self, role: Role) {
        self.role.store(role as u8, Ordering::Release);
    }

    fn callback(&self, name: &str) -> Option<Callback> {
        self.actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn enter(&self, marker: Option<&str>) -> bool {
        let role = self.role();
        if role != Role::Uninitialized {
            return role == Role::Child;
        }

        let Some(name) = marker else {
            self.set_role(Role::Parent);
            return false;
        };

        let Some(callback) = self.callback(name) else {
            panic!("unregistered re-execution action {name:?}");
        };

        if let Err(e) = nsjoin_namespace::status() {
            let _ = writeln!(std::io::stderr(), "{e}");
            std::process::exit(1);
        }

        self.set_role(Role::Child);
        tracing::debug!(action = name, "Running re-execution action");
        callback();
        true
    }
}

impl Default for ReexecContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReexecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = actions.keys().collect();
        names.sort();
        f.debug_struct("ReexecContext")
            .field("actions", &names)
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_new_context_is_uninitialized() {
        let context = ReexecContext::new();
        assert_eq!(context.role(), Role::Uninitialized);
        assert!(!context.is_reexecuted_child());
    }

    #[test]
    fn test_register() {
        let context = ReexecContext::new();
        context.register("echo", || {});
        assert!(context.is_registered("echo"));
        assert!(!context.is_registered("other"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_register_twice() {
        let context = ReexecContext::new();
        context.register("echo", || {});
        context.register("echo", || {});
    }

    #[test]
    fn test_no_marker_becomes_parent() {
        let context = ReexecContext::new();
        assert!(!context.enter(None));
        assert_eq!(context.role(), Role::Parent);
    }

    #[test]
    fn test_marker_runs_action() {
        let runs = Arc::new(AtomicUsize::new(0));
        let context = ReexecContext::new();
        let counter = Arc::clone(&runs);
        context.register("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(context.enter(Some("count")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(context.is_reexecuted_child());

        // The role is decided once
        assert!(context.enter(Some("count")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "unregistered re-execution action \"missing\"")]
    fn test_marker_unregistered() {
        let context = ReexecContext::new();
        context.register("echo", || {});
        context.enter(Some("missing"));
    }

    #[test]
    fn test_debug_lists_actions() {
        let context = ReexecContext::new();
        context.register("b", || {});
        context.register("a", || {});
        let debug = format!("{context:?}");
        assert!(debug.contains("[\"a\", \"b\"]"));
        assert!(debug.contains("Uninitialized"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Parent.to_string(), "parent");
        assert_eq!(Role::from_u8(Role::Child as u8), Role::Child);
    }
}
