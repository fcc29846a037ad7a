//! Running actions in a re-executed copy of the current process
//!
//! Joining mount or user namespaces requires a single-threaded process.
//! Once a program has started threads, the way to get a namespace switch
//! done is to restart the program as a child that joins the namespaces
//! before `main` (see `nsjoin-namespace`) and then runs one registered
//! action.
//!
//! A program using this crate:
//! 1. registers its actions in a [`ReexecContext`]
//! 2. calls [`ReexecContext::check_action`] first thing in `main`
//! 3. runs actions with [`ReexecContext::action`]
//!
//! Actions exchange data with the parent using the [`child`] helpers.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod action;
pub mod child;
pub mod context;
mod decode;
pub mod launcher;

pub use action::{ReexecAction, GRACE_PERIOD};
pub use context::{ReexecContext, Role};
pub use launcher::{ChildSpec, Launcher, SelfExec};

// Re-export commonly used types
pub use nsjoin_core::{Error, NamespaceRef, NamespaceType, Result};
pub use nsjoin_namespace::{status, NamespaceSwitchError};
