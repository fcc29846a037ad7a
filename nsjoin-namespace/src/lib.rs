//! Joining existing Linux namespaces
//!
//! This crate switches the current process into already existing
//! namespaces referenced by paths such as `/proc/1234/ns/net`:
//! - at startup, before `main`, as configured by `nsjoin_<type>` and
//!   `nsjoin_order` environment variables (see [`status`])
//! - on demand with [`enter`], for processes that are still single-threaded
//!
//! Linking this crate is enough to enable the startup switch. Programs must
//! check [`status`] early in `main` and decide whether to abort.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod bootstrap;
pub mod inspect;
pub mod resolver;
pub mod status;
pub mod switcher;

pub use inspect::{namespace_id, NamespaceInfo};
pub use resolver::{resolve, NamespaceOrder, NamespacePaths, PlannedSwitch, ResolveError, SwitchPlan};
pub use status::{status, NamespaceSwitchError};
pub use switcher::{enter, switch, SwitchError, SwitchStage};
