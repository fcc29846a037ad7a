//! nsjoin Core - Namespace types, environment encoding, and errors
//!
//! This crate provides the vocabulary shared by the namespace switcher and
//! the re-execution coordinator.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod env;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::ReexecEvent;
pub use types::{NamespaceRef, NamespaceType, OrderToken};
