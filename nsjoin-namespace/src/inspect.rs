//! Namespace identity inspection via procfs

use std::collections::BTreeMap;
use std::path::Path;

use nsjoin_core::{Error, NamespaceType, Result};

/// Read the identity of a namespace reference, such as `net:[4026531840]`
///
/// # Errors
/// Returns error if the reference cannot be read.
pub fn namespace_id(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_link(path)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| Error::Resolution {
            message: format!("cannot read namespace reference \"{}\": {e}", path.display()),
        })
}

/// Namespaces a process is attached to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    ids: BTreeMap<NamespaceType, String>,
}

impl NamespaceInfo {
    /// Get the namespaces of the current process
    ///
    /// # Errors
    /// Returns error if reading namespace IDs fails
    pub fn current() -> Result<Self> {
        Self::for_pid(std::process::id())
    }

    /// Get namespace IDs for a specific PID
    ///
    /// Namespace types the kernel doesn't support are left out.
    ///
    /// # Errors
    /// Returns error if the process doesn't exist.
    pub fn for_pid(pid: u32) -> Result<Self> {
        let proc_dir = format!("/proc/{pid}/ns");
        if !Path::new(&proc_dir).is_dir() {
            return Err(Error::Resolution {
                message: format!("no namespaces for PID {pid}"),
            });
        }

        let ids = NamespaceType::ALL
            .iter()
            .filter_map(|&ns_type| {
                namespace_id(ns_type.proc_path(pid))
                    .ok()
                    .map(|id| (ns_type, id))
            })
            .collect();

        Ok(Self { ids })
    }

    /// Identity of one namespace type
    #[must_use]
    pub fn get(&self, ns_type: NamespaceType) -> Option<&str> {
        self.ids.get(&ns_type).map(String::as_str)
    }

    /// Namespace types in which two processes differ
    #[must_use]
    pub fn differences(&self, other: &Self) -> Vec<NamespaceType> {
        NamespaceType::ALL
            .into_iter()
            .filter(|&ns_type| self.get(ns_type) != other.get(ns_type))
            .collect()
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for (ns_type, id) in &self.ids {
            writeln!(f, "  {:<7} {id}", format!("{}:", ns_type.name().to_uppercase()))?;
        }
        Ok(())
    }
}
