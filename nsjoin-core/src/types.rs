//! Core type definitions with strong typing and validation

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::env::EARLY_MARKER;
use crate::{Error, Result};

/// Type of a Linux kernel namespace that can be joined with `setns(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// Cgroup root directory
    Cgroup,
    /// System V IPC and POSIX message queues
    Ipc,
    /// Mount table
    Mnt,
    /// Network stack
    Net,
    /// Process IDs; only affects children created afterwards
    Pid,
    /// User and group IDs, capabilities
    User,
    /// Hostname and NIS domain name
    Uts,
}

impl NamespaceType {
    /// Number of supported namespace types
    pub const COUNT: usize = 7;

    /// All supported namespace types
    pub const ALL: [Self; Self::COUNT] = [
        Self::Cgroup,
        Self::Ipc,
        Self::Mnt,
        Self::Net,
        Self::Pid,
        Self::User,
        Self::Uts,
    ];

    /// Symbolic name, as used in `/proc/[pid]/ns/` and in order tokens
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Mnt => "mnt",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::User => "user",
            Self::Uts => "uts",
        }
    }

    /// Look up a type by its symbolic name
    ///
    /// Besides the canonical names, `mount` and `network` are accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cgroup" => Some(Self::Cgroup),
            "ipc" => Some(Self::Ipc),
            "mnt" | "mount" => Some(Self::Mnt),
            "net" | "network" => Some(Self::Net),
            "pid" => Some(Self::Pid),
            "user" => Some(Self::User),
            "uts" => Some(Self::Uts),
            _ => None,
        }
    }

    /// Clone flag identifying this type to `setns(2)`
    #[must_use]
    pub const fn clone_flags(self) -> CloneFlags {
        match self {
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }

    /// Name of the environment variable carrying this type's path
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Cgroup => "nsjoin_cgroup",
            Self::Ipc => "nsjoin_ipc",
            Self::Mnt => "nsjoin_mnt",
            Self::Net => "nsjoin_net",
            Self::Pid => "nsjoin_pid",
            Self::User => "nsjoin_user",
            Self::Uts => "nsjoin_uts",
        }
    }

    /// Same as [`env_var`](Self::env_var), NUL-terminated for `getenv(3)`
    #[must_use]
    pub const fn env_var_cstr(self) -> &'static CStr {
        match self {
            Self::Cgroup => c"nsjoin_cgroup",
            Self::Ipc => c"nsjoin_ipc",
            Self::Mnt => c"nsjoin_mnt",
            Self::Net => c"nsjoin_net",
            Self::Pid => c"nsjoin_pid",
            Self::User => c"nsjoin_user",
            Self::Uts => c"nsjoin_uts",
        }
    }

    /// Whether joining changes the calling process itself
    ///
    /// Joining a PID namespace never moves the caller; only children
    /// forked afterwards end up in it.
    #[must_use]
    pub const fn affects_caller(self) -> bool {
        !matches!(self, Self::Pid)
    }

    /// Dense index in `0..COUNT`, in [`ALL`](Self::ALL) order
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Path of this namespace for a given process in procfs
    #[must_use]
    pub fn proc_path(self, pid: u32) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.name()))
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamespaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::Resolution {
            message: format!("unknown namespace type \"{s}\""),
        })
    }
}

/// One element of a namespace ordering list, such as `net` or `!mnt`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderToken {
    /// Namespace type
    pub ns_type: NamespaceType,
    /// Open the path before the first switch of the sequence
    pub resolve_early: bool,
}

impl OrderToken {
    /// Parse a single token; `None` if the type name is unknown
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (name, resolve_early) = match token.strip_prefix(EARLY_MARKER) {
            Some(name) => (name, true),
            None => (token, false),
        };
        NamespaceType::from_name(name).map(|ns_type| Self {
            ns_type,
            resolve_early,
        })
    }
}

impl fmt::Display for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resolve_early {
            write!(f, "{EARLY_MARKER}")?;
        }
        f.write_str(self.ns_type.name())
    }
}

/// Reference to an existing namespace in the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespaceRef {
    /// Namespace type
    pub ns_type: NamespaceType,
    /// Path referencing the namespace, such as `/proc/1234/ns/net`
    pub path: PathBuf,
    /// Open the path before any namespace switch takes place
    #[serde(default)]
    pub resolve_early: bool,
}

impl NamespaceRef {
    /// Reference whose path is opened right before it gets joined
    #[must_use]
    pub fn new(ns_type: NamespaceType, path: impl Into<PathBuf>) -> Self {
        Self {
            ns_type,
            path: path.into(),
            resolve_early: false,
        }
    }

    /// Reference whose path is opened before the first switch
    #[must_use]
    pub fn early(ns_type: NamespaceType, path: impl Into<PathBuf>) -> Self {
        Self {
            resolve_early: true,
            ..Self::new(ns_type, path)
        }
    }

    /// Reference to the namespace of the given type used by process `pid`
    #[must_use]
    pub fn of_process(ns_type: NamespaceType, pid: u32) -> Self {
        Self::new(ns_type, ns_type.proc_path(pid))
    }

    /// Path as a [`Path`]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Order token describing this reference
    #[must_use]
    pub const fn token(&self) -> OrderToken {
        OrderToken {
            ns_type: self.ns_type,
            resolve_early: self.resolve_early,
        }
    }
}

impl fmt::Display for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.token(), self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for ns_type in NamespaceType::ALL {
            assert_eq!(NamespaceType::from_name(ns_type.name()), Some(ns_type));
            assert_eq!(ns_type.to_string().parse::<NamespaceType>().unwrap(), ns_type);
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(NamespaceType::from_name("mount"), Some(NamespaceType::Mnt));
        assert_eq!(NamespaceType::from_name("network"), Some(NamespaceType::Net));
        assert_eq!(NamespaceType::from_name("NET"), None);
        assert!("time".parse::<NamespaceType>().is_err());
    }

    #[test]
    fn test_index_matches_all() {
        for (idx, ns_type) in NamespaceType::ALL.iter().enumerate() {
            assert_eq!(ns_type.index(), idx);
        }
    }

    #[test]
    fn test_env_var_names() {
        for ns_type in NamespaceType::ALL {
            assert_eq!(ns_type.env_var_cstr().to_str().unwrap(), ns_type.env_var());
            assert_eq!(
                ns_type.env_var(),
                format!("{}{}", crate::env::NAMESPACE_VAR_PREFIX, ns_type.name())
            );
        }
    }

    #[test]
    fn test_clone_flags() {
        assert_eq!(NamespaceType::Mnt.clone_flags(), CloneFlags::CLONE_NEWNS);
        assert_eq!(NamespaceType::User.clone_flags(), CloneFlags::CLONE_NEWUSER);
    }

    #[test]
    fn test_pid_does_not_affect_caller() {
        assert!(!NamespaceType::Pid.affects_caller());
        assert!(NamespaceType::Net.affects_caller());
    }

    #[test]
    fn test_order_token_parse() {
        let token = OrderToken::parse("!mnt").unwrap();
        assert_eq!(token.ns_type, NamespaceType::Mnt);
        assert!(token.resolve_early);

        let token = OrderToken::parse(" net ").unwrap();
        assert_eq!(token.ns_type, NamespaceType::Net);
        assert!(!token.resolve_early);

        assert!(OrderToken::parse("!!net").is_none());
        assert!(OrderToken::parse("").is_none());
    }

    #[test]
    fn test_order_token_display() {
        let token = OrderToken {
            ns_type: NamespaceType::User,
            resolve_early: true,
        };
        assert_eq!(token.to_string(), "!user");
    }

    #[test]
    fn test_namespace_ref() {
        let ns = NamespaceRef::of_process(NamespaceType::Net, 42);
        assert_eq!(ns.path(), Path::new("/proc/42/ns/net"));
        assert!(!ns.resolve_early);
        assert_eq!(ns.to_string(), "net=/proc/42/ns/net");

        let ns = NamespaceRef::early(NamespaceType::Mnt, "/run/mnt");
        assert_eq!(ns.token().to_string(), "!mnt");
    }

    #[test]
    fn test_namespace_ref_serde() {
        let ns = NamespaceRef::early(NamespaceType::Uts, "/proc/1/ns/uts");
        let json = serde_json::to_string(&ns).unwrap();
        assert!(json.contains("\"uts\""));
        let back: NamespaceRef = serde_json::from_str(&json).unwrap();
        assert_eq!(ns, back);
    }
}
