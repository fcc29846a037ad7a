//! Namespace ordering and switch plan resolution
//!
//! Everything in here works without heap allocation on its success and
//! failure paths, so that it can run from the bootstrap constructor before
//! `main`. Plans and errors borrow their paths from the caller.

use nix::errno::Errno;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use nsjoin_core::env::{ORDER_SEPARATOR, ORDER_VAR};
use nsjoin_core::{Error, NamespaceRef, NamespaceType, OrderToken};

const CAPACITY: usize = NamespaceType::COUNT;

/// Why an ordering list or namespace reference could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError<'a> {
    /// Ordering list contains an empty element, such as `net,,ipc`
    EmptyToken,

    /// Ordering list names an unknown namespace type
    UnknownType {
        /// Offending token
        token: &'a str,
    },

    /// Ordering list names the same namespace type more than once
    DuplicateType {
        /// Namespace type given twice
        ns_type: NamespaceType,
    },

    /// An early-resolved namespace path could not be opened
    Open {
        /// Namespace type
        ns_type: NamespaceType,
        /// Path that failed to open
        path: &'a Path,
        /// Reason
        errno: Errno,
    },
}

impl fmt::Display for ResolveError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyToken => write!(f, "empty namespace type in {ORDER_VAR}"),
            Self::UnknownType { token } => {
                write!(f, "unknown namespace type \"{token}\" in {ORDER_VAR}")
            }
            Self::DuplicateType { ns_type } => {
                write!(f, "namespace type \"{ns_type}\" given more than once")
            }
            Self::Open {
                ns_type,
                path,
                errno,
            } => write!(
                f,
                "invalid {ns_type} reference \"{}\": {errno}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for ResolveError<'_> {}

impl From<ResolveError<'_>> for Error {
    fn from(err: ResolveError<'_>) -> Self {
        Self::Resolution {
            message: err.to_string(),
        }
    }
}

/// Parsed ordering list: which namespace types to switch, in which order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceOrder {
    tokens: [OrderToken; CAPACITY],
    len: usize,
}

const fn token(ns_type: NamespaceType, resolve_early: bool) -> OrderToken {
    OrderToken {
        ns_type,
        resolve_early,
    }
}

impl NamespaceOrder {
    /// The order applied when none is given, see [`DEFAULT_ORDER`](nsjoin_core::env::DEFAULT_ORDER)
    pub const DEFAULT: Self = Self {
        tokens: [
            token(NamespaceType::User, true),
            token(NamespaceType::Mnt, true),
            token(NamespaceType::Cgroup, false),
            token(NamespaceType::Ipc, false),
            token(NamespaceType::Net, false),
            token(NamespaceType::Pid, false),
            token(NamespaceType::Uts, false),
        ],
        len: CAPACITY,
    };

    /// Parse a comma-separated ordering list
    ///
    /// A blank list yields [`DEFAULT`](Self::DEFAULT).
    ///
    /// # Errors
    /// Returns error on empty elements, unknown types, and types given twice.
    pub fn parse(text: &str) -> Result<Self, ResolveError<'_>> {
        if text.trim().is_empty() {
            return Ok(Self::DEFAULT);
        }

        let mut order = Self {
            tokens: [token(NamespaceType::Cgroup, false); CAPACITY],
            len: 0,
        };
        let mut seen = [false; CAPACITY];

        for raw in text.split(ORDER_SEPARATOR) {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(ResolveError::EmptyToken);
            }
            let parsed = OrderToken::parse(raw).ok_or(ResolveError::UnknownType { token: raw })?;
            let idx = parsed.ns_type.index();
            if seen[idx] {
                return Err(ResolveError::DuplicateType {
                    ns_type: parsed.ns_type,
                });
            }
            seen[idx] = true;
            if let Some(slot) = order.tokens.get_mut(order.len) {
                *slot = parsed;
                order.len += 1;
            }
        }

        Ok(order)
    }

    /// Tokens in order
    pub fn iter(&self) -> impl Iterator<Item = &OrderToken> {
        self.tokens.iter().take(self.len)
    }

    /// Number of tokens
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if no namespace type is listed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for NamespaceOrder {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for NamespaceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, token) in self.iter().enumerate() {
            if idx > 0 {
                write!(f, "{ORDER_SEPARATOR}")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// A single resolved namespace switch
#[derive(Debug)]
pub struct PlannedSwitch<'a> {
    /// Namespace type to join
    pub ns_type: NamespaceType,
    /// Path referencing the namespace
    pub path: &'a Path,
    pub(crate) handle: Option<OwnedFd>,
}

impl PlannedSwitch<'_> {
    /// Whether the path was already opened during resolution
    #[must_use]
    pub const fn is_opened(&self) -> bool {
        self.handle.is_some()
    }
}

/// Ordered list of namespace switches, in exactly the order they happen
#[derive(Debug)]
pub struct SwitchPlan<'a> {
    steps: [Option<PlannedSwitch<'a>>; CAPACITY],
    len: usize,
}

impl<'a> SwitchPlan<'a> {
    const fn empty() -> Self {
        Self {
            steps: [const { None }; CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, step: PlannedSwitch<'a>) {
        if let Some(slot) = self.steps.get_mut(self.len) {
            *slot = Some(step);
            self.len += 1;
        }
    }

    /// Steps in switching order
    pub fn iter(&self) -> impl Iterator<Item = &PlannedSwitch<'a>> {
        self.steps.iter().flatten()
    }

    /// Namespace types in switching order
    pub fn types(&self) -> impl Iterator<Item = NamespaceType> + '_ {
        self.iter().map(|step| step.ns_type)
    }

    /// Number of switches
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if there is nothing to switch
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> IntoIterator for SwitchPlan<'a> {
    type Item = PlannedSwitch<'a>;
    type IntoIter = std::iter::Flatten<std::array::IntoIter<Option<PlannedSwitch<'a>>, CAPACITY>>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter().flatten()
    }
}

/// Open a namespace reference read-only and close-on-exec
pub(crate) fn open_namespace(path: &Path) -> Result<OwnedFd, Errno> {
    File::open(path)
        .map(OwnedFd::from)
        .map_err(|e| e.raw_os_error().map_or(Errno::EINVAL, Errno::from_raw))
}

/// Resolve an ordering list and namespace paths into a switch plan
///
/// `order` of `None` or blank means [`NamespaceOrder::DEFAULT`]. `lookup` returns the
/// path configured for a namespace type; types without a (non-empty) path
/// are left out of the plan. Paths of early tokens are opened right away.
///
/// # Errors
/// Returns error if the ordering list is invalid or an early path cannot
/// be opened. Descriptors opened so far are closed again.
pub fn resolve<'a, F>(order: Option<&'a str>, mut lookup: F) -> Result<SwitchPlan<'a>, ResolveError<'a>>
where
    F: FnMut(NamespaceType) -> Option<&'a Path>,
{
    let order = match order {
        Some(text) => NamespaceOrder::parse(text)?,
        None => NamespaceOrder::DEFAULT,
    };

    let mut plan = SwitchPlan::empty();
    for token in order.iter() {
        let Some(path) = lookup(token.ns_type).filter(|p| !p.as_os_str().is_empty()) else {
            continue;
        };
        let handle = if token.resolve_early {
            let fd = open_namespace(path).map_err(|errno| ResolveError::Open {
                ns_type: token.ns_type,
                path,
                errno,
            })?;
            Some(fd)
        } else {
            None
        };
        plan.push(PlannedSwitch {
            ns_type: token.ns_type,
            path,
            handle,
        });
    }

    Ok(plan)
}

/// Owned table of namespace paths plus an optional ordering list
///
/// This is the environment encoding in structured form: one path per
/// namespace type and the `nsjoin_order` text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacePaths {
    paths: [Option<PathBuf>; CAPACITY],
    order: Option<String>,
}

impl NamespacePaths {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from namespace references, keeping their order
    ///
    /// # Errors
    /// Returns error if a namespace type is referenced more than once.
    pub fn from_refs(refs: &[NamespaceRef]) -> nsjoin_core::Result<Self> {
        let mut table = Self::new();
        let mut tokens = Vec::with_capacity(refs.len());

        for ns in refs {
            let slot = &mut table.paths[ns.ns_type.index()];
            if slot.is_some() {
                return Err(ResolveError::DuplicateType {
                    ns_type: ns.ns_type,
                }
                .into());
            }
            *slot = Some(ns.path.clone());
            tokens.push(ns.token().to_string());
        }

        table.order = Some(tokens.join(ORDER_SEPARATOR.to_string().as_str()));
        Ok(table)
    }

    /// Read `nsjoin_<type>` and `nsjoin_order` from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let mut table = Self::new();
        for ns_type in NamespaceType::ALL {
            table.paths[ns_type.index()] = std::env::var_os(ns_type.env_var())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from);
        }
        table.order = std::env::var(ORDER_VAR).ok();
        table
    }

    /// Set the path for a namespace type
    #[must_use]
    pub fn with(mut self, ns_type: NamespaceType, path: impl Into<PathBuf>) -> Self {
        self.paths[ns_type.index()] = Some(path.into());
        self
    }

    /// Set the ordering list
    #[must_use]
    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Path configured for a namespace type
    #[must_use]
    pub fn get(&self, ns_type: NamespaceType) -> Option<&Path> {
        self.paths[ns_type.index()].as_deref()
    }

    /// Ordering list, if any
    #[must_use]
    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }

    /// Resolve into a switch plan
    ///
    /// # Errors
    /// See [`resolve`].
    pub fn resolve(&self) -> Result<SwitchPlan<'_>, ResolveError<'_>> {
        resolve(self.order(), |ns_type| self.get(ns_type))
    }

    /// Environment variables encoding this table, ordering list last
    ///
    /// Always yields the ordering variable, so that a child with an empty
    /// table doesn't fall back to an inherited order.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(&'static str, OsString)> {
        let mut vars: Vec<(&'static str, OsString)> = NamespaceType::ALL
            .iter()
            .filter_map(|&ns_type| {
                self.get(ns_type)
                    .map(|path| (ns_type.env_var(), path.as_os_str().to_owned()))
            })
            .collect();
        vars.push((ORDER_VAR, OsStr::new(self.order().unwrap_or_default()).to_owned()));
        vars
    }
}
