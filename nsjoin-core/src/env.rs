//! Environment variables understood by nsjoin
//!
//! Namespace paths are passed as `nsjoin_<type>=<path>`, for instance
//! `nsjoin_net=/proc/1234/ns/net`. The names are lowercase and carry a
//! prefix so they don't collide with common variables such as `pid`.

use std::ffi::CStr;

/// Prefix shared by all namespace path variables
pub const NAMESPACE_VAR_PREFIX: &str = "nsjoin_";

/// Ordering variable: comma-separated namespace type names
pub const ORDER_VAR: &str = "nsjoin_order";

/// Ordering variable as C string, for `getenv(3)` before `main`
pub const ORDER_VAR_CSTR: &CStr = c"nsjoin_order";

/// Marker variable naming the action to run in a re-executed child
pub const ACTION_VAR: &str = "nsjoin_reexec_action";

/// Prefix on an order token requesting its path be opened before any switch
pub const EARLY_MARKER: char = '!';

/// Separator between order tokens
pub const ORDER_SEPARATOR: char = ',';

/// Order applied when [`ORDER_VAR`] is unset or empty
///
/// The user namespace goes first so that unprivileged callers gain the
/// capabilities needed to join the others. Both user and mount paths are
/// opened up front: after switching the mount namespace, paths may resolve
/// differently.
pub const DEFAULT_ORDER: &str = "!user,!mnt,cgroup,ipc,net,pid,uts";
