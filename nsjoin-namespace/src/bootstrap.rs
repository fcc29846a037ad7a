//! Namespace switching before `main`
//!
//! A function placed in the ELF `.init_array` section is run by the dynamic
//! loader (or the static startup code) before `main` and thus before any
//! thread could have been spawned. It reads `nsjoin_order` and the
//! `nsjoin_<type>` variables and joins the namespaces they reference.
//!
//! This module uses `unsafe` for `getenv(3)`, which is sound here because
//! nothing else runs concurrently with the constructor.

#![allow(unsafe_code)]

use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nsjoin_core::env::{ORDER_VAR, ORDER_VAR_CSTR};
use nsjoin_core::NamespaceType;

use crate::resolver::resolve;
use crate::status::record_failure;
use crate::switcher::switch;

#[cfg(target_os = "linux")]
#[used]
#[unsafe(link_section = ".init_array")]
static BOOTSTRAP: extern "C" fn() = bootstrap;

#[cfg(target_os = "linux")]
extern "C" fn bootstrap() {
    switch_from_env(getenv);
}

/// Keep the constructor from being discarded by the linker
///
/// Called from [`status`](crate::status()), so that any program checking
/// the startup status also links in the constructor.
pub(crate) fn ensure_linked() {
    #[cfg(target_os = "linux")]
    std::hint::black_box(&BOOTSTRAP);
}

/// Non-empty value of an environment variable, without std's env lock
fn getenv(name: &CStr) -> Option<&'static [u8]> {
    // SAFETY: name is NUL-terminated; the environment is not modified
    // while the constructor runs.
    let value = unsafe { libc::getenv(name.as_ptr()) };
    if value.is_null() {
        return None;
    }
    // SAFETY: getenv returned a valid NUL-terminated string that lives as
    // long as the environment entry.
    let bytes = unsafe { CStr::from_ptr(value) }.to_bytes();
    (!bytes.is_empty()).then_some(bytes)
}

/// Resolve and switch namespaces as configured by `lookup`, recording the
/// first failure in the process status
///
/// Returns whether all switches succeeded.
fn switch_from_env<F>(lookup: F) -> bool
where
    F: Fn(&CStr) -> Option<&'static [u8]>,
{
    let order = match lookup(ORDER_VAR_CSTR).map(std::str::from_utf8) {
        None => None,
        Some(Ok(text)) => Some(text),
        Some(Err(_)) => {
            record_failure(format_args!("nsjoin: {ORDER_VAR} is not valid UTF-8"));
            return false;
        }
    };

    let paths = |ns_type: NamespaceType| {
        lookup(ns_type.env_var_cstr()).map(|bytes| Path::new(OsStr::from_bytes(bytes)))
    };

    let plan = match resolve(order, paths) {
        Ok(plan) => plan,
        Err(e) => {
            record_failure(format_args!("nsjoin: {e}"));
            return false;
        }
    };

    match switch(plan) {
        Ok(_) => true,
        Err(e) => {
            record_failure(format_args!("nsjoin: {e}"));
            false
        }
    }
}
