//! Outcome of the namespace switch done at process startup
//!
//! The bootstrap constructor runs before `main`, where there is nobody to
//! return an error to. It records its first failure here instead, in a
//! fixed-size buffer, and the application checks [`status`] later.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use thiserror::Error;

/// Capacity of the failure message buffer: a maximum length path plus text
#[allow(clippy::cast_sign_loss)]
pub const STATUS_CAPACITY: usize = libc::PATH_MAX as usize + 256;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;

/// Namespace switching at startup failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{details}")]
pub struct NamespaceSwitchError {
    details: String,
}

impl NamespaceSwitchError {
    /// Description of the failure
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }
}

/// Write-once failure message in a fixed-size buffer
pub(crate) struct StatusCell {
    state: AtomicU8,
    len: AtomicUsize,
    buf: UnsafeCell<[u8; STATUS_CAPACITY]>,
}

// SAFETY: the buffer is only written by the single caller that moved the
// state from EMPTY to WRITING, and only read after the state became SET.
unsafe impl Sync for StatusCell {}

impl StatusCell {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            len: AtomicUsize::new(0),
            buf: UnsafeCell::new([0; STATUS_CAPACITY]),
        }
    }

    /// Store a failure message unless one was stored before
    ///
    /// Messages longer than [`STATUS_CAPACITY`] are truncated. Returns
    /// whether the message was stored.
    pub(crate) fn record(&self, message: fmt::Arguments<'_>) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        // SAFETY: winning the EMPTY -> WRITING transition grants exclusive access
        let buf = unsafe { &mut *self.buf.get() };
        let mut writer = Truncating {
            buf,
            len: 0,
            full: false,
        };
        let _ = fmt::write(&mut writer, message);

        self.len.store(writer.len, Ordering::Relaxed);
        self.state.store(SET, Ordering::Release);
        true
    }

    pub(crate) fn get(&self) -> Result<(), NamespaceSwitchError> {
        if self.state.load(Ordering::Acquire) != SET {
            return Ok(());
        }

        let len = self.len.load(Ordering::Relaxed).min(STATUS_CAPACITY);
        // SAFETY: state is SET, so the buffer is no longer written
        let buf = unsafe { &*self.buf.get() };
        Err(NamespaceSwitchError {
            details: String::from_utf8_lossy(&buf[..len]).into_owned(),
        })
    }
}

/// Writer filling a fixed buffer, cut at the last whole character that fits
struct Truncating<'a> {
    buf: &'a mut [u8],
    len: usize,
    full: bool,
}

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.full {
            return Ok(());
        }
        let room = self.buf.len() - self.len;
        let mut take = s.len().min(room);
        if take < s.len() {
            self.full = true;
            while !s.is_char_boundary(take) {
                take -= 1;
            }
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

static STATUS: StatusCell = StatusCell::new();

pub(crate) fn record_failure(message: fmt::Arguments<'_>) -> bool {
    STATUS.record(message)
}

/// Check whether switching namespaces at startup succeeded
///
/// # Errors
/// Returns the first failure of the startup switch, if any.
///
/// # Example
/// ```no_run
/// if let Err(e) = nsjoin_namespace::status() {
///     eprintln!("{e}");
///     std::process::exit(1);
/// }
/// ```
pub fn status() -> Result<(), NamespaceSwitchError> {
    crate::bootstrap::ensure_linked();
    STATUS.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cell_is_ok() {
        let cell = StatusCell::new();
        assert_eq!(cell.get(), Ok(()));
    }

    #[test]
    fn test_record_once() {
        let cell = StatusCell::new();
        assert!(cell.record(format_args!("first {}", 1)));
        assert!(!cell.record(format_args!("second")));

        let err = cell.get().unwrap_err();
        assert_eq!(err.details(), "first 1");
        assert_eq!(err.to_string(), "first 1");
    }

    #[test]
    fn test_record_truncates() {
        let cell = StatusCell::new();
        let long = "x".repeat(STATUS_CAPACITY * 2);
        assert!(cell.record(format_args!("prefix: {long}")));

        let err = cell.get().unwrap_err();
        assert_eq!(err.details().len(), STATUS_CAPACITY);
        assert!(err.details().starts_with("prefix: xxx"));
    }

    #[test]
    fn test_truncation_stops_at_char_boundary() {
        let cell = StatusCell::new();
        let filler = "a".repeat(STATUS_CAPACITY - 1);
        // The two-byte character does not fit, nor does anything after it
        assert!(cell.record(format_args!("{filler}ü{}", "b")));

        let err = cell.get().unwrap_err();
        assert_eq!(err.details(), filler);
        assert!(!err.details().contains('\u{FFFD}'));
    }
}
