//! Helpers for actions running in a re-executed child
//!
//! An action receives at most one JSON parameter on stdin and answers with
//! exactly one JSON value on stdout. Anything written to stderr makes the
//! run fail in the parent, with that text as the error.

use std::io::{self, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Decode the parameter sent by the parent
///
/// # Errors
/// Returns error if stdin holds no value of type `T`.
pub fn param<T: DeserializeOwned>() -> serde_json::Result<T> {
    let stdin = io::stdin().lock();
    let mut values = serde_json::Deserializer::from_reader(stdin).into_iter::<T>();
    values
        .next()
        .unwrap_or_else(|| serde_json::from_slice::<T>(b""))
}

/// Send the result of this action to the parent
///
/// # Errors
/// Returns error if the value cannot be encoded or stdout is closed.
pub fn reply<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

/// Report a failure to the parent through stderr
pub fn fail(message: impl std::fmt::Display) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{message}");
}
