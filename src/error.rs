//! Centralized error handling for approf.
//!
//! The decoder is exercised directly on untrusted `.ap` files (profiles can
//! come from foreign processes and are fuzz-tested), so every failure
//! condition is a `Result` value. The library enforces this through
//! `#![deny(clippy::panic)]` and `#![deny(clippy::unwrap_used)]`.
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`ApError::Io`]): file open/map/write failures
//! - **Format Errors** ([`ApError::Format`]): bad magic, truncated sections,
//!   declared ranges exceeding the mapped length, checksum mismatches
//! - **Serialization Errors** ([`ApError::Serialization`]): bincode
//!   encoding/decoding of section payloads
//! - **Compression Errors** ([`ApError::Compression`]): section payload
//!   compression/decompression failures
//! - **Internal Errors** ([`ApError::Internal`]): logic errors (should not
//!   occur in production)
//!
//! Format errors on untrusted input are a normal, expected outcome, never a
//! reason to terminate the process.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for approf operations.
pub type Result<T> = std::result::Result<T, ApError>;

/// The master error enum covering all failure domains in approf.
///
/// This type is `Clone` so errors can be shared across threads or stored for
/// later analysis; I/O errors are wrapped in `Arc` to make cloning cheap.
#[derive(Debug, Clone)]
pub enum ApError {
    /// Low-level I/O failure (open, map, metadata, write, flush).
    ///
    /// The underlying `io::Error` is wrapped in an `Arc` to keep the error
    /// `Clone`.
    Io(Arc<io::Error>),

    /// The file does not conform to the `.ap` container format.
    ///
    /// Covers wrong magic bytes, incompatible versions, truncated headers or
    /// sections, section ranges outside the declared file size, and payload
    /// checksum mismatches. The string describes the violation.
    Format(String),

    /// Section payload encoding/decoding failure (bincode).
    Serialization(String),

    /// Section payload compression or decompression failure.
    Compression(String),

    /// Logic error in the decoder or writer.
    ///
    /// This should not occur in production; it indicates a bug (mutex
    /// poisoning, impossible table state) rather than bad input data.
    Internal(String),
}

impl fmt::Display for ApError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Format(s) => write!(f, "Format Error: {s}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for ApError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ApError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
