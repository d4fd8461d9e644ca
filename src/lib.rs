//! # approf
//!
//! Decoder, merger and writer for `.ap` AOT-profile containers, plus the
//! lock-based profiler state machine that gates when sampling and dumping may
//! run.
//!
//! ## Overview
//!
//! An `.ap` file is the binary container a profiling run produces and an
//! ahead-of-time (AOT) compiler consumes: per-bytecode-file checksums, per
//! record method tables with sample counts and observed types, hidden-class
//! transition trees and prototype-transition pools. This crate covers the
//! whole lifecycle of that container:
//!
//! *   **Decode:** [`ProfileDecoder`] memory-maps an `.ap` file, validates
//!     the versioned header field-by-field, loads the abc-file interning pool
//!     and the record tables, then releases the mapping.
//! *   **Verify:** checksum verification against the bytecode actually
//!     running. A stale or absent profile is not an error — every query
//!     degrades to a permissive default so compilation proceeds exactly as if
//!     no profile existed.
//! *   **Merge:** profiles from multiple processes/workers combine through
//!     the abc-pool id remapping rule: pool merge first, record-table merge
//!     second, every id translated. [`ApMerger`] does this for whole files in
//!     parallel.
//! *   **Encode:** [`writer::ProfileWriter`] serializes an accumulator back
//!     into `.ap` bytes; [`inspector::ApInspector`] renders a text dump.
//! *   **Coordinate:** [`PgoState`] is the concurrent state machine the
//!     sampling/dump scheduler and the GC consult before touching the
//!     pipeline, with counted (nesting) GC pauses.
//!
//! ## File Format
//!
//! ```text
//! [FileHeader + SectionTable] [Section 0] [Section 1] ...
//! ```
//!
//! The header is the single source of truth for layout: every section is
//! declared by `(kind, offset, size)`, unknown kinds are skipped, and new
//! sections can be appended without breaking older readers. Section bodies
//! carry a one-byte compression tag (see [`compression`]).
//!
//! ## Safety and Error Handling
//!
//! `.ap` files are untrusted input (foreign processes, fuzzers). The header
//! is parsed by a validating byte reader, never overlaid on mapped memory;
//! malformed input is an [`ApError`], never a panic; the file mapping is
//! scoped to the load call and released on every exit path.
//!
//! * **Encapsulated Unsafe:** `unsafe` appears only for the memory mapping
//!   itself, in the `decoder` module.
//! * **No Panics:** no `unwrap()` or `panic!()` in library code (enforced by
//!   clippy lints).

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod compression;
pub mod decoder;
pub mod error;
pub mod header;
pub mod inspector;
pub mod pool;
pub mod records;
pub mod state;
pub mod types;
pub mod writer;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, NoCompression};

pub use api::ApMerger;
pub use decoder::{MismatchReport, ProfileDecoder};
pub use error::{ApError, Result};
pub use header::{CapabilityFlags, ProfileHeader, Version};
pub use pool::{AbcFilePool, ApEntityId, SharedAbcPool};
pub use state::{DumpScheduler, PgoState};
pub use types::{MethodId, ProfileType, ProfileTypeKind};
