//! dzip — parallel compressor and random-access reader for the DZ
//! container: RFC 1952 gzip with a "RA" extra subfield recording the
//! compressed length of every fixed-size chunk.
//!
//! Stock gunzip decompresses DZ files transparently; a DZ-aware reader
//! seeks to any byte of the uncompressed content by inflating a single
//! chunk. The crate ships both sides:
//!
//! - [`DzFile`] — stdio-like seekable reader over DZ or plain files;
//! - [`pipeline::compress_file`] — multi-threaded compressor producing
//!   DZ output.

pub mod chunkio;
pub mod display;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod reader;
pub mod util;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level convenience re-exports
// ─────────────────────────────────────────────────────────────────────────────

/// Crate-wide error type.
pub use error::{DzError, Result};

/// Random-access reader handle.
pub use reader::{DzFile, Format};

/// Compression entry points.
pub use pipeline::{compress_file, CompressManager, CompressStat, Config};

/// Fixed uncompressed chunk length of the container.
pub use format::CHUNK_SIZE;

/// Upper bound on chunks per member, imposed by the 16-bit XLEN field.
pub use format::CHUNKS_PER_MEMBER;
