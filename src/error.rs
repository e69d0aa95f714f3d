//! Error type shared by the codec, the reader, and the compression pipeline.

use std::fmt;
use std::io;

/// Everything that can go wrong while encoding, decoding, or streaming a
/// DZ file.
#[derive(Debug)]
pub enum DzError {
    /// Underlying file, channel, or thread failure.
    Io(io::Error),
    /// A caller-supplied argument is out of range for the handle.
    InvalidArgument(&'static str),
    /// The stream does not begin with the gzip deflate magic.
    NotGzip,
    /// The bytes violate the DZ container invariants.
    Malformed(&'static str),
    /// Valid gzip, but not something this crate can random-access.
    Unsupported(&'static str),
    /// Internal counters diverged; the operation cannot continue.
    Invariant(&'static str),
    /// A stop request arrived before the operation completed.
    Cancelled,
}

impl fmt::Display for DzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DzError::Io(e) => write!(f, "i/o error: {}", e),
            DzError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            DzError::NotGzip => write!(f, "not a gzip stream"),
            DzError::Malformed(what) => write!(f, "malformed dz stream: {}", what),
            DzError::Unsupported(what) => write!(f, "unsupported stream: {}", what),
            DzError::Invariant(what) => write!(f, "internal invariant broken: {}", what),
            DzError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for DzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DzError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DzError {
    fn from(e: io::Error) -> Self {
        DzError::Io(e)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DzError>;
