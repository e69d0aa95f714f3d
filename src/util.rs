//! File metadata helpers used by the CLI and the compression manager.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Returns `true` if `path` names an existing regular file.
pub fn is_reg_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Size of the file at `path`, or 0 if it cannot be read.
pub fn get_file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Modification time of `path` as whole seconds since the Unix epoch,
/// truncated to the 32-bit field a gzip header can carry. 0 when the
/// time is unavailable or precedes the epoch.
pub fn unix_mtime(path: &Path) -> u32 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Final path component as an owned string; empty when the path has no
/// usable file name.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
