//! Compression-run configuration.

use std::path::PathBuf;

use crate::error::{DzError, Result};

/// Default zlib compression level.
pub const DEFAULT_LEVEL: u32 = 6;

/// Everything one compression run needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    /// File to compress; must be a regular file.
    pub input: PathBuf,
    /// Destination path; refused if it exists unless `force` is set.
    pub output: PathBuf,
    /// Number of compressor worker threads.
    pub compressors_count: usize,
    /// zlib level, 1..=9.
    pub level: u32,
    /// Overwrite an existing destination.
    pub force: bool,
}

impl Config {
    /// Build a configuration with library defaults: one worker per
    /// logical CPU, level [`DEFAULT_LEVEL`], no overwrite.
    pub fn new(input: PathBuf, output: PathBuf) -> Config {
        Config {
            input,
            output,
            compressors_count: num_cpus::get(),
            level: DEFAULT_LEVEL,
            force: false,
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.compressors_count == 0 {
            return Err(DzError::InvalidArgument("compressors count must be positive"));
        }
        if !(1..=9).contains(&self.level) {
            return Err(DzError::InvalidArgument("compression level must be in 1..=9"));
        }
        Ok(())
    }

    /// Bound for every inter-role channel. Wide enough that a full
    /// complement of in-flight chunks plus control traffic never blocks
    /// a role that is making progress.
    pub fn msg_queue_hwm(&self) -> usize {
        2 * self.compressors_count + 5
    }

    /// Cap on completed-but-unordered chunks held by the manager.
    /// Strictly greater than the worker count, so at least one worker
    /// can always deliver a result and unblock the event loop.
    pub fn ordering_set_hwm(&self) -> usize {
        3 * self.compressors_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::new(PathBuf::from("in.bin"), PathBuf::from("out.dz"))
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base();
        assert!(cfg.validate().is_ok());
        assert!(cfg.compressors_count >= 1);
        assert_eq!(cfg.level, DEFAULT_LEVEL);
        assert!(!cfg.force);
    }

    #[test]
    fn rejects_zero_workers_and_bad_levels() {
        let mut cfg = base();
        cfg.compressors_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.level = 0;
        assert!(cfg.validate().is_err());
        cfg.level = 10;
        assert!(cfg.validate().is_err());
        cfg.level = 9;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn hwm_exceeds_worker_count() {
        let mut cfg = base();
        for n in [1usize, 4, 8, 32] {
            cfg.compressors_count = n;
            assert!(cfg.ordering_set_hwm() > n);
            assert!(cfg.msg_queue_hwm() > n);
        }
    }
}
