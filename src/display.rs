//! Verbosity-gated stderr diagnostics.
//!
//! A single global notification level controls all user-facing output:
//! 0 = silent, 1 = errors only, 2 = results and warnings, 3 = progress,
//! 4+ = debug chatter. The compression pipeline threads report through
//! these helpers rather than owning their own writers.

use std::sync::atomic::{AtomicI32, Ordering};

/// Global notification level.
pub static DISPLAY_LEVEL: AtomicI32 = AtomicI32::new(1);

/// Set the global notification level.
pub fn set_display_level(level: i32) {
    DISPLAY_LEVEL.store(level, Ordering::Relaxed);
}

/// Current notification level.
pub fn display_level() -> i32 {
    DISPLAY_LEVEL.load(Ordering::Relaxed)
}

/// Write `msg` (plus a newline) to stderr when the level permits.
pub fn display(level: i32, msg: &str) {
    if DISPLAY_LEVEL.load(Ordering::Relaxed) >= level {
        eprintln!("{}", msg);
    }
}

/// `eprintln!`-style formatting gated on the notification level.
#[macro_export]
macro_rules! displaylevel {
    ($level:expr, $($arg:tt)*) => {
        if $crate::display::display_level() >= $level {
            eprintln!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips() {
        let prev = display_level();
        set_display_level(4);
        assert_eq!(display_level(), 4);
        set_display_level(prev);
    }
}
