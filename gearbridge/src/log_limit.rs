// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt::Arguments;
use std::sync::atomic::{AtomicBool, Ordering};

/// Suppresses repeats of an error until `reset` is called.
#[derive(Debug, Default)]
pub struct LogOnce {
    logged: AtomicBool,
}

impl LogOnce {
    pub const fn new() -> Self {
        Self {
            logged: AtomicBool::new(false),
        }
    }

    /// Logs at error level if nothing was logged since the last reset.
    /// Returns whether the message was emitted.
    pub fn error(&self, args: Arguments<'_>) -> bool {
        if self.logged.swap(true, Ordering::AcqRel) {
            log::debug!("suppressed: {}", args);
            return false;
        }
        log::error!("{}", args);
        true
    }

    pub fn reset(&self) {
        self.logged.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_once_until_reset() {
        let once = LogOnce::new();
        assert!(once.error(format_args!("boom {}", 1)));
        assert!(!once.error(format_args!("boom {}", 2)));
        once.reset();
        assert!(once.error(format_args!("boom {}", 3)));
    }
}
