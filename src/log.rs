//! Crate-wide log gate.
//!
//! Notification translation can fire on every poll iteration, so the host
//! gets a switch to silence the bridge wholesale without reconfiguring the
//! global `log` filter.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn disable() {
    ENABLED.store(false, Ordering::Relaxed)
}

pub fn enable() {
    ENABLED.store(true, Ordering::Relaxed)
}

/// Gated dispatch to a `log` macro, used through the level-named wrappers
/// below.
#[macro_export]
macro_rules! pb_log {
    ($level:ident, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::$level!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! pb_info {
    ($($arg:tt)+) => { $crate::pb_log!(info, $($arg)+) };
}

#[macro_export]
macro_rules! pb_warn {
    ($($arg:tt)+) => { $crate::pb_log!(warn, $($arg)+) };
}

#[macro_export]
macro_rules! pb_debug {
    ($($arg:tt)+) => { $crate::pb_log!(debug, $($arg)+) };
}
