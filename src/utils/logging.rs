//! Logging macros gated on a module-level `ENABLE_LOGS` const.
//!
//! The sampling loops can log every tick; defining
//! `const ENABLE_LOGS: bool = false;` in a module silences that chatter
//! without touching call sites. The macros are exported at the crate root.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
