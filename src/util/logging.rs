//! Conditional logging macros gated on a module-level `ENABLE_LOGS` const.
//!
//! Modules that use these define `const ENABLE_LOGS: bool = ...;` so chatty
//! diagnostics (every skipped store call, every rollover) can be silenced per
//! module without touching the global log filter.

/// Install the process-wide logger, honoring `RUST_LOG`. Safe to call more
/// than once; only the first call wins.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).try_init();
}

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
