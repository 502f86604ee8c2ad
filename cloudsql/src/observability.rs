//! Crate-internal logging macros.
//!
//! Resolve to `tracing` when that feature is enabled, `log` otherwise, so the
//! rest of the crate never names either facade directly.

#[cfg(feature = "tracing")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*); };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*); };
}

#[cfg(feature = "tracing")]
macro_rules! log_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*); };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_info {
    ($($arg:tt)*) => { log::info!($($arg)*); };
}

#[cfg(feature = "tracing")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*); };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*); };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
