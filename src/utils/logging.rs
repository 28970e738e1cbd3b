//! Scoped logging macros for the hot-path workers.
//!
//! Each module that uses them defines two constants:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_SCOPE: &str = "dispatcher";
//!
//! use crate::{log_info, log_warn};
//! log_info!("flushed {} events", 12);
//! ```
//! Output is prefixed with `[LOG_SCOPE]`; setting `ENABLE_LOGS` to false
//! silences the module without touching `RUST_LOG`.

/// Initializes `env_logger` once. `RUST_LOG` wins; otherwise the default is
/// `info`, or `debug` when `debug` is set.
pub fn init(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_filter);
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[{}] {}", LOG_SCOPE, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[{}] {}", LOG_SCOPE, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[{}] {}", LOG_SCOPE, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[{}] {}", LOG_SCOPE, format_args!($($arg)*));
        }
    };
}
