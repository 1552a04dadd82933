//! Logging utilities.

pub mod prelude;

use std::io;

use slog::{o, Drain};
use slog_scope::GlobalLoggerGuard;

/// Initializes the global [`slog`] logger outputting JSON records to
/// stdout, with level filtering driven by the `RUST_LOG` environment
/// variable.
///
/// Returns the guard that must be kept alive for the lifetime of the
/// application.
///
/// # Panics
///
/// If [`slog_stdlog`] fails to [initialize](slog_stdlog::init).
pub fn init() -> GlobalLoggerGuard {
    let drain = slog_json::Json::default(io::stdout()).fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());
    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().unwrap();

    scope_guard
}
