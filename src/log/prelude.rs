//! Re-exports of the log macros used across the application.

pub use slog_scope::{debug, error, info, warn};
