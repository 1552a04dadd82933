//! API implementations provided by the application.

pub mod client;
