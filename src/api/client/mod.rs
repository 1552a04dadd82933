//! Implementation of the client-facing API: the HTTP surface and the
//! WebSocket sessions behind it.

pub mod server;
pub mod session;
