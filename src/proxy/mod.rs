//! HTTP/HTTPS intercepting proxy.
//!
//! Captures every request/response pair as a raw wire dump, routing each
//! one through the interception engine before it reaches the wire in
//! either direction.

pub mod server;

pub use server::{run_server, ProxyHandle};
