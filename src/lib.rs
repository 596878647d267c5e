//! # Gleip Core
//!
//! Intercepting HTTP/HTTPS proxy and flow execution engine for the Gleip
//! web-security workbench.
//!
//! ## Features
//!
//! - HTTP/HTTPS proxy with on-the-fly TLS certificate generation and
//!   request/response interception
//! - An in-memory transaction log, queryable and filterable, with a
//!   chunked transfer API for large bodies
//! - A flow execution engine: named, ordered pipelines of request/script/
//!   chef steps sharing a variable scope, with fuzz-mode request loops
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Host application                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    commands (this crate's API)                │
//! │  ┌─────────┐  ┌───────────┐  ┌────────┐  ┌──────────────┐   │
//! │  │  proxy  │  │ intercept │  │  flow  │  │    store     │   │
//! │  │ server  │──│  engine   │──│ engine │──│ (tx / flows) │   │
//! │  └─────────┘  └───────────┘  └────────┘  └──────────────┘   │
//! │       │              │            │              │          │
//! │       └──────────────┴─────eventbus┴──────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate stops at its Rust-level API boundary (`commands`) — there is
//! no FFI bridge or GUI binding layer generated over it.

pub mod ca;
pub mod chunked;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod http;
pub mod intercept;
pub mod models;
pub mod proxy;
pub mod store;
pub mod tls_client;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
