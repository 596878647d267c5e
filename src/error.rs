//! Crate-wide error taxonomy.
//!
//! Each module boundary gets a small `thiserror` enum; callers that need to
//! bubble a failure up to a generic edge (connection handlers, the command
//! surface) wrap it in `anyhow::Error` via `.context(...)`.

use thiserror::Error;

/// Failures from `crate::http` (parsing, chunked decoding, decompression).
#[derive(Debug, Error)]
pub enum HttpCodecError {
    #[error("request line does not have method, path and version tokens")]
    MalformedRequestLine,
    #[error("status line does not have version, code and reason tokens")]
    MalformedResponseLine,
    #[error("invalid chunk size token: {0:?}")]
    InvalidChunkSize(String),
    #[error("chunk body ended before the declared size was read")]
    ShortChunk,
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Failures from `crate::ca`.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("root CA material failed to decode at startup")]
    CAUnavailable,
    #[error("invalid hostname for certificate: {0}")]
    InvalidHostname(String),
}

/// Failures surfaced by a single flow step; non-fatal to the run.
#[derive(Debug, Error, Clone)]
pub enum FlowStepError {
    #[error("upstream request failed: {0}")]
    UpstreamTransport(String),
    #[error("script evaluation failed: {0}")]
    ScriptFailed(String),
    #[error("chef action {action} failed: {message}")]
    ChefActionFailed { action: String, message: String },
    #[error("referenced variable {0:?} is not set")]
    MissingVariable(String),
    #[error("fuzz run already in progress")]
    FuzzBusy,
}

/// Failures from the interception engine's bookkeeping.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("no pending decision for transaction {0}")]
    NotPending(String),
    #[error("interception queue consumer dropped")]
    ConsumerGone,
}

/// Errors surfaced directly to a command-surface caller for a missing entity.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("flow {0} not found")]
    Flow(String),
    #[error("step {0} not found")]
    Step(String),
    #[error("transaction {0} not found")]
    Transaction(String),
}
