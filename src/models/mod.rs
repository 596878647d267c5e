//! Shared data types for the transaction store and the flow engine.

pub mod flow;
pub mod transaction;

pub use flow::*;
pub use transaction::*;
