//! In-memory state: the transaction log and the flow set, each independent
//! but shared process-wide through a single `AppState` handle.

mod flows;
mod transactions;

pub use flows::FlowStore;
pub use transactions::{TransactionMetadata, TransactionStore};

use crate::events::EventBus;
use crate::intercept::InterceptionEngine;
use std::sync::Arc;

/// Everything a command handler needs: the shared event bus plus both
/// stores and the interception engine. Cloning is cheap — every field is
/// `Arc`-backed.
#[derive(Clone)]
pub struct AppState {
    pub events: EventBus,
    pub transactions: Arc<TransactionStore>,
    pub flows: Arc<FlowStore>,
    pub intercept: Arc<InterceptionEngine>,
}

impl AppState {
    pub fn new() -> Self {
        let events = EventBus::new();
        Self {
            transactions: Arc::new(TransactionStore::new(events.clone())),
            flows: Arc::new(FlowStore::new()),
            intercept: Arc::new(InterceptionEngine::new(events.clone())),
            events,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
