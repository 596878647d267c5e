//! Interception engine: a single enable switch plus a queue of
//! transactions parked for a human decision.
//!
//! Grounded on `proxy/breakpoints.rs`'s `BreakpointManager` — the same
//! `Mutex<HashMap<_, oneshot::Sender<_>>>` rendezvous, the same "resolve
//! removes the pending entry and sends" shape — but with the rule-matching
//! layer (`BreakpointRule::{method,host_contains,path_contains}`) removed
//! entirely: there are no automatic break rules here, only a master
//! on/off switch that gates every captured transaction.

use crate::error::InterceptError;
use crate::events::{Event, EventBus};
use std::collections::HashMap;
use std::sync::{atomic::{AtomicBool, Ordering}, Mutex};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Which leg of a transaction a pending entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptPhase {
    Request,
    Response,
}

/// Resolution of a parked transaction, delivered to whichever task is
/// awaiting `enqueue`.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Forward `dump` unmodified or edited. `intercept_response` requests
    /// that the response leg of this same transaction also be parked
    /// (`forward_and_wait_for_response`).
    Forward { dump: Vec<u8>, intercept_response: bool },
    Drop,
}

/// Snapshot of a parked transaction, safe to hand to `list_pending` callers
/// without exposing the resolver.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: Uuid,
    pub phase: InterceptPhase,
    pub dump: Vec<u8>,
}

struct PendingEntry {
    phase: InterceptPhase,
    dump: Vec<u8>,
    resolver: oneshot::Sender<Decision>,
}

pub struct InterceptionEngine {
    enabled: AtomicBool,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    events: EventBus,
}

impl InterceptionEngine {
    pub fn new(events: EventBus) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.forward_all_as_is();
        }
    }

    pub fn get_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Park `dump` for a human decision and await it. Returns
    /// `Decision::Forward { dump, .. }` unmodified when interception is
    /// globally disabled — callers always go through `enqueue` so the
    /// enabled check lives in one place.
    pub async fn enqueue(&self, id: Uuid, phase: InterceptPhase, dump: Vec<u8>) -> Decision {
        if !self.get_enabled() {
            return Decision::Forward { dump, intercept_response: false };
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(id, PendingEntry { phase, dump, resolver: tx });
        }
        self.events.publish(Event::InterceptPendingChanged);

        match rx.await {
            Ok(decision) => decision,
            // Consumer dropped (e.g. engine disabled mid-wait) — fail open
            // rather than hang the connection task forever.
            Err(_) => Decision::Forward { dump: self.take_dump_or_empty(id), intercept_response: false },
        }
    }

    fn take_dump_or_empty(&self, id: Uuid) -> Vec<u8> {
        self.pending
            .lock()
            .unwrap()
            .remove(&id)
            .map(|e| e.dump)
            .unwrap_or_default()
    }

    pub fn list_pending(&self) -> Vec<PendingTransaction> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| PendingTransaction { id: *id, phase: entry.phase, dump: entry.dump.clone() })
            .collect()
    }

    pub fn forward_as_is(&self, id: Uuid) -> Result<(), InterceptError> {
        self.resolve_with(id, |dump| Decision::Forward { dump, intercept_response: false })
    }

    pub fn forward_modified(&self, id: Uuid, new_dump: Vec<u8>) -> Result<(), InterceptError> {
        self.resolve(id, Decision::Forward { dump: new_dump, intercept_response: false })
    }

    /// Forward the edited request and also park its response for review.
    pub fn forward_and_wait_for_response(&self, id: Uuid, new_dump: Vec<u8>) -> Result<(), InterceptError> {
        self.resolve(id, Decision::Forward { dump: new_dump, intercept_response: true })
    }

    /// Resolve a response-phase pending entry with an edited response body.
    pub fn modify_response(&self, id: Uuid, new_dump: Vec<u8>) -> Result<(), InterceptError> {
        self.resolve(id, Decision::Forward { dump: new_dump, intercept_response: false })
    }

    pub fn drop(&self, id: Uuid) -> Result<(), InterceptError> {
        self.resolve(id, Decision::Drop)
    }

    /// Read-only: the raw dump of a pending transaction, for the UI's copy
    /// button. Does not resolve the pending decision.
    pub fn copy_to_clipboard(&self, id: Uuid) -> Result<Vec<u8>, InterceptError> {
        self.pending
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.dump.clone())
            .ok_or_else(|| InterceptError::NotPending(id.to_string()))
    }

    /// Read-only: the pending request's dump, ready to be handed to
    /// `FlowStore::paste_request_at` as a new `RequestStep`. Does not
    /// resolve the pending decision.
    pub fn copy_to_current_flow(&self, id: Uuid) -> Result<Vec<u8>, InterceptError> {
        self.copy_to_clipboard(id)
    }

    fn resolve(&self, id: Uuid, decision: Decision) -> Result<(), InterceptError> {
        let entry = self
            .pending
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| InterceptError::NotPending(id.to_string()))?;
        self.events.publish(Event::InterceptPendingChanged);
        entry
            .resolver
            .send(decision)
            .map_err(|_| InterceptError::ConsumerGone)
    }

    fn resolve_with(&self, id: Uuid, f: impl FnOnce(Vec<u8>) -> Decision) -> Result<(), InterceptError> {
        let dump = self
            .pending
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.dump.clone())
            .ok_or_else(|| InterceptError::NotPending(id.to_string()))?;
        self.resolve(id, f(dump))
    }

    /// Drain every pending entry as `forward-as-is` — called when
    /// interception is switched off so no connection task is left hanging.
    /// Proxy shutdown routes through the same shape with `Decision::Drop`
    /// instead (see `drop_all_pending`).
    fn forward_all_as_is(&self) {
        let entries: Vec<(Uuid, PendingEntry)> = self.pending.lock().unwrap().drain().collect();
        for (_, entry) in entries {
            let _ = entry.resolver.send(Decision::Forward { dump: entry.dump, intercept_response: false });
        }
        self.events.publish(Event::InterceptPendingChanged);
    }

    /// Drain every pending entry as a drop — used on proxy shutdown.
    pub fn drop_all_pending(&self) {
        let entries: Vec<(Uuid, PendingEntry)> = self.pending.lock().unwrap().drain().collect();
        for (_, entry) in entries {
            let _ = entry.resolver.send(Decision::Drop);
        }
        self.events.publish(Event::InterceptPendingChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_engine_forwards_without_parking() {
        let engine = InterceptionEngine::new(EventBus::new());
        let id = Uuid::new_v4();
        let decision = engine.enqueue(id, InterceptPhase::Request, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await;
        assert!(matches!(decision, Decision::Forward { intercept_response: false, .. }));
        assert!(engine.list_pending().is_empty());
    }

    #[tokio::test]
    async fn enqueue_parks_until_forward_as_is() {
        let engine = std::sync::Arc::new(InterceptionEngine::new(EventBus::new()));
        engine.set_enabled(true);
        let id = Uuid::new_v4();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enqueue(id, InterceptPhase::Request, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await })
        };

        while engine.list_pending().is_empty() {
            tokio::task::yield_now().await;
        }
        engine.forward_as_is(id).unwrap();

        let decision = waiter.await.unwrap();
        match decision {
            Decision::Forward { dump, intercept_response } => {
                assert_eq!(dump, b"GET / HTTP/1.1\r\n\r\n");
                assert!(!intercept_response);
            }
            Decision::Drop => panic!("expected forward"),
        }
    }

    #[tokio::test]
    async fn forward_modified_replaces_dump() {
        let engine = std::sync::Arc::new(InterceptionEngine::new(EventBus::new()));
        engine.set_enabled(true);
        let id = Uuid::new_v4();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enqueue(id, InterceptPhase::Request, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await })
        };
        while engine.list_pending().is_empty() {
            tokio::task::yield_now().await;
        }
        engine.forward_modified(id, b"GET /edited HTTP/1.1\r\n\r\n".to_vec()).unwrap();

        match waiter.await.unwrap() {
            Decision::Forward { dump, .. } => assert_eq!(dump, b"GET /edited HTTP/1.1\r\n\r\n"),
            Decision::Drop => panic!("expected forward"),
        }
    }

    #[tokio::test]
    async fn drop_resolves_with_drop_decision() {
        let engine = std::sync::Arc::new(InterceptionEngine::new(EventBus::new()));
        engine.set_enabled(true);
        let id = Uuid::new_v4();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enqueue(id, InterceptPhase::Request, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await })
        };
        while engine.list_pending().is_empty() {
            tokio::task::yield_now().await;
        }
        engine.drop(id).unwrap();

        assert!(matches!(waiter.await.unwrap(), Decision::Drop));
    }

    #[tokio::test]
    async fn disabling_mid_flight_forwards_pending_entries() {
        let engine = std::sync::Arc::new(InterceptionEngine::new(EventBus::new()));
        engine.set_enabled(true);
        let id = Uuid::new_v4();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enqueue(id, InterceptPhase::Request, b"GET / HTTP/1.1\r\n\r\n".to_vec()).await })
        };
        while engine.list_pending().is_empty() {
            tokio::task::yield_now().await;
        }
        engine.set_enabled(false);

        assert!(matches!(waiter.await.unwrap(), Decision::Forward { .. }));
    }

    #[test]
    fn forward_as_is_on_unknown_id_errors() {
        let engine = InterceptionEngine::new(EventBus::new());
        assert!(engine.forward_as_is(Uuid::new_v4()).is_err());
    }
}
