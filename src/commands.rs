//! Command surface: thin async functions wiring `AppState`, the
//! certificate authority, the running proxy handle, and the flow engine to
//! every operation a host application would call. Grounded on
//! `api/proxy_api.rs`'s shape — one function per operation,
//! `anyhow::Result` at the boundary, no business logic living here beyond
//! argument plumbing.
//!
//! This crate stops at this Rust-level API boundary; there is no FFI or
//! GUI binding layer generated over it.

use crate::ca::CertificateAuthority;
use crate::chunked::{get_chunk, ChunkPayload};
use crate::config::ProxyConfig;
use crate::error::NotFoundError;
use crate::flow::FlowEngine;
use crate::intercept::PendingTransaction;
use crate::models::{
    ChefAction, ChefStep, Flow, FlowStep, HTTPRequest, HTTPTransaction, RequestStep,
    SortColumn, SortDirection, TransactionFilter, TransactionSummary, VariableMap,
};
use crate::proxy::{run_server, ProxyHandle};
use crate::store::{AppState, TransactionMetadata};
use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

// ---- Proxy lifecycle -------------------------------------------------

pub async fn start_proxy(config: ProxyConfig, ca: Arc<CertificateAuthority>, state: AppState) -> Result<ProxyHandle> {
    run_server(config, ca, state).await.context("starting proxy")
}

pub fn stop_proxy(handle: &ProxyHandle, state: &AppState) {
    crate::proxy::server::stop_and_drain(handle, state);
}

pub fn proxy_is_running(handle: &ProxyHandle) -> bool {
    handle.is_running()
}

pub fn root_cert_pem(ca: &CertificateAuthority) -> String {
    ca.root_cert_pem().to_string()
}

// ---- Interception ------------------------------------------------------

pub fn set_intercept_enabled(state: &AppState, enabled: bool) {
    state.intercept.set_enabled(enabled);
}

pub fn get_intercept_enabled(state: &AppState) -> bool {
    state.intercept.get_enabled()
}

pub fn list_pending_interceptions(state: &AppState) -> Vec<PendingTransaction> {
    state.intercept.list_pending()
}

pub fn forward_as_is(state: &AppState, id: Uuid) -> Result<()> {
    state.intercept.forward_as_is(id).context("forwarding pending transaction")
}

pub fn forward_modified(state: &AppState, id: Uuid, new_dump: Vec<u8>) -> Result<()> {
    state.intercept.forward_modified(id, new_dump).context("forwarding modified transaction")
}

pub fn forward_and_wait_for_response(state: &AppState, id: Uuid, new_dump: Vec<u8>) -> Result<()> {
    state
        .intercept
        .forward_and_wait_for_response(id, new_dump)
        .context("forwarding and waiting for response")
}

pub fn modify_response(state: &AppState, id: Uuid, new_dump: Vec<u8>) -> Result<()> {
    state.intercept.modify_response(id, new_dump).context("modifying intercepted response")
}

pub fn drop_transaction(state: &AppState, id: Uuid) -> Result<()> {
    state.intercept.drop(id).context("dropping pending transaction")
}

pub fn copy_pending_to_clipboard(state: &AppState, id: Uuid) -> Result<Vec<u8>> {
    state.intercept.copy_to_clipboard(id).context("reading pending transaction")
}

pub fn copy_pending_to_current_flow(state: &AppState, id: Uuid, position: usize, host: String, tls: bool) -> Result<Flow> {
    let dump = state.intercept.copy_to_current_flow(id).context("reading pending transaction")?;
    let flow_id = state.flows.get_selected().ok_or_else(|| NotFoundError::Flow("<none selected>".to_string()))?.id;
    let request_step = RequestStep::new(host, tls, dump);
    state
        .flows
        .paste_request_at(flow_id, position, request_step)
        .context("pasting request into flow")
}

// ---- Transactions --------------------------------------------------------

pub async fn list_transactions(state: &AppState) -> Vec<TransactionSummary> {
    state.transactions.list_summaries().await
}

pub async fn list_transactions_after(state: &AppState, id: Uuid) -> Vec<TransactionSummary> {
    state.transactions.list_after(id).await
}

pub async fn get_transaction(state: &AppState, id: Uuid) -> Result<HTTPTransaction> {
    state.transactions.get(id).await.ok_or_else(|| NotFoundError::Transaction(id.to_string()).into())
}

pub async fn get_transaction_metadata(state: &AppState, id: Uuid) -> Result<TransactionMetadata> {
    state
        .transactions
        .get_metadata(id)
        .await
        .ok_or_else(|| NotFoundError::Transaction(id.to_string()).into())
}

pub async fn get_transaction_chunk(state: &AppState, id: Uuid, kind: crate::chunked::ChunkKind, index: usize) -> Result<ChunkPayload> {
    let tx = get_transaction(state, id).await?;
    let dump = match kind {
        crate::chunked::ChunkKind::Request => &tx.request_dump,
        crate::chunked::ChunkKind::Response => tx.response_dump.as_ref().ok_or_else(|| NotFoundError::Transaction(id.to_string()))?,
    };
    Ok(get_chunk(dump, index))
}

pub async fn search_transactions(
    state: &AppState,
    filter: TransactionFilter,
    sort_col: SortColumn,
    sort_dir: Option<SortDirection>,
) -> Vec<TransactionSummary> {
    state.transactions.search(&filter, sort_col, sort_dir).await
}

// ---- Flows ---------------------------------------------------------------

pub fn list_flows(state: &AppState) -> Vec<Flow> {
    state.flows.list()
}

pub fn create_flow(state: &AppState, name: Option<String>) -> Flow {
    state.flows.create(name)
}

pub fn delete_flow(state: &AppState, id: Uuid) -> Result<()> {
    state.flows.delete(id).context("deleting flow")
}

pub fn rename_flow(state: &AppState, id: Uuid, name: String) -> Result<Flow> {
    state.flows.rename(id, name).context("renaming flow")
}

pub fn duplicate_flow(state: &AppState, id: Uuid) -> Result<Flow> {
    state.flows.duplicate(id).context("duplicating flow")
}

pub fn get_flow(state: &AppState, id: Uuid) -> Result<Flow> {
    state.flows.get(id).context("fetching flow")
}

pub fn update_flow(state: &AppState, flow: Flow) -> Result<Flow> {
    state.flows.update(flow).context("updating flow")
}

pub fn set_selected_flow(state: &AppState, id: Uuid) -> Result<()> {
    state.flows.set_selected(id).context("selecting flow")
}

pub fn get_selected_flow(state: &AppState) -> Option<Flow> {
    state.flows.get_selected()
}

pub fn add_flow_step(state: &AppState, id: Uuid, step: FlowStep) -> Result<Flow> {
    state.flows.add_step(id, step).context("adding flow step")
}

pub fn insert_flow_step(state: &AppState, id: Uuid, step: FlowStep, position: usize) -> Result<Flow> {
    state.flows.insert_step(id, step, position).context("inserting flow step")
}

pub fn delete_flow_step(state: &AppState, id: Uuid, index: usize) -> Result<Flow> {
    state.flows.delete_step(id, index).context("deleting flow step")
}

pub fn paste_request_at(state: &AppState, id: Uuid, position: usize, request: HTTPRequest) -> Result<Flow> {
    let request_step = RequestStep::new(request.host, request.tls, request.dump);
    state.flows.paste_request_at(id, position, request_step).context("pasting request into flow")
}

pub fn update_chef_step(state: &AppState, id: Uuid, step_id: Uuid, chef: ChefStep) -> Result<Flow> {
    state.flows.update_chef_step(id, step_id, chef).context("updating chef step")
}

pub fn add_chef_action(state: &AppState, id: Uuid, step_id: Uuid, action: ChefAction) -> Result<Flow> {
    state.flows.add_chef_action(id, step_id, action).context("adding chef action")
}

pub fn remove_chef_action(state: &AppState, id: Uuid, step_id: Uuid, action_id: Uuid) -> Result<Flow> {
    state.flows.remove_chef_action(id, step_id, action_id).context("removing chef action")
}

pub fn update_chef_action(state: &AppState, id: Uuid, step_id: Uuid, action: ChefAction) -> Result<Flow> {
    state.flows.update_chef_action(id, step_id, action).context("updating chef action")
}

pub async fn update_flow_variables(engine: &FlowEngine, id: Uuid, vars: VariableMap) -> Result<Flow> {
    engine.update_variables(id, vars).await.context("updating flow variables")
}

pub async fn execute_flow(engine: &FlowEngine, id: Uuid) -> Result<Flow> {
    engine.execute(id).await.context("executing flow")
}

pub async fn execute_flow_step(engine: &FlowEngine, id: Uuid, step_index: usize) -> Result<crate::models::ExecutionResult> {
    engine.execute_step(id, step_index).await.context("executing flow step")
}

pub async fn start_fuzzing(engine: &FlowEngine, flow_id: Uuid, step_id: Uuid) -> Result<()> {
    engine.start_fuzzing(flow_id, step_id).await.context("starting fuzz run")
}

pub fn stop_fuzzing(engine: &FlowEngine) {
    engine.stop_fuzzing();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_list_flow_round_trips() {
        let state = AppState::new();
        let flow = create_flow(&state, Some("My Flow".to_string()));
        let flows = list_flows(&state);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].id, flow.id);
    }

    #[tokio::test]
    async fn execute_flow_runs_chef_step_end_to_end() {
        let state = AppState::new();
        let engine = FlowEngine::new(state.clone());
        let flow = create_flow(&state, None);

        let mut vars = VariableMap::new();
        vars.set("raw", "hello");
        update_flow_variables(&engine, flow.id, vars).await.unwrap();

        let chef_step = ChefStep {
            input_variable: "raw".to_string(),
            actions: vec![ChefAction {
                id: Uuid::new_v4(),
                action_type: "to-upper-case".to_string(),
                options: serde_json::json!({}),
                preview: None,
            }],
            output_variable: "shout".to_string(),
        };
        add_flow_step(&state, flow.id, FlowStep::chef("shout it", chef_step)).unwrap();

        let result_flow = execute_flow(&engine, flow.id).await.unwrap();
        assert_eq!(result_flow.variables.get("shout"), Some("HELLO"));
        assert_eq!(result_flow.execution_results.len(), 1);
        assert!(result_flow.execution_results[0].success);
    }

    #[tokio::test]
    async fn get_transaction_for_unknown_id_is_not_found() {
        let state = AppState::new();
        let result = get_transaction(&state, Uuid::new_v4()).await;
        assert!(result.is_err());
    }
}
