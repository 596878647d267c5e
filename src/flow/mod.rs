//! Flow execution engine (spec §4.7): runs a flow's steps in order over a
//! shared variable scope, dispatching request/script/chef steps and driving
//! the fuzz-mode request loop.
//!
//! The request-step sender is grounded on the teacher's old `replay`
//! module's `reqwest`-based direct-request path (build a client once,
//! accept any upstream certificate, time the round trip) — generalized
//! from "replay one captured request" to "send a flow's templated request
//! and turn the response back into a dump". Flow-produced transactions
//! never reach `TransactionStore`: spec keeps them off the proxy history
//! stream, so `ExecutionResult.transaction` is just a fresh id and the
//! actual bytes sent live in `actual_raw_request`.

pub mod chef;
pub mod script;
pub mod suggest;

use crate::error::{FlowStepError, NotFoundError};
use crate::events::{Event, FuzzUpdatePayload, StepExecutedPayload};
use crate::http;
use crate::models::{
    substitute, ChefStep, ExecutionResult, ExtractSource, Flow, FlowStep, FuzzResult,
    HTTPRequest, HTTPTransaction, RequestStep, StepKind, VariableExtract, VariableMap,
};
use crate::store::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use suggest::{PhantomSuggester, SameHostRecencySuggester};
use uuid::Uuid;

/// Everything the executor needs beyond `AppState`: an outbound HTTP
/// client that trusts any certificate (a flow deliberately talks straight
/// to the target, not through the intercepting proxy) and the fuzz-run
/// control flags.
#[derive(Clone)]
pub struct FlowEngine {
    state: AppState,
    http_client: reqwest::Client,
    suggester: Arc<dyn PhantomSuggester>,
    fuzz_active: Arc<AtomicBool>,
    fuzz_cancel: Arc<AtomicBool>,
}

impl FlowEngine {
    pub fn new(state: AppState) -> Self {
        let http_client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client config carries no user input that could make building fail");

        Self {
            state,
            http_client,
            suggester: Arc::new(SameHostRecencySuggester::default()),
            fuzz_active: Arc::new(AtomicBool::new(false)),
            fuzz_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run every step of `flow_id` in order, persisting both the run's
    /// `execution_results` and the final variable scope (untouched keys
    /// survive because `vars` starts as a clone of the stored map).
    pub async fn execute(&self, flow_id: Uuid) -> Result<Flow, NotFoundError> {
        let flow = self.state.flows.get(flow_id)?;
        let mut vars = flow.variables.clone();
        let mut results = Vec::with_capacity(flow.steps.len());

        for (index, step) in flow.steps.iter().enumerate() {
            if !step.selected {
                continue;
            }
            let result = self.execute_one_step(flow_id, step, &mut vars).await;
            results.push(result);

            self.state.events.publish(Event::FlowStepExecuted(StepExecutedPayload {
                flow_id,
                current_step_index: index,
                results: results.clone(),
            }));
        }

        let mut updated = self.state.flows.get(flow_id)?;
        updated.variables = vars;
        updated.execution_results = results;
        self.state.flows.update(updated)
    }

    /// Run a single step in isolation. Unlike `execute`, the flow's stored
    /// variable scope is left untouched — a single-step run is for
    /// inspecting one step's behavior, not advancing the flow.
    pub async fn execute_step(&self, flow_id: Uuid, step_index: usize) -> Result<ExecutionResult, NotFoundError> {
        let flow = self.state.flows.get(flow_id)?;
        let step = flow
            .steps
            .get(step_index)
            .cloned()
            .ok_or_else(|| NotFoundError::Step(step_index.to_string()))?;
        let mut vars = flow.variables.clone();

        let result = self.execute_one_step(flow_id, &step, &mut vars).await;

        self.state.events.publish(Event::FlowStepExecuted(StepExecutedPayload {
            flow_id,
            current_step_index: step_index,
            results: vec![result.clone()],
        }));

        Ok(result)
    }

    /// Replace a flow's variable map and re-execute any chef steps whose
    /// `inputVariable` is one of the replaced keys (spec §4.6). Chef steps
    /// run in step order over a scope seeded from the newly stored map, so
    /// one re-executed chef's output is visible to a later one.
    pub async fn update_variables(&self, flow_id: Uuid, vars: VariableMap) -> Result<Flow, NotFoundError> {
        let changed_keys: Vec<String> = vars.iter().map(|(k, _)| k.to_string()).collect();
        let flow = self.state.flows.update_variables(flow_id, vars)?;

        let mut scope = flow.variables.clone();
        let mut reran_any = false;

        for step in &flow.steps {
            if step.kind != StepKind::Chef {
                continue;
            }
            let Some(chef_step) = &step.chef_step else { continue };
            if !changed_keys.iter().any(|k| k == &chef_step.input_variable) {
                continue;
            }
            if let Ok(previews) = self.run_chef_step(chef_step, &mut scope) {
                self.persist_chef_previews(flow_id, step.id, chef_step, &previews);
                reran_any = true;
            }
        }

        if !reran_any {
            return Ok(flow);
        }

        let mut updated = self.state.flows.get(flow_id)?;
        updated.variables = scope;
        self.state.flows.update(updated)
    }

    async fn execute_one_step(&self, flow_id: Uuid, step: &FlowStep, vars: &mut VariableMap) -> ExecutionResult {
        let start = Instant::now();

        match step.kind {
            StepKind::Request => {
                let Some(request_step) = &step.request_step else {
                    return failed_result(step.id, start, "request step has no request body".to_string());
                };

                if request_step.is_fuzz_mode {
                    self.run_fuzz_as_step(flow_id, step.id, start).await
                } else {
                    self.run_request_step(step.id, request_step, vars, start).await
                }
            }
            StepKind::Script => {
                let Some(script_step) = &step.script_step else {
                    return failed_result(step.id, start, "script step has no script body".to_string());
                };
                match script::eval_script(&script_step.content, vars, flow_id, step.id) {
                    Ok(()) => success_result(step.id, start, vars, None, None),
                    Err(e) => failed_result(step.id, start, e.to_string()),
                }
            }
            StepKind::Chef => {
                let Some(chef_step) = &step.chef_step else {
                    return failed_result(step.id, start, "chef step has no chef body".to_string());
                };
                match self.run_chef_step(chef_step, vars) {
                    Ok(previews) => {
                        self.persist_chef_previews(flow_id, step.id, chef_step, &previews);
                        success_result(step.id, start, vars, None, None)
                    }
                    Err(e) => failed_result(step.id, start, e.to_string()),
                }
            }
        }
    }

    async fn run_request_step(
        &self,
        step_id: Uuid,
        request_step: &RequestStep,
        vars: &mut VariableMap,
        start: Instant,
    ) -> ExecutionResult {
        let raw_request = build_request_dump(request_step, vars, None);

        match self.send_raw(&request_step.host, request_step.tls, &raw_request).await {
            Ok((mut response_dump, ..)) => {
                if request_step.gunzip_response {
                    response_dump = decompressed_dump(&response_dump);
                }

                for extract in &request_step.variable_extracts {
                    if let Some(value) = extract_variable(extract, &response_dump) {
                        vars.set(extract.name.clone(), value);
                    }
                }

                success_result(step_id, start, vars, Some(Uuid::new_v4()), Some(raw_request))
            }
            Err(e) => failed_result(step_id, start, e.to_string()),
        }
    }

    fn run_chef_step(&self, chef_step: &ChefStep, vars: &mut VariableMap) -> Result<Vec<String>, FlowStepError> {
        let input = vars.get(&chef_step.input_variable).unwrap_or("").to_string();
        let (output, previews) = chef::run_pipeline(&chef_step.actions, &input)?;
        vars.set(chef_step.output_variable.clone(), output);
        Ok(previews)
    }

    fn persist_chef_previews(&self, flow_id: Uuid, step_id: Uuid, chef_step: &ChefStep, previews: &[String]) {
        let mut updated = chef_step.clone();
        for (action, preview) in updated.actions.iter_mut().zip(previews.iter()) {
            action.preview = Some(preview.clone());
        }
        let _ = self.state.flows.update_chef_step(flow_id, step_id, updated);
    }

    /// Send a flow-templated raw request straight to its target, bypassing
    /// the intercepting proxy entirely, and reconstruct the response as a
    /// dump. Returns `(response_dump, status_code, elapsed_ms)`.
    async fn send_raw(&self, host: &str, tls: bool, raw_request: &[u8]) -> Result<(Vec<u8>, Option<u16>, u64), FlowStepError> {
        let parsed = http::parse_raw_request(raw_request).map_err(|e| FlowStepError::UpstreamTransport(e.to_string()))?;

        let scheme = if tls { "https" } else { "http" };
        let url = if parsed.path.starts_with("http://") || parsed.path.starts_with("https://") {
            parsed.path.clone()
        } else {
            format!("{scheme}://{host}{}", parsed.path)
        };

        let method = reqwest::Method::from_bytes(parsed.method.as_bytes())
            .map_err(|e| FlowStepError::UpstreamTransport(e.to_string()))?;

        let mut builder = self.http_client.request(method, &url);
        for (name, value) in &parsed.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !parsed.body.is_empty() {
            builder = builder.body(parsed.body.clone());
        }

        let started_at = Instant::now();
        let response = builder.send().await.map_err(|e| FlowStepError::UpstreamTransport(e.to_string()))?;
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| FlowStepError::UpstreamTransport(e.to_string()))?;
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        let version_str = match version {
            reqwest::Version::HTTP_09 => "HTTP/0.9",
            reqwest::Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };

        let mut dump = Vec::with_capacity(body.len() + 256);
        dump.extend_from_slice(
            format!("{version_str} {} {}\r\n", status.as_u16(), status.canonical_reason().unwrap_or("")).as_bytes(),
        );
        for (name, value) in headers.iter() {
            dump.extend_from_slice(format!("{}: {}\r\n", name, value.to_str().unwrap_or("")).as_bytes());
        }
        dump.extend_from_slice(b"\r\n");
        dump.extend_from_slice(&body);

        Ok((dump, Some(status.as_u16()), elapsed_ms))
    }

    /// Begin a fuzz run for `step_id` in `flow_id`. Returns `FuzzBusy` if a
    /// run is already active — only one fuzz run is allowed process-wide
    /// (spec §4.7).
    pub async fn start_fuzzing(&self, flow_id: Uuid, step_id: Uuid) -> Result<(), FlowStepError> {
        if self.fuzz_active.swap(true, Ordering::SeqCst) {
            return Err(FlowStepError::FuzzBusy);
        }
        self.fuzz_cancel.store(false, Ordering::SeqCst);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_fuzz_loop(flow_id, step_id).await;
            engine.fuzz_active.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Request cancellation of the active fuzz run. The loop checks this
    /// flag between words, so cancellation is cooperative, not immediate.
    pub fn stop_fuzzing(&self) {
        self.fuzz_cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_fuzzing(&self) -> bool {
        self.fuzz_active.load(Ordering::SeqCst)
    }

    async fn run_fuzz_loop(&self, flow_id: Uuid, step_id: Uuid) {
        let Ok(flow) = self.state.flows.get(flow_id) else { return };
        let vars = flow.variables.clone();

        let Some(step) = flow.steps.iter().find(|s| s.id == step_id) else { return };
        let Some(request_step) = &step.request_step else { return };
        let Some(fuzz_settings) = &request_step.fuzz_settings else { return };

        let host = request_step.host.clone();
        let tls = request_step.tls;
        let template = request_step.request.clone();
        let wordlist = fuzz_settings.wordlist.clone();
        let delay = Duration::from_secs_f64(fuzz_settings.delay_secs.max(0.0));

        let mut results: Vec<FuzzResult> = Vec::with_capacity(wordlist.len());

        for word in wordlist {
            if self.fuzz_cancel.load(Ordering::SeqCst) {
                break;
            }

            let raw_request = build_request_dump_from(&template, &vars, Some(&word));

            let result = match self.send_raw(&host, tls, &raw_request).await {
                Ok((response_dump, status_code, time_ms)) => FuzzResult {
                    word,
                    size: Some(response_dump.len() as u64),
                    request: raw_request,
                    response: Some(response_dump),
                    status_code,
                    time_ms,
                },
                Err(_) => FuzzResult {
                    word,
                    request: raw_request,
                    response: None,
                    status_code: None,
                    size: None,
                    time_ms: 0,
                },
            };
            results.push(result);

            self.persist_fuzz_results(flow_id, step_id, &results);
            self.state.events.publish(Event::FlowFuzzUpdate(FuzzUpdatePayload {
                step_id,
                fuzz_results: results.clone(),
                is_fuzzing: true,
            }));

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.state.events.publish(Event::FlowFuzzUpdate(FuzzUpdatePayload {
            step_id,
            fuzz_results: results,
            is_fuzzing: false,
        }));
    }

    fn persist_fuzz_results(&self, flow_id: Uuid, step_id: Uuid, results: &[FuzzResult]) {
        if let Ok(mut flow) = self.state.flows.get(flow_id) {
            if let Some(step) = flow.steps.iter_mut().find(|s| s.id == step_id) {
                if let Some(request_step) = step.request_step.as_mut() {
                    if let Some(fuzz_settings) = request_step.fuzz_settings.as_mut() {
                        fuzz_settings.results = results.to_vec();
                    }
                }
            }
            let _ = self.state.flows.update(flow);
        }
    }

    /// A fuzz-mode request step always drives the fuzz loop instead of a
    /// single send, whether reached through `execute` or `execute_step`
    /// (spec §4.7); run to completion here so the surrounding step loop
    /// stays sequential.
    async fn run_fuzz_as_step(&self, flow_id: Uuid, step_id: Uuid, start: Instant) -> ExecutionResult {
        match self.start_fuzzing(flow_id, step_id).await {
            Ok(()) => {
                while self.is_fuzzing() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                ExecutionResult {
                    step_id,
                    success: true,
                    error_message: None,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                    variables: HashMap::new(),
                    transaction: None,
                    actual_raw_request: None,
                }
            }
            Err(e) => failed_result(step_id, start, e.to_string()),
        }
    }

    pub fn suggest_next_requests(&self, host: &str, last_tx: &HTTPTransaction, history: &[HTTPTransaction]) -> Vec<HTTPRequest> {
        self.suggester.suggest(host, last_tx, history)
    }
}

fn build_request_dump(request_step: &RequestStep, vars: &VariableMap, fuzz_value: Option<&str>) -> Vec<u8> {
    let substituted = substitute(&String::from_utf8_lossy(&request_step.request), vars, fuzz_value);
    let raw = substituted.into_bytes();
    if request_step.recalculate_content_length {
        let (_, body) = http::split_headers_body(&raw);
        http::update_content_length(&raw, body.len())
    } else {
        raw
    }
}

/// Same as `build_request_dump` but for the fuzz loop, which only has the
/// raw template bytes on hand — recalculation is always on for fuzz sends
/// since `{{fuzz}}` routinely changes the body length.
fn build_request_dump_from(template: &[u8], vars: &VariableMap, fuzz_value: Option<&str>) -> Vec<u8> {
    let substituted = substitute(&String::from_utf8_lossy(template), vars, fuzz_value);
    let raw = substituted.into_bytes();
    let (_, body) = http::split_headers_body(&raw);
    http::update_content_length(&raw, body.len())
}

fn success_result(
    step_id: Uuid,
    start: Instant,
    vars: &VariableMap,
    transaction: Option<Uuid>,
    actual_raw_request: Option<Vec<u8>>,
) -> ExecutionResult {
    ExecutionResult {
        step_id,
        success: true,
        error_message: None,
        execution_time_ms: start.elapsed().as_millis() as u64,
        variables: vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        transaction,
        actual_raw_request,
    }
}

fn failed_result(step_id: Uuid, start: Instant, message: String) -> ExecutionResult {
    ExecutionResult {
        step_id,
        success: false,
        error_message: Some(message),
        execution_time_ms: start.elapsed().as_millis() as u64,
        variables: HashMap::new(),
        transaction: None,
        actual_raw_request: None,
    }
}

/// Reconstruct a response dump with its body decompressed per
/// `Content-Encoding`, dropping the encoding and updating `Content-Length`
/// to match — the flow engine's own copy of this logic rather than
/// `http::make_printable`, since it needs real bytes to extract variables
/// from and to store in `ExecutionResult`, not a lossy display string.
fn decompressed_dump(response_dump: &[u8]) -> Vec<u8> {
    let Ok(parsed) = http::parse_raw_response(response_dump) else {
        return response_dump.to_vec();
    };
    let Some(encoding) = parsed.header("content-encoding").map(|s| s.to_string()) else {
        return response_dump.to_vec();
    };
    let Ok(decompressed) = http::decompress(&parsed.body, &encoding) else {
        return response_dump.to_vec();
    };

    let mut out = Vec::with_capacity(decompressed.len() + 256);
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", parsed.status_code, parsed.reason).as_bytes());
    for (name, value) in &parsed.headers {
        if name.eq_ignore_ascii_case("content-encoding") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", decompressed.len()).as_bytes());
    out.extend_from_slice(&decompressed);
    out
}

fn extract_variable(extract: &VariableExtract, response_dump: &[u8]) -> Option<String> {
    let parsed = http::parse_raw_response(response_dump).ok()?;

    match extract.source {
        ExtractSource::Status => Some(parsed.status_code.to_string()),
        ExtractSource::Header => parsed.header(&extract.selector).map(|s| s.to_string()),
        ExtractSource::Cookie => parsed
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
            .find_map(|(_, value)| extract_cookie_value(value, &extract.selector)),
        ExtractSource::BodyJson => {
            let json: serde_json::Value = serde_json::from_slice(&parsed.body).ok()?;
            extract_json_path(&json, &extract.selector)
        }
        ExtractSource::BodyRegex => {
            let body_text = String::from_utf8_lossy(&parsed.body);
            let re = regex::Regex::new(&extract.selector).ok()?;
            let caps = re.captures(&body_text)?;
            caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().to_string())
        }
    }
}

fn extract_cookie_value(set_cookie: &str, name: &str) -> Option<String> {
    let first_pair = set_cookie.split(';').next()?;
    let (cookie_name, cookie_value) = first_pair.split_once('=')?;
    if cookie_name.trim() == name {
        Some(cookie_value.trim().to_string())
    } else {
        None
    }
}

/// Walk a dot-separated path (`data.items.0.id`) through a JSON value,
/// treating numeric segments as array indices.
fn extract_json_path(json: &serde_json::Value, selector: &str) -> Option<String> {
    let mut current = json;
    for segment in selector.split('.').filter(|s| !s.is_empty()) {
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment)?,
        };
    }
    match current {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChefAction;
    use serde_json::json;

    #[test]
    fn json_path_walks_nested_objects_and_arrays() {
        let json = json!({"data": {"items": [{"id": "abc123"}]}});
        assert_eq!(extract_json_path(&json, "data.items.0.id"), Some("abc123".to_string()));
    }

    #[test]
    fn cookie_extract_matches_named_cookie_only() {
        assert_eq!(extract_cookie_value("session=xyz; Path=/; HttpOnly", "session"), Some("xyz".to_string()));
        assert_eq!(extract_cookie_value("other=xyz", "session"), None);
    }

    #[test]
    fn extract_variable_reads_status_and_header() {
        let dump = b"HTTP/1.1 201 Created\r\nX-Request-Id: abc\r\n\r\n".to_vec();
        let status = VariableExtract { name: "s".into(), source: ExtractSource::Status, selector: String::new() };
        let header = VariableExtract { name: "h".into(), source: ExtractSource::Header, selector: "x-request-id".into() };
        assert_eq!(extract_variable(&status, &dump), Some("201".to_string()));
        assert_eq!(extract_variable(&header, &dump), Some("abc".to_string()));
    }

    #[test]
    fn extract_variable_reads_body_json_and_regex() {
        let dump = b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n{\"token\":\"s3cr3t\"}\n".to_vec();
        let json_extract = VariableExtract { name: "t".into(), source: ExtractSource::BodyJson, selector: "token".into() };
        assert_eq!(extract_variable(&json_extract, &dump), Some("s3cr3t".to_string()));

        let regex_extract = VariableExtract {
            name: "t2".into(),
            source: ExtractSource::BodyRegex,
            selector: "token\":\"(\\w+)\"".into(),
        };
        assert_eq!(extract_variable(&regex_extract, &dump), Some("s3cr3t".to_string()));
    }

    #[tokio::test]
    async fn chef_step_execution_updates_output_variable() {
        let state = AppState::new();
        let engine = FlowEngine::new(state.clone());
        let flow = state.flows.create(None);

        let mut vars = VariableMap::new();
        vars.set("raw", "hello");
        let chef_step = ChefStep {
            input_variable: "raw".to_string(),
            actions: vec![ChefAction { id: Uuid::new_v4(), action_type: "to-upper-case".to_string(), options: json!({}), preview: None }],
            output_variable: "upper".to_string(),
        };

        let previews = engine.run_chef_step(&chef_step, &mut vars).unwrap();
        assert_eq!(previews, vec!["HELLO".to_string()]);
        assert_eq!(vars.get("upper"), Some("HELLO"));
        assert!(state.flows.get(flow.id).is_ok());
    }

    #[tokio::test]
    async fn execute_skips_deselected_steps() {
        let state = AppState::new();
        let engine = FlowEngine::new(state.clone());
        let flow = state.flows.create(None);

        let mut vars = VariableMap::new();
        vars.set("raw", "hello");
        state.flows.update_variables(flow.id, vars).unwrap();

        let chef_step = ChefStep {
            input_variable: "raw".to_string(),
            actions: vec![ChefAction { id: Uuid::new_v4(), action_type: "to-upper-case".to_string(), options: json!({}), preview: None }],
            output_variable: "upper".to_string(),
        };
        let mut step = FlowStep::chef("shout it", chef_step);
        step.selected = false;
        state.flows.add_step(flow.id, step).unwrap();

        let result_flow = engine.execute(flow.id).await.unwrap();
        assert_eq!(result_flow.variables.get("upper"), None);
        assert!(result_flow.execution_results.is_empty());
    }

    #[tokio::test]
    async fn update_variables_reruns_chef_steps_reading_the_changed_key() {
        let state = AppState::new();
        let engine = FlowEngine::new(state.clone());
        let flow = state.flows.create(None);

        let chef_step = ChefStep {
            input_variable: "raw".to_string(),
            actions: vec![ChefAction { id: Uuid::new_v4(), action_type: "to-upper-case".to_string(), options: json!({}), preview: None }],
            output_variable: "upper".to_string(),
        };
        state.flows.add_step(flow.id, FlowStep::chef("shout it", chef_step)).unwrap();

        let mut vars = VariableMap::new();
        vars.set("raw", "hello");
        let updated = engine.update_variables(flow.id, vars).await.unwrap();

        assert_eq!(updated.variables.get("upper"), Some("HELLO"));
        assert_eq!(updated.steps[0].chef_step.as_ref().unwrap().actions[0].preview.as_deref(), Some("HELLO"));
    }

    #[tokio::test]
    async fn update_variables_leaves_unrelated_chef_steps_alone() {
        let state = AppState::new();
        let engine = FlowEngine::new(state.clone());
        let flow = state.flows.create(None);

        let chef_step = ChefStep {
            input_variable: "other".to_string(),
            actions: vec![ChefAction { id: Uuid::new_v4(), action_type: "to-upper-case".to_string(), options: json!({}), preview: None }],
            output_variable: "upper".to_string(),
        };
        state.flows.add_step(flow.id, FlowStep::chef("shout it", chef_step)).unwrap();

        let mut vars = VariableMap::new();
        vars.set("raw", "hello");
        let updated = engine.update_variables(flow.id, vars).await.unwrap();

        assert_eq!(updated.variables.get("upper"), None);
    }

    #[tokio::test]
    async fn script_step_failure_is_reported_without_panicking() {
        let flow_id = Uuid::new_v4();
        let step = FlowStep::script("bad script", crate::models::ScriptStep { content: "open(\"x\")".to_string() });
        let state = AppState::new();
        let engine = FlowEngine::new(state);
        let mut vars = VariableMap::new();
        let result = engine.execute_one_step(flow_id, &step, &mut vars).await;
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }
}
