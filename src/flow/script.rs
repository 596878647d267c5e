//! Script step sandbox (spec §4.7/§9): a `vars` bag plus a `log` function,
//! nothing else. Grounded on the sibling `rift` proxy's use of `rhai` for
//! embedded, host-controlled request-handling scripts — the same engine,
//! narrowed to exactly the bindings spec §9's open question requires us to
//! pin down.
//!
//! `Engine::new_raw()` (not `Engine::new()`) is used deliberately: it
//! registers none of Rhai's standard-library packages, so there is no
//! file, process, or network binding a script could reach for even by
//! accident. The only two things a script can touch are `vars` (get/set
//! over the flow's variable map) and `log(message)`.

use crate::error::FlowStepError;
use crate::models::VariableMap;
use rhai::{Engine, Scope};

/// Operation-count ceiling substituting for a wall-clock timeout — Rhai
/// counts each bytecode-level operation, so this bounds real time
/// deterministically regardless of host load.
const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_ARRAY_SIZE: usize = 10_000;

fn sandboxed_engine(flow_id: uuid::Uuid, step_id: uuid::Uuid) -> Engine {
    let mut engine = Engine::new_raw();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(MAX_ARRAY_SIZE);
    engine.set_max_map_size(MAX_ARRAY_SIZE);

    engine.register_fn("log", move |message: &str| {
        tracing::info!(%flow_id, %step_id, script_log = message, "flow script log");
    });

    engine
}

/// Evaluate `content` with `vars` exposed as a mutable `vars` object.
/// Assignments the script makes into `vars` (`vars.name = "x"` or
/// `vars["name"] = "x"`) are merged back in on return; everything else
/// about the flow's variable scope is untouched.
pub fn eval_script(
    content: &str,
    vars: &mut VariableMap,
    flow_id: uuid::Uuid,
    step_id: uuid::Uuid,
) -> Result<(), FlowStepError> {
    let engine = sandboxed_engine(flow_id, step_id);

    let mut scope = Scope::new();
    let mut map = rhai::Map::new();
    for (key, value) in vars.iter() {
        map.insert(key.into(), value.into());
    }
    scope.push("vars", map);

    engine
        .run_with_scope(&mut scope, content)
        .map_err(|e| FlowStepError::ScriptFailed(e.to_string()))?;

    let result_map = scope
        .get_value::<rhai::Map>("vars")
        .ok_or_else(|| FlowStepError::ScriptFailed("script removed the `vars` binding".to_string()))?;

    for (key, value) in result_map {
        let value_str = value
            .into_immutable_string()
            .map(|s| s.to_string())
            .unwrap_or_else(|v| v.to_string());
        vars.set(key.to_string(), value_str);
    }

    Ok(())
}
