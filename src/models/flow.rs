//! Flow model: a named, ordered sequence of steps that exchange variables
//! through a shared scope. Grounded on `breakpoint.rs`'s shape for request
//! edits and `models/transaction.rs`'s id/timing conventions; the
//! step/variable structure itself is new.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Insertion-ordered string map. A plain `Vec<(String, String)>` is enough
/// at the sizes a flow's variable scope ever reaches, and keeps iteration
/// order stable for the UI and for `{{var}}` substitution determinism.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableMap(Vec<(String, String)>);

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.into();
        } else {
            self.0.push((key, value.into()));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for VariableMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = VariableMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Source a `VariableExtract` reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractSource {
    Header,
    BodyJson,
    Cookie,
    BodyRegex,
    Status,
}

/// `name = extract(source, selector)` run against a step's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableExtract {
    pub name: String,
    pub source: ExtractSource,
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzResult {
    pub word: String,
    pub request: Vec<u8>,
    pub response: Option<Vec<u8>>,
    pub status_code: Option<u16>,
    pub size: Option<u64>,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzSettings {
    pub delay_secs: f64,
    pub wordlist: Vec<String>,
    #[serde(default)]
    pub results: Vec<FuzzResult>,
}

/// A raw HTTP request plus the machinery around sending it and extracting
/// variables from its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStep {
    pub request: Vec<u8>,
    pub host: String,
    pub tls: bool,
    pub recalculate_content_length: bool,
    pub gunzip_response: bool,
    #[serde(default)]
    pub variable_extracts: Vec<VariableExtract>,
    pub is_fuzz_mode: bool,
    pub fuzz_settings: Option<FuzzSettings>,
}

impl RequestStep {
    pub fn new(host: impl Into<String>, tls: bool, request: Vec<u8>) -> Self {
        Self {
            request,
            host: host.into(),
            tls,
            recalculate_content_length: true,
            gunzip_response: true,
            variable_extracts: Vec::new(),
            is_fuzz_mode: false,
            fuzz_settings: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    pub content: String,
}

/// One link in a chef pipeline: takes the prior value, yields a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChefAction {
    pub id: Uuid,
    pub action_type: String,
    #[serde(default)]
    pub options: serde_json::Value,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChefStep {
    pub input_variable: String,
    pub actions: Vec<ChefAction>,
    pub output_variable: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    Request,
    Script,
    Chef,
}

/// A single step in a flow. Exactly one of `request_step`/`script_step`/
/// `chef_step` is populated, matching `kind` — enforced by constructors,
/// not the type system, to mirror the persisted-JSON shape the host
/// application serializes these as.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub id: Uuid,
    pub kind: StepKind,
    pub selected: bool,
    pub name: String,
    pub is_expanded: bool,
    pub request_step: Option<RequestStep>,
    pub script_step: Option<ScriptStep>,
    pub chef_step: Option<ChefStep>,
}

impl FlowStep {
    pub fn request(name: impl Into<String>, step: RequestStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: StepKind::Request,
            selected: true,
            name: name.into(),
            is_expanded: true,
            request_step: Some(step),
            script_step: None,
            chef_step: None,
        }
    }

    pub fn script(name: impl Into<String>, step: ScriptStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: StepKind::Script,
            selected: true,
            name: name.into(),
            is_expanded: true,
            request_step: None,
            script_step: Some(step),
            chef_step: None,
        }
    }

    pub fn chef(name: impl Into<String>, step: ChefStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: StepKind::Chef,
            selected: true,
            name: name.into(),
            is_expanded: true,
            request_step: None,
            script_step: None,
            chef_step: Some(step),
        }
    }
}

/// Outcome of executing a single step, cached per-flow until the next run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub step_id: Uuid,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub variables: std::collections::HashMap<String, String>,
    pub transaction: Option<Uuid>,
    pub actual_raw_request: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    pub sorting_index: u32,
    pub variables: VariableMap,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub execution_results: Vec<ExecutionResult>,
    pub is_variable_step_expanded: bool,
}

impl Flow {
    pub fn new(name: impl Into<String>, sorting_index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sorting_index,
            variables: VariableMap::new(),
            steps: Vec::new(),
            execution_results: Vec::new(),
            is_variable_step_expanded: false,
        }
    }
}

/// Substitute every `{{name}}` occurrence in `template` with `vars[name]`;
/// unknown keys are replaced by the empty string. `{{fuzz}}` is left
/// untouched unless `fuzz_value` is provided (fuzz-mode request sends).
pub fn substitute(template: &str, vars: &VariableMap, fuzz_value: Option<&str>) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = template[i..].find("}}") {
                let key = &template[i + 2..i + end];
                if key == "fuzz" {
                    match fuzz_value {
                        Some(value) => out.push_str(value),
                        None => out.push_str("{{fuzz}}"),
                    }
                } else {
                    out.push_str(vars.get(key).unwrap_or(""));
                }
                i += end + 2;
                continue;
            }
        }
        let ch = template[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_known_and_blanks_unknown() {
        let mut vars = VariableMap::new();
        vars.set("token", "abc123");
        let result = substitute("Authorization: Bearer {{token}} / {{missing}}", &vars, None);
        assert_eq!(result, "Authorization: Bearer abc123 / ");
    }

    #[test]
    fn substitute_leaves_fuzz_sentinel_outside_fuzz_mode() {
        let vars = VariableMap::new();
        let result = substitute("id={{fuzz}}", &vars, None);
        assert_eq!(result, "id={{fuzz}}");
    }

    #[test]
    fn substitute_replaces_fuzz_sentinel_when_value_given() {
        let vars = VariableMap::new();
        let result = substitute("id={{fuzz}}", &vars, Some("admin"));
        assert_eq!(result, "id=admin");
    }

    #[test]
    fn variable_map_preserves_insertion_order() {
        let mut vars = VariableMap::new();
        vars.set("b", "2");
        vars.set("a", "1");
        let keys: Vec<&str> = vars.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
