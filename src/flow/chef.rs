//! Chef step transform pipeline (spec §3/§4.7): a named action folds the
//! previous string into a new one; a chef step folds a sequence of them
//! left to right over a single input variable.
//!
//! Grounded on the "data transform pipeline" shape of CyberChef, the tool
//! `gleip`'s chef steps are explicitly modeled after; actions are dispatched
//! by the string `actionType` stored on each `ChefAction` rather than a
//! closed Rust enum, matching the persisted-JSON shape spec §6 requires for
//! `FlowStep`/`ChefAction`.

use crate::error::FlowStepError;
use crate::models::ChefAction;
use base64::Engine;
use sha2::Digest;

/// Run a single named action against `input`, returning its output.
///
/// `options` carries action-specific parameters (e.g. `find`/`replace` for
/// the `replace` action) as a `serde_json::Value` object, mirroring how the
/// persisted JSON shape stores them.
pub fn run_action(action_type: &str, options: &serde_json::Value, input: &str) -> Result<String, FlowStepError> {
    let fail = |message: String| FlowStepError::ChefActionFailed { action: action_type.to_string(), message };

    match action_type {
        "base64-encode" => Ok(base64::engine::general_purpose::STANDARD.encode(input.as_bytes())),
        "base64-decode" => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(input.trim())
                .map_err(|e| fail(e.to_string()))?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        }
        "url-encode" => Ok(percent_encode(input)),
        "url-decode" => percent_decode(input).map_err(fail),
        "hex-encode" => Ok(hex::encode(input.as_bytes())),
        "hex-decode" => {
            let decoded = hex::decode(input.trim()).map_err(|e| fail(e.to_string()))?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        }
        "sha256" => {
            let digest = sha2::Sha256::digest(input.as_bytes());
            Ok(hex::encode(digest))
        }
        "reverse" => Ok(input.chars().rev().collect()),
        "to-upper-case" => Ok(input.to_uppercase()),
        "to-lower-case" => Ok(input.to_lowercase()),
        "trim" => Ok(input.trim().to_string()),
        "prepend" => {
            let prefix = options.get("text").and_then(|v| v.as_str()).unwrap_or("");
            Ok(format!("{prefix}{input}"))
        }
        "append" => {
            let suffix = options.get("text").and_then(|v| v.as_str()).unwrap_or("");
            Ok(format!("{input}{suffix}"))
        }
        "replace" => {
            let find = options.get("find").and_then(|v| v.as_str()).unwrap_or("");
            let replace = options.get("replace").and_then(|v| v.as_str()).unwrap_or("");
            if find.is_empty() {
                Ok(input.to_string())
            } else {
                Ok(input.replace(find, replace))
            }
        }
        other => Err(fail(format!("unknown chef action type {other:?}"))),
    }
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn percent_decode(input: &str) -> Result<String, String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex_pair = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| "truncated percent-escape".to_string())?;
            let value = u8::from_str_radix(std::str::from_utf8(hex_pair).unwrap_or(""), 16)
                .map_err(|_| format!("invalid percent-escape {:?}", String::from_utf8_lossy(hex_pair)))?;
            out.push(value);
            i += 3;
        } else if bytes[i] == b'+' {
            out.push(b' ');
            i += 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Fold `actions` left to right over `input`, returning the running value
/// after each action — pure, so the UI can call it for instant feedback
/// without a full flow run (spec §4.7's `sequential_preview`). Stops and
/// returns the previews gathered so far if an action fails; callers that
/// need the failure itself should use `run_pipeline`.
pub fn sequential_preview(actions: &[ChefAction], input: &str) -> Vec<String> {
    let mut previews = Vec::with_capacity(actions.len());
    let mut current = input.to_string();
    for action in actions {
        match run_action(&action.action_type, &action.options, &current) {
            Ok(output) => {
                current = output;
                previews.push(current.clone());
            }
            Err(_) => break,
        }
    }
    previews
}

/// Fold `actions` left to right over `input`, returning the final value and
/// the per-action preview list, or the first action's failure.
pub fn run_pipeline(actions: &[ChefAction], input: &str) -> Result<(String, Vec<String>), FlowStepError> {
    let mut current = input.to_string();
    let mut previews = Vec::with_capacity(actions.len());
    for action in actions {
        current = run_action(&action.action_type, &action.options, &current)?;
        previews.push(current.clone());
    }
    Ok((current, previews))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn action(action_type: &str, options: serde_json::Value) -> ChefAction {
        ChefAction { id: Uuid::new_v4(), action_type: action_type.to_string(), options, preview: None }
    }

    #[test]
    fn base64_then_reverse_matches_spec_example() {
        let actions = vec![action("base64-encode", json!({})), action("reverse", json!({}))];
        let (result, previews) = run_pipeline(&actions, "hello").unwrap();
        assert_eq!(previews, vec!["aGVsbG8=".to_string(), "=8bGxlaG".to_string()]);
        assert_eq!(result, "=8bGxlaG");
    }

    #[test]
    fn sequential_preview_matches_run_pipeline_previews() {
        let actions = vec![action("to-upper-case", json!({})), action("reverse", json!({}))];
        let previews = sequential_preview(&actions, "abc");
        let (_, pipeline_previews) = run_pipeline(&actions, "abc").unwrap();
        assert_eq!(previews, pipeline_previews);
    }

    #[test]
    fn url_round_trips_reserved_characters() {
        let encoded = percent_encode("a b+c/d");
        assert_eq!(encoded, "a%20b%2Bc%2Fd");
        assert_eq!(percent_decode(&encoded).unwrap(), "a b+c/d");
    }

    #[test]
    fn unknown_action_fails_with_chef_action_error() {
        let err = run_action("not-a-real-action", &json!({}), "x").unwrap_err();
        assert!(matches!(err, FlowStepError::ChefActionFailed { .. }));
    }

    #[test]
    fn replace_action_substitutes_all_occurrences() {
        let out = run_action("replace", &json!({"find": "a", "replace": "b"}), "banana").unwrap();
        assert_eq!(out, "bbnbnb");
    }

    #[test]
    fn sha256_is_deterministic_and_hex_encoded() {
        let out = run_action("sha256", &json!({}), "hello").unwrap();
        assert_eq!(out, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
    }
}
