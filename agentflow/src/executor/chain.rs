//! Tool-call chain reference resolution: `${callID[.json.path]}` placeholders in
//! argument JSON, resolved against a map of completed call results.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("arguments are not a JSON object or array")]
    NotResolvable,
}

/// One completed predecessor's result, keyed by call id, used as the substitution source.
pub type ResultMap = HashMap<String, Value>;

/// Resolves `${callID.path}` placeholders in `arguments` (raw JSON text) against `results`.
///
/// - A field that is *exactly* one placeholder is replaced by the referenced value,
///   preserving its JSON type.
/// - A field that is a string *embedding* one or more placeholders has each substituted in
///   place; non-string referenced values are JSON-encoded into the string.
/// - Unknown references pass through unchanged (idempotent: re-resolving a resolved payload
///   is a no-op, since no placeholder remains except the unresolved ones, which themselves
///   don't change).
pub fn resolve_references(arguments: &str, results: &ResultMap) -> Result<String, ChainError> {
    if arguments.is_empty() {
        return Ok(arguments.to_string());
    }
    let value: Value = serde_json::from_str(arguments).map_err(|_| ChainError::NotResolvable)?;
    let resolved = resolve_value(&value, results);
    Ok(serde_json::to_string(&resolved).map_err(|_| ChainError::NotResolvable)?)
}

fn resolve_value(value: &Value, results: &ResultMap) -> Value {
    match value {
        Value::String(s) => resolve_string(s, results),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, results));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, results)).collect()),
        other => other.clone(),
    }
}

/// Matches a bare `${...}` reference spanning the *entire* string.
fn whole_placeholder(s: &str) -> Option<&str> {
    let s = s.trim();
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") {
        return None;
    }
    Some(inner)
}

fn resolve_string(s: &str, results: &ResultMap) -> Value {
    if let Some(reference) = whole_placeholder(s) {
        return match lookup(reference, results) {
            Some(v) => v,
            None => Value::String(s.to_string()),
        };
    }

    if !s.contains("${") {
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let reference = &after[..end];
                match lookup(reference, results) {
                    Some(Value::String(text)) => out.push_str(&text),
                    Some(other) => {
                        out.push_str(&serde_json::to_string(&other).unwrap_or_default());
                    }
                    None => {
                        out.push_str("${");
                        out.push_str(reference);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Looks up `callID[.path.steps]` in `results`; path steps are object keys or array indices.
fn lookup(reference: &str, results: &ResultMap) -> Option<Value> {
    let mut parts = reference.split('.');
    let call_id = parts.next()?;
    let mut value = results.get(call_id)?.clone();
    for step in parts {
        value = match value {
            Value::Object(mut map) => map.remove(step)?,
            Value::Array(mut items) => {
                let idx: usize = step.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn results() -> ResultMap {
        let mut m = HashMap::new();
        m.insert("call_1".to_string(), json!({"location": "Beijing", "temperature": 22}));
        m
    }

    #[test]
    fn scenario_f_chain_reference_resolution() {
        let args = serde_json::to_string(&json!({
            "city": "${call_1.location}",
            "msg": "city=${call_1.location}",
            "payload": "${call_1}",
            "missing": "${call_2.x}"
        }))
        .unwrap();
        let resolved = resolve_references(&args, &results()).unwrap();
        let value: Value = serde_json::from_str(&resolved).unwrap();
        assert_eq!(value["city"], "Beijing");
        assert_eq!(value["msg"], "city=Beijing");
        assert_eq!(value["payload"], json!({"location": "Beijing", "temperature": 22}));
        assert_eq!(value["missing"], "${call_2.x}");
    }

    #[test]
    fn idempotent_on_double_resolution() {
        let args = serde_json::to_string(&json!({"city": "${call_1.location}", "missing": "${call_2.x}"}))
            .unwrap();
        let once = resolve_references(&args, &results()).unwrap();
        let twice = resolve_references(&once, &results()).unwrap();
        let v1: Value = serde_json::from_str(&once).unwrap();
        let v2: Value = serde_json::from_str(&twice).unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn non_object_numeric_field_passes_through() {
        let args = serde_json::to_string(&json!({"count": 3})).unwrap();
        let resolved = resolve_references(&args, &results()).unwrap();
        let value: Value = serde_json::from_str(&resolved).unwrap();
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn array_index_path_step() {
        let mut m = HashMap::new();
        m.insert("call_2".to_string(), json!({"items": ["a", "b", "c"]}));
        let args = serde_json::to_string(&json!({"x": "${call_2.items.1}"})).unwrap();
        let resolved = resolve_references(&args, &m).unwrap();
        let value: Value = serde_json::from_str(&resolved).unwrap();
        assert_eq!(value["x"], "b");
    }
}
