//! JSON merge-patch helpers used to layer overlays over server snapshots.

use serde_json::{Map, Value};

/// Apply `patch` to `target` with merge-patch semantics: objects merge
/// recursively, `null` removes the field, anything else replaces.
pub fn apply_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

pub fn merged(base: &Value, patch: &Value) -> Value {
    let mut out = base.clone();
    apply_patch(&mut out, patch);
    out
}

/// True when any leaf `patch` sets differs from `server` at the same path.
/// A `null` leaf disagrees when the server still has a value there.
pub fn disagrees(server: &Value, patch: &Value) -> bool {
    match patch {
        Value::Object(patch_map) => match server {
            Value::Object(server_map) => patch_map.iter().any(|(key, p)| match server_map.get(key) {
                Some(s) => disagrees(s, p),
                None => !p.is_null(),
            }),
            _ => true,
        },
        Value::Null => !server.is_null(),
        leaf => leaf != server,
    }
}

/// Restrict an object patch to the given top-level fields.
pub fn restrict(patch: &Value, fields: &[&str]) -> Value {
    match patch {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| fields.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn is_empty_patch(patch: &Value) -> bool {
    match patch {
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_patch_nested_and_null() {
        let base = json!({"status": "PAUSED", "participants": {"npcIds": ["n1"], "monsterIds": []}, "name": "Ambush"});
        let patch = json!({"participants": {"monsterIds": ["m1"]}, "name": null});
        let out = merged(&base, &patch);
        assert_eq!(
            out,
            json!({"status": "PAUSED", "participants": {"npcIds": ["n1"], "monsterIds": ["m1"]}})
        );
    }

    #[test]
    fn test_arrays_replace() {
        let out = merged(&json!({"order": [1, 2, 3]}), &json!({"order": [3]}));
        assert_eq!(out, json!({"order": [3]}));
    }

    #[test]
    fn test_disagrees() {
        let server = json!({"status": "PENDING_INITIATIVE", "currentTurn": 0, "p": {"a": 1}});
        assert!(!disagrees(&server, &json!({"status": "PENDING_INITIATIVE"})));
        assert!(disagrees(&server, &json!({"status": "INITIATIVE_ROLLED"})));
        assert!(!disagrees(&server, &json!({"p": {"a": 1}})));
        assert!(disagrees(&server, &json!({"p": {"b": 2}})));
        assert!(!disagrees(&server, &json!({"missing": null})));
        assert!(disagrees(&server, &json!({"currentTurn": null})));
        assert!(!disagrees(&server, &json!({})));
    }

    #[test]
    fn test_restrict() {
        let patch = json!({"status": "PAUSED", "name": "x"});
        assert_eq!(restrict(&patch, &["status"]), json!({"status": "PAUSED"}));
        assert!(is_empty_patch(&restrict(&patch, &["initiativeOrder"])));
    }
}
