// src/modify.rs
//! Applies an update's modifier document to a document's JSON value.
//! `collection.rs` handles the whole-doc-replacement case itself (no
//! `$`-prefixed top-level key => replace, not modify); this module only
//! ever sees modifier updates.

use serde_json::{Map, Value};

use crate::error::{DbError, Result};

/// Apply `modifiers` (e.g. `{"$set": {...}, "$inc": {...}}`) to a copy of
/// `target`, returning the new value. `target` is left untouched.
pub fn apply_modifiers(target: &Value, modifiers: &Value) -> Result<Value> {
    let mut result = target.clone();
    let mods = modifiers.as_object().ok_or_else(|| {
        DbError::InvalidParameter("update document must be an object".to_string())
    })?;

    for (op, spec) in mods {
        let spec_obj = spec.as_object().ok_or_else(|| {
            DbError::InvalidParameter(format!("{op} operand must be an object"))
        })?;
        match op.as_str() {
            "$set" => {
                for (path, value) in spec_obj {
                    set_path(&mut result, path, value.clone());
                }
            }
            "$unset" => {
                for path in spec_obj.keys() {
                    unset_path(&mut result, path);
                }
            }
            "$inc" => {
                for (path, delta) in spec_obj {
                    let delta = delta.as_f64().ok_or_else(|| {
                        DbError::InvalidParameter(format!("$inc operand for '{path}' must be a number"))
                    })?;
                    let current = get_path(&result, path).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    set_path(&mut result, path, json_number(current + delta));
                }
            }
            "$min" => {
                for (path, candidate) in spec_obj {
                    apply_extremum(&mut result, path, candidate, std::cmp::Ordering::Less)?;
                }
            }
            "$max" => {
                for (path, candidate) in spec_obj {
                    apply_extremum(&mut result, path, candidate, std::cmp::Ordering::Greater)?;
                }
            }
            "$push" => {
                for (path, value) in spec_obj {
                    push(&mut result, path, value)?;
                }
            }
            "$addToSet" => {
                for (path, value) in spec_obj {
                    add_to_set(&mut result, path, value)?;
                }
            }
            "$pull" => {
                for (path, value) in spec_obj {
                    pull(&mut result, path, value)?;
                }
            }
            other => {
                return Err(DbError::InvalidParameter(format!("unknown update operator '{other}'")))
            }
        }
    }
    Ok(result)
}

fn json_number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn apply_extremum(target: &mut Value, path: &str, candidate: &Value, want: std::cmp::Ordering) -> Result<()> {
    let current = get_path(target, path).cloned();
    let replace = match (&current, candidate) {
        (None, _) => true,
        (Some(Value::Number(a)), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).map(|o| o == want).unwrap_or(false)
        }
        _ => false,
    };
    if replace {
        set_path(target, path, candidate.clone());
    }
    Ok(())
}

fn push(target: &mut Value, path: &str, value: &Value) -> Result<()> {
    let mut arr = get_path(target, path).cloned().unwrap_or(Value::Array(Vec::new()));
    let arr_mut = arr.as_array_mut().ok_or_else(|| {
        DbError::InvalidParameter(format!("$push target '{path}' is not an array"))
    })?;
    if let Some(each) = value.as_object().and_then(|o| o.get("$each")).and_then(|v| v.as_array()) {
        arr_mut.extend(each.iter().cloned());
    } else {
        arr_mut.push(value.clone());
    }
    set_path(target, path, arr);
    Ok(())
}

fn add_to_set(target: &mut Value, path: &str, value: &Value) -> Result<()> {
    let mut arr = get_path(target, path).cloned().unwrap_or(Value::Array(Vec::new()));
    let arr_mut = arr.as_array_mut().ok_or_else(|| {
        DbError::InvalidParameter(format!("$addToSet target '{path}' is not an array"))
    })?;
    let candidates: Vec<Value> = match value.as_object().and_then(|o| o.get("$each")).and_then(|v| v.as_array()) {
        Some(each) => each.clone(),
        None => vec![value.clone()],
    };
    for c in candidates {
        if !arr_mut.contains(&c) {
            arr_mut.push(c);
        }
    }
    set_path(target, path, arr);
    Ok(())
}

fn pull(target: &mut Value, path: &str, value: &Value) -> Result<()> {
    let mut arr = get_path(target, path).cloned().unwrap_or(Value::Array(Vec::new()));
    let arr_mut = arr.as_array_mut().ok_or_else(|| {
        DbError::InvalidParameter(format!("$pull target '{path}' is not an array"))
    })?;
    arr_mut.retain(|v| v != value);
    set_path(target, path, arr);
    Ok(())
}

fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed.
fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    set_path_parts(value, &parts, new_value);
}

fn set_path_parts(value: &mut Value, parts: &[&str], new_value: Value) {
    if parts.len() == 1 {
        match value {
            Value::Object(map) => {
                map.insert(parts[0].to_string(), new_value);
            }
            other => {
                let mut map = Map::new();
                map.insert(parts[0].to_string(), new_value);
                *other = Value::Object(map);
            }
        }
        return;
    }
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let map = value.as_object_mut().unwrap();
    let entry = map.entry(parts[0].to_string()).or_insert(Value::Object(Map::new()));
    set_path_parts(entry, &parts[1..], new_value);
}

fn unset_path(value: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    unset_path_parts(value, &parts);
}

fn unset_path_parts(value: &mut Value, parts: &[&str]) {
    if parts.len() == 1 {
        if let Value::Object(map) = value {
            map.remove(parts[0]);
        }
        return;
    }
    if let Value::Object(map) = value {
        if let Some(next) = map.get_mut(parts[0]) {
            unset_path_parts(next, &parts[1..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_unset() {
        let doc = json!({"a": 1, "b": 2});
        let out = apply_modifiers(&doc, &json!({"$set": {"a": 10}, "$unset": {"b": ""}})).unwrap();
        assert_eq!(out, json!({"a": 10}));
    }

    #[test]
    fn nested_set_creates_intermediate_objects() {
        let doc = json!({});
        let out = apply_modifiers(&doc, &json!({"$set": {"addr.city": "Budapest"}})).unwrap();
        assert_eq!(out, json!({"addr": {"city": "Budapest"}}));
    }

    #[test]
    fn inc_creates_field_when_absent() {
        let doc = json!({});
        let out = apply_modifiers(&doc, &json!({"$inc": {"count": 5}})).unwrap();
        assert_eq!(out["count"], json!(5.0));
    }

    #[test]
    fn min_and_max() {
        let doc = json!({"score": 10});
        let out = apply_modifiers(&doc, &json!({"$min": {"score": 5}})).unwrap();
        assert_eq!(out["score"], json!(5));
        let out2 = apply_modifiers(&out, &json!({"$max": {"score": 100}})).unwrap();
        assert_eq!(out2["score"], json!(100));
    }

    #[test]
    fn push_each_and_add_to_set() {
        let doc = json!({"tags": ["a"]});
        let out = apply_modifiers(&doc, &json!({"$push": {"tags": {"$each": ["b", "c"]}}})).unwrap();
        assert_eq!(out["tags"], json!(["a", "b", "c"]));
        let out2 = apply_modifiers(&out, &json!({"$addToSet": {"tags": "b"}})).unwrap();
        assert_eq!(out2["tags"], json!(["a", "b", "c"]));
    }

    #[test]
    fn pull_removes_matching_elements() {
        let doc = json!({"tags": ["a", "b", "a"]});
        let out = apply_modifiers(&doc, &json!({"$pull": {"tags": "a"}})).unwrap();
        assert_eq!(out["tags"], json!(["b"]));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let doc = json!({});
        let err = apply_modifiers(&doc, &json!({"$bogus": {"x": 1}}));
        assert!(err.is_err());
    }

    #[test]
    fn original_is_untouched() {
        let doc = json!({"a": 1});
        let _ = apply_modifiers(&doc, &json!({"$set": {"a": 2}})).unwrap();
        assert_eq!(doc["a"], json!(1));
    }
}
