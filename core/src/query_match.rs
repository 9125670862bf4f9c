// src/query_match.rs
//! The filter matcher. The planner narrows a candidate set without fully
//! evaluating the query (SPEC_FULL.md §4.2); this is the exact predicate
//! every candidate is still re-checked against before it's returned,
//! since an index-narrowed candidate set is a superset, never a final
//! answer.

use serde_json::Value;

use crate::document::Document;

/// Does `doc` satisfy `query`? `query` is a MongoDB-subset filter: plain
/// fields are equality-matched, `$and`/`$or`/`$not` combine sub-filters,
/// and a small set of comparison/existence operators apply to one field.
pub fn matches(doc: &Document, query: &Value) -> bool {
    let obj = match query.as_object() {
        Some(o) => o,
        None => return false,
    };
    obj.iter().all(|(key, clause)| match key.as_str() {
        "$and" => as_array(clause).map(|cs| cs.iter().all(|c| matches(doc, c))).unwrap_or(false),
        "$or" => as_array(clause).map(|cs| cs.iter().any(|c| matches(doc, c))).unwrap_or(false),
        "$not" => !matches(doc, clause),
        _ => match_field(doc, key, clause),
    })
}

fn as_array(v: &Value) -> Option<&Vec<Value>> {
    v.as_array()
}

fn match_field(doc: &Document, path: &str, clause: &Value) -> bool {
    let id_value = if path == "_id" { Some(doc.get_id_value()) } else { None };
    let actual = id_value.as_ref().or_else(|| doc.get(path));

    if let Value::Object(ops) = clause {
        let is_operator_doc = ops.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
        if is_operator_doc {
            return ops.iter().all(|(op, v)| match_operator(actual, op, v));
        }
    }

    // plain equality, including embedded-document equality
    match actual {
        Some(v) => values_equal(v, clause),
        None => clause.is_null(),
    }
}

fn match_operator(actual: Option<&Value>, op: &str, operand: &Value) -> bool {
    match op {
        "$eq" => actual.map(|v| values_equal(v, operand)).unwrap_or(operand.is_null()),
        "$ne" => !actual.map(|v| values_equal(v, operand)).unwrap_or(operand.is_null()),
        "$exists" => {
            let want = operand.as_bool().unwrap_or(true);
            actual.is_some() == want
        }
        "$in" => operand
            .as_array()
            .map(|arr| arr.iter().any(|v| actual.map(|a| values_equal(a, v)).unwrap_or(v.is_null())))
            .unwrap_or(false),
        "$nin" => !operand
            .as_array()
            .map(|arr| arr.iter().any(|v| actual.map(|a| values_equal(a, v)).unwrap_or(v.is_null())))
            .unwrap_or(false),
        "$lt" => compare(actual, operand).map(|o| o.is_lt()).unwrap_or(false),
        "$lte" => compare(actual, operand).map(|o| o.is_le()).unwrap_or(false),
        "$gt" => compare(actual, operand).map(|o| o.is_gt()).unwrap_or(false),
        "$gte" => compare(actual, operand).map(|o| o.is_ge()).unwrap_or(false),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Numeric/string comparison only - comparing across types (or anything
/// not a number/string) has no ordering, so the operator doesn't match.
fn compare(actual: Option<&Value>, operand: &Value) -> Option<std::cmp::Ordering> {
    let a = actual?;
    match (a, operand) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document::prepare_for_insert(fields).unwrap()
    }

    #[test]
    fn plain_equality() {
        let d = doc(json!({"name": "Ada"}));
        assert!(matches(&d, &json!({"name": "Ada"})));
        assert!(!matches(&d, &json!({"name": "Bob"})));
    }

    #[test]
    fn dotted_path_equality() {
        let d = doc(json!({"address": {"city": "Budapest"}}));
        assert!(matches(&d, &json!({"address.city": "Budapest"})));
    }

    #[test]
    fn comparison_operators() {
        let d = doc(json!({"age": 30}));
        assert!(matches(&d, &json!({"age": {"$gte": 30}})));
        assert!(matches(&d, &json!({"age": {"$lt": 40}})));
        assert!(!matches(&d, &json!({"age": {"$gt": 30}})));
    }

    #[test]
    fn in_and_nin() {
        let d = doc(json!({"tag": "b"}));
        assert!(matches(&d, &json!({"tag": {"$in": ["a", "b"]}})));
        assert!(!matches(&d, &json!({"tag": {"$nin": ["a", "b"]}})));
    }

    #[test]
    fn exists_operator() {
        let d = doc(json!({"x": 1}));
        assert!(matches(&d, &json!({"x": {"$exists": true}})));
        assert!(matches(&d, &json!({"y": {"$exists": false}})));
        assert!(!matches(&d, &json!({"y": {"$exists": true}})));
    }

    #[test]
    fn and_or_not_combinators() {
        let d = doc(json!({"age": 30, "name": "Ada"}));
        assert!(matches(&d, &json!({"$and": [{"age": 30}, {"name": "Ada"}]})));
        assert!(matches(&d, &json!({"$or": [{"age": 99}, {"name": "Ada"}]})));
        assert!(matches(&d, &json!({"$not": {"age": 99}})));
        assert!(!matches(&d, &json!({"$and": [{"age": 30}, {"name": "Bob"}]})));
    }

    #[test]
    fn cross_type_comparison_never_matches() {
        let d = doc(json!({"age": "thirty"}));
        assert!(!matches(&d, &json!({"age": {"$gt": 10}})));
    }

    #[test]
    fn id_field_matches_by_equality_and_operators() {
        let d = doc(json!({"_id": "a", "x": 1}));
        assert!(matches(&d, &json!({"_id": "a"})));
        assert!(!matches(&d, &json!({"_id": "b"})));
        assert!(matches(&d, &json!({"_id": {"$in": ["a", "z"]}})));
        assert!(matches(&d, &json!({"_id": {"$ne": "z"}})));
    }
}
