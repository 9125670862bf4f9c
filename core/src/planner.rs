// src/planner.rs
//! Picks a starting candidate set for a query without ever combining two
//! indexes. First applicable rule wins, in the order the query's
//! top-level keys were written (hence `preserve_order` on serde_json -
//! see SPEC_FULL.md §3).

use serde_json::Value;

use crate::document::DocumentId;
use crate::index_set::IndexSet;

/// A candidate set: either every document in the collection (no usable
/// index found) or the documents an index already narrowed things down
/// to.
pub enum Candidates {
    Full,
    Narrowed(Vec<DocumentId>),
}

fn range_bounds(field_query: &Value) -> Option<(Option<(Value, bool)>, Option<(Value, bool)>)> {
    let obj = field_query.as_object()?;
    let mut lower = None;
    let mut upper = None;
    let mut saw_range_op = false;
    for (op, v) in obj {
        match op.as_str() {
            "$gt" => { lower = Some((v.clone(), false)); saw_range_op = true; }
            "$gte" => { lower = Some((v.clone(), true)); saw_range_op = true; }
            "$lt" => { upper = Some((v.clone(), false)); saw_range_op = true; }
            "$lte" => { upper = Some((v.clone(), true)); saw_range_op = true; }
            _ => {}
        }
    }
    if saw_range_op { Some((lower, upper)) } else { None }
}

/// Select a candidate set for `query` (a JSON object of field -> filter).
/// Rule precedence is global, not per-key: every top-level key is checked
/// for equality first (in written order), and only if none qualifies does
/// the planner make a second full pass for `$in` membership, then a third
/// for range operators (`$lt`/`$lte`/`$gt`/`$gte`). This matters when a
/// later key would win on equality but an earlier key has only a range
/// filter - equality must still take it, so each rule needs its own
/// complete pass over the query rather than the first indexed key settling
/// it immediately. Falls back to a full scan when no key yields a match in
/// any of the three passes.
pub fn select_candidates(index_set: &IndexSet, query: &Value) -> Candidates {
    let obj = match query.as_object() {
        Some(o) => o,
        None => return Candidates::Full,
    };

    // Pass 1: equality (including embedded-document equality).
    for key in obj.keys() {
        if key.starts_with('$') {
            continue; // top-level logical operator, not a field - no index to consult
        }
        let idx = match index_set.index(key) {
            Some(i) => i,
            None => continue,
        };
        let field_query = &obj[key];

        if !matches!(field_query, Value::Object(_)) {
            return Candidates::Narrowed(idx.get_matching(field_query));
        }

        let field_obj = field_query.as_object().unwrap();
        let is_operator_doc = field_obj.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
        if !is_operator_doc {
            // an embedded-document equality match, e.g. {addr: {city: "x"}}
            return Candidates::Narrowed(idx.get_matching(field_query));
        }
    }

    // Pass 2: $in membership.
    for key in obj.keys() {
        if key.starts_with('$') {
            continue;
        }
        let idx = match index_set.index(key) {
            Some(i) => i,
            None => continue,
        };
        let field_query = &obj[key];
        if let Some(field_obj) = field_query.as_object() {
            if let Some(Value::Array(values)) = field_obj.get("$in") {
                return Candidates::Narrowed(idx.get_matching_many(values));
            }
        }
    }

    // Pass 3: range operators.
    for key in obj.keys() {
        if key.starts_with('$') {
            continue;
        }
        let idx = match index_set.index(key) {
            Some(i) => i,
            None => continue,
        };
        let field_query = &obj[key];
        if let Some((lower, upper)) = range_bounds(field_query) {
            return Candidates::Narrowed(idx.get_between_bounds(lower, upper));
        }
    }

    Candidates::Full
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::index::IndexOptions;
    use serde_json::json;

    fn set_with(docs: &[(&str, i64)]) -> IndexSet {
        let mut set = IndexSet::new();
        set.ensure_index("age", IndexOptions::default()).unwrap();
        for (id, age) in docs {
            let doc = Document::prepare_for_insert(json!({"_id": id, "age": age})).unwrap();
            set.add_to_indexes(doc).unwrap();
        }
        set
    }

    #[test]
    fn equality_uses_index() {
        let set = set_with(&[("a", 1), ("b", 2), ("c", 1)]);
        let cand = select_candidates(&set, &json!({"age": 1}));
        match cand {
            Candidates::Narrowed(ids) => assert_eq!(ids.len(), 2),
            Candidates::Full => panic!("expected narrowed"),
        }
    }

    #[test]
    fn in_uses_index() {
        let set = set_with(&[("a", 1), ("b", 2), ("c", 3)]);
        let cand = select_candidates(&set, &json!({"age": {"$in": [1, 3]}}));
        match cand {
            Candidates::Narrowed(ids) => assert_eq!(ids.len(), 2),
            Candidates::Full => panic!("expected narrowed"),
        }
    }

    #[test]
    fn range_uses_index() {
        let set = set_with(&[("a", 1), ("b", 2), ("c", 3)]);
        let cand = select_candidates(&set, &json!({"age": {"$gte": 2}}));
        match cand {
            Candidates::Narrowed(ids) => assert_eq!(ids.len(), 2),
            Candidates::Full => panic!("expected narrowed"),
        }
    }

    #[test]
    fn unindexed_field_falls_back_to_full_scan() {
        let set = set_with(&[("a", 1)]);
        let cand = select_candidates(&set, &json!({"name": "x"}));
        assert!(matches!(cand, Candidates::Full));
    }

    #[test]
    fn unsupported_operator_on_indexed_field_falls_through() {
        let set = set_with(&[("a", 1), ("b", 2)]);
        let cand = select_candidates(&set, &json!({"age": {"$ne": 1}}));
        assert!(matches!(cand, Candidates::Full));
    }

    /// A later key's equality filter must win over an earlier key's range
    /// filter: equality is a global first pass over every key, not just the
    /// first indexed key encountered.
    #[test]
    fn equality_on_a_later_key_outranks_range_on_an_earlier_key() {
        let mut set = IndexSet::new();
        set.ensure_index("age", IndexOptions::default()).unwrap();
        set.ensure_index("tag", IndexOptions::default()).unwrap();
        for (id, age, tag) in [("a", 1, "x"), ("b", 2, "y"), ("c", 3, "x")] {
            let doc = Document::prepare_for_insert(json!({"_id": id, "age": age, "tag": tag})).unwrap();
            set.add_to_indexes(doc).unwrap();
        }
        let cand = select_candidates(&set, &json!({"age": {"$gte": 1}, "tag": "x"}));
        match cand {
            Candidates::Narrowed(ids) => assert_eq!(ids.len(), 2), // "tag" equality, not "age" range
            Candidates::Full => panic!("expected narrowed"),
        }
    }
}
