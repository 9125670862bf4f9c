// src/aggregation.rs
//! Per-collection aggregation state: sort, skip, limit - deliberately not
//! the teacher's full Match/Project/Group/Sort/Limit/Skip pipeline. This
//! engine's query language has no `$group`/`$project`.
//!
//! This state is configured once by `aggregate()` and then consumed by
//! every later `find`/`update`/`remove` call on the same collection,
//! until the next `aggregate()` call replaces it - a quirk carried over
//! deliberately (see the Design Notes this crate is built against):
//! a later `aggregate()` from any caller changes what an unrelated
//! caller's next `find()` returns.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;
use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortClause {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationState {
    sort: Vec<SortClause>,
    skip: Option<usize>,
    limit: Option<usize>,
}

impl AggregationState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an `aggregate()` call's spec document - `$sort`, `$skip`,
    /// `$limit`, all optional - into a fresh state that replaces whatever
    /// was configured before. `$sort` is either a single path name
    /// (ascending) or an ordered array of single-key `{path: ±1}`
    /// objects, each direction exactly `1` or `-1`.
    pub fn parse(spec: &Value) -> Result<AggregationState> {
        let obj = spec.as_object().ok_or_else(|| {
            DbError::InvalidParameter("aggregate() spec must be an object".to_string())
        })?;

        let mut sort = Vec::new();
        if let Some(sort_spec) = obj.get("$sort") {
            sort = parse_sort(sort_spec)?;
        }

        let skip = match obj.get("$skip") {
            None => None,
            Some(v) => Some(parse_non_negative(v, "$skip")?),
        };
        let limit = match obj.get("$limit") {
            None => None,
            Some(v) => Some(parse_non_negative(v, "$limit")?),
        };

        Ok(AggregationState { sort, skip, limit })
    }

    /// Sort only, never slices. Used by `findOne`, which applies sort to
    /// the whole candidate domain but never skip/limit.
    pub fn sort_only(&self, mut docs: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare(a, b));
        }
        docs
    }

    /// Sort, then - when `apply_limit_skip` is true - slice to
    /// `[skip, skip+limit)`. `find`/`update(multi: true)` pass `true`;
    /// `update(multi: false)`/`remove(multi: false)` pass `false` and
    /// additionally truncate to the first survivor at the call site.
    pub fn aggregate(&self, docs: Vec<Document>, apply_limit_skip: bool) -> Vec<Document> {
        let docs = self.sort_only(docs);
        if !apply_limit_skip {
            return docs;
        }
        let mut docs = docs;
        let skip = self.skip.unwrap_or(0);
        let docs: Vec<Document> = if skip >= docs.len() { Vec::new() } else { docs.split_off(skip) };
        match self.limit {
            Some(limit) if limit < docs.len() => docs.into_iter().take(limit).collect(),
            _ => docs,
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for clause in &self.sort {
            let av = a.get(&clause.field);
            let bv = b.get(&clause.field);
            let ord = compare_values_with_none(av, bv);
            let ord = match clause.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn parse_sort(sort_spec: &Value) -> Result<Vec<SortClause>> {
    match sort_spec {
        Value::String(path) => Ok(vec![SortClause { field: path.clone(), direction: SortDirection::Ascending }]),
        Value::Array(clauses) => {
            let mut out = Vec::with_capacity(clauses.len());
            for clause in clauses {
                let obj = clause.as_object().ok_or_else(|| {
                    DbError::InvalidParameter("$sort array entries must be {path: ±1} objects".to_string())
                })?;
                let (field, dir) = obj.iter().next().ok_or_else(|| {
                    DbError::InvalidParameter("$sort array entries must have exactly one field".to_string())
                })?;
                let direction = match dir.as_i64() {
                    Some(1) => SortDirection::Ascending,
                    Some(-1) => SortDirection::Descending,
                    _ => {
                        return Err(DbError::InvalidParameter(format!(
                            "sort direction for '{field}' must be 1 or -1"
                        )))
                    }
                };
                out.push(SortClause { field: field.clone(), direction });
            }
            Ok(out)
        }
        _ => Err(DbError::InvalidParameter(
            "$sort must be a path name or an array of {path: ±1} objects".to_string(),
        )),
    }
}

fn parse_non_negative(v: &Value, label: &str) -> Result<usize> {
    let n = v.as_i64().ok_or_else(|| DbError::InvalidParameter(format!("{label} must be a number")))?;
    if n < 0 {
        return Err(DbError::InvalidParameter(format!("{label} must be non-negative")));
    }
    Ok(n as usize)
}

/// None-aware comparison: a document missing the sort field sorts before
/// one that has it under ascending order, and after it under descending
/// order (the overall clause direction is applied uniformly, missing
/// field included - see spec boundary behavior "sort on an undefined
/// field orders undefined entries according to direction").
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Best-effort ordering across JSON scalars of the same type. Returns
/// `None` for uncomparable pairs (e.g. number vs. string), which the
/// caller treats as equal rather than erroring, keeping sort total.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
