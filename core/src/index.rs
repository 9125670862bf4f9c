// src/index.rs
//! A single-field (or compound) secondary index.
//!
//! Keeps only `DocumentId` pointers; the canonical `Document` lives in
//! `IndexSet`'s arena (see index_set.rs's Design Notes on the handle
//! model). Backed by an ordinary `BTreeMap<IndexKey, Vec<DocumentId>>` -
//! not the multi-level on-disk B+Tree the teacher's storage engine uses,
//! since the per-index tree implementation is an external collaborator
//! this crate treats as a black box (see SPEC_FULL.md §4.1).

use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::document::{Document, DocumentId};
use crate::error::{DbError, Result};

/// Total-ordering wrapper over `f64` (NaN sorts as greater than everything,
/// matching no real document field - floats from `serde_json` never produce
/// NaN, but the wrapper needs to be total to live in a `BTreeMap` key).
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}
impl Eq for OrderedFloat {}
impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// An orderable projection of a JSON value, used as the index's map key.
/// Mirrors the type ordering MongoDB and this engine's query language
/// agree on: null < bool < number < string, and within a type, natural
/// order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Number(OrderedFloat),
    String(String),
    Compound(Vec<IndexKey>),
}

impl IndexKey {
    pub fn from_value(value: &Value) -> IndexKey {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => IndexKey::Number(OrderedFloat(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => IndexKey::String(s.clone()),
            Value::Array(arr) => IndexKey::Compound(arr.iter().map(IndexKey::from_value).collect()),
            Value::Object(_) => IndexKey::String(value.to_string()),
        }
    }
}

/// A field's index entry is missing (document doesn't have the field) vs.
/// present-with-null vs present-with-a-value. Non-unique indexes treat a
/// missing field as an indexable `Null` key, same as MongoDB's sparse=false
/// default; unique indexes enforce uniqueness only among present keys
/// (multiple documents may each lack the field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions { unique: false, sparse: false }
    }
}

pub struct Index {
    pub field_name: String,
    pub options: IndexOptions,
    tree: BTreeMap<IndexKey, Vec<DocumentId>>,
}

impl Index {
    pub fn new(field_name: impl Into<String>, options: IndexOptions) -> Self {
        Index { field_name: field_name.into(), options, tree: BTreeMap::new() }
    }

    fn key_for(&self, doc: &Document) -> Option<IndexKey> {
        match doc.get(&self.field_name) {
            Some(v) => Some(IndexKey::from_value(v)),
            None if self.options.sparse => None,
            None => Some(IndexKey::Null),
        }
    }

    /// Insert one document. On a unique-constraint violation nothing is
    /// mutated - the caller (`IndexSet`) relies on that to skip rollback
    /// of this particular index.
    pub fn insert(&mut self, doc: &Document) -> Result<()> {
        let key = match self.key_for(doc) {
            Some(k) => k,
            None => return Ok(()),
        };
        if self.options.unique {
            if let Some(existing) = self.tree.get(&key) {
                if !existing.is_empty() {
                    return Err(DbError::UniqueViolation {
                        index: self.field_name.clone(),
                        key: format!("{key:?}"),
                    });
                }
            }
        }
        self.tree.entry(key).or_insert_with(Vec::new).push(doc.id.clone());
        Ok(())
    }

    pub fn remove(&mut self, doc: &Document) {
        if let Some(key) = self.key_for(doc) {
            if let Some(bucket) = self.tree.get_mut(&key) {
                bucket.retain(|id| id != &doc.id);
                if bucket.is_empty() {
                    self.tree.remove(&key);
                }
            }
        }
    }

    /// Replace `old`'s entry with `new`'s. Returns an error (without
    /// mutating) if the change would violate uniqueness, so the caller can
    /// decide whether to roll back other indexes. A thin single-pair
    /// wrapper over `update_batch` - see that method for the batch case
    /// spec.md §4.1's Update protocol actually requires.
    pub fn update(&mut self, old: &Document, new: &Document) -> Result<()> {
        let pair = [(old.clone(), new.clone())];
        self.update_batch(&pair)
    }

    /// Apply a whole modification batch to this index atomically: every
    /// `old` entry is removed before any `new` entry is inserted, so two
    /// documents can swap unique keys within the same batch without a
    /// spurious collision, and a unique-constraint violation anywhere in
    /// the batch restores this index's pre-call contents exactly before
    /// the error is surfaced (spec.md §4.1: "the per-index `update`/
    /// `revertUpdate` pair must itself be atomic with respect to
    /// unique-key violations inside a batch").
    pub fn update_batch(&mut self, mods: &[(Document, Document)]) -> Result<()> {
        let snapshot = self.tree.clone();
        for (old, _) in mods {
            self.remove(old);
        }
        for (_, new) in mods {
            if let Err(e) = self.insert(new) {
                self.tree = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }

    /// The total inverse of `update_batch`: unconditionally restores the
    /// keys `mods` held before the update. Never fails - spec.md §4.1
    /// requires `revertUpdate` to be total, since it runs during rollback
    /// of an already-surfaced error and has no failure path of its own.
    pub fn revert_batch(&mut self, mods: &[(Document, Document)]) {
        for (_, new) in mods {
            self.remove(new);
        }
        for (old, _) in mods {
            if let Some(key) = self.key_for(old) {
                self.tree.entry(key).or_insert_with(Vec::new).push(old.id.clone());
            }
        }
    }

    pub fn get_matching(&self, value: &Value) -> Vec<DocumentId> {
        let key = IndexKey::from_value(value);
        self.tree.get(&key).cloned().unwrap_or_default()
    }

    pub fn get_matching_many(&self, values: &[Value]) -> Vec<DocumentId> {
        let mut out = Vec::new();
        for v in values {
            out.extend(self.get_matching(v));
        }
        out
    }

    /// Half-open/closed range scan. `None` on either bound means
    /// unbounded in that direction.
    pub fn get_between_bounds(
        &self,
        lower: Option<(Value, bool)>,
        upper: Option<(Value, bool)>,
    ) -> Vec<DocumentId> {
        let lo = match lower {
            None => Bound::Unbounded,
            Some((v, inclusive)) => {
                let k = IndexKey::from_value(&v);
                if inclusive { Bound::Included(k) } else { Bound::Excluded(k) }
            }
        };
        let hi = match upper {
            None => Bound::Unbounded,
            Some((v, inclusive)) => {
                let k = IndexKey::from_value(&v);
                if inclusive { Bound::Included(k) } else { Bound::Excluded(k) }
            }
        };
        self.tree
            .range((lo, hi))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    pub fn get_all(&self) -> Vec<DocumentId> {
        self.tree.values().flat_map(|ids| ids.iter().cloned()).collect()
    }

    pub fn reset(&mut self) {
        self.tree.clear();
    }

    pub fn len(&self) -> usize {
        self.tree.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
