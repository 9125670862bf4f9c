// src/collection.rs
//! The public API. Every method blocks the caller on the executor's
//! queue and returns a synchronous `Result<T>` - the callback-to-result
//! translation SPEC_FULL.md §6 calls for: "callbacks become completion
//! signals", here realized as an mpsc oneshot per call rather than a
//! `(err, result)` continuation.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::aggregation::AggregationState;
use crate::document::Document;
use crate::error::Result;
use crate::executor::Executor;
use crate::index::IndexOptions;
use crate::index_set::IndexSet;
use crate::modify;
use crate::persistence::{LogEntry, Persistence};
use crate::planner::{self, Candidates};
use crate::query_match;
use crate::{log_info, log_warn};

#[derive(Debug, Clone)]
pub struct CollectionOptions {
    /// `None` => pure in-memory collection, matching the spec's
    /// `inMemoryOnly` flag; persistence is ignored even if one was
    /// constructed.
    pub filename: Option<String>,
    /// Replay the log automatically on construction rather than waiting
    /// for an explicit `load_database()` call.
    pub autoload: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        CollectionOptions { filename: None, autoload: true }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub matched: usize,
    pub upserted_id: Option<String>,
}

struct Inner<P: Persistence> {
    index_set: IndexSet,
    persistence: P,
    /// Set by `aggregate()`, consumed by the next `find`/`findOne`/
    /// `update`/`remove` - and every call after that, until the next
    /// `aggregate()`. See aggregation.rs's module doc for why this is
    /// collection-wide mutable state rather than a per-call argument.
    aggregation: AggregationState,
}

/// A single document collection: an `IndexSet`, a persistence
/// collaborator, and the serialized executor that's the only thing
/// allowed to touch either.
pub struct Collection<P: Persistence + 'static> {
    state: Arc<Mutex<Inner<P>>>,
    executor: Executor,
    options: CollectionOptions,
}

impl<P: Persistence + 'static> Collection<P> {
    /// Constructs the collection and, per `options`, replays its log before
    /// returning. A `PersistenceFailure` during that autoload is a normal
    /// error value (spec.md §7), not a panic - the caller decides whether a
    /// corrupt or unreadable file is fatal.
    pub fn new(persistence: P, options: CollectionOptions) -> Result<Self> {
        let collection = Collection {
            state: Arc::new(Mutex::new(Inner {
                index_set: IndexSet::new(),
                persistence,
                aggregation: AggregationState::empty(),
            })),
            executor: Executor::new(),
            options,
        };
        if collection.options.filename.is_none() {
            // nothing to replay; open the gate immediately
            collection.executor.mark_ready();
        } else if collection.options.autoload {
            collection.load_database()?;
        }
        Ok(collection)
    }

    pub fn is_ready(&self) -> bool {
        self.executor.is_ready()
    }

    /// Replay the persistence log into a fresh `IndexSet`, then open the
    /// gate. Runs with `submit_bypass` so it isn't itself stuck behind
    /// the gate it opens (SPEC_FULL.md §5).
    pub fn load_database(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let result: Result<()> = self.executor.submit_bypass(move || {
            let mut inner = state.lock();
            let loaded = inner.persistence.load()?;
            let mut fresh = IndexSet::new();
            for (field, opts) in loaded.indexes {
                fresh.ensure_index(&field, opts)?;
            }
            fresh.insert_many(loaded.documents)?;
            inner.index_set = fresh;
            Ok(())
        });
        self.executor.mark_ready();
        if let Err(e) = &result {
            log_warn!("load_database failed: {e}");
        } else {
            log_info!("load_database complete");
        }
        result
    }

    pub fn ensure_index(&self, field: impl Into<String>, options: IndexOptions) -> Result<()> {
        let field = field.into();
        let state = Arc::clone(&self.state);
        let field_for_log = field.clone();
        self.executor.submit(move || {
            let mut inner = state.lock();
            inner.index_set.ensure_index(&field, options)?;
            inner.persistence.append(&LogEntry::EnsureIndex {
                field: field_for_log,
                unique: options.unique,
                sparse: options.sparse,
            })?;
            Ok(())
        })
    }

    pub fn remove_index(&self, field: impl Into<String>) -> Result<()> {
        let field = field.into();
        let state = Arc::clone(&self.state);
        let field_for_log = field.clone();
        self.executor.submit(move || {
            let mut inner = state.lock();
            inner.index_set.remove_index(&field)?;
            inner.persistence.append(&LogEntry::RemoveIndex { field: field_for_log })?;
            Ok(())
        })
    }

    /// Validate and store `spec`'s `$sort`/`$skip`/`$limit` as this
    /// collection's aggregation state, replacing whatever was configured
    /// before. Consumed by every `find`/`findOne`/`update`/`remove` call
    /// from here on, regardless of caller (spec.md §4.3/§9).
    pub fn aggregate(&self, spec: Value) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let parsed = AggregationState::parse(&spec)?;
            state.lock().aggregation = parsed;
            Ok(())
        })
    }

    pub fn insert(&self, value: Value) -> Result<Value> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let doc = Document::prepare_for_insert(value)?;
            let mut inner = state.lock();
            inner.index_set.add_to_indexes(doc.clone())?;
            inner.persistence.append(&LogEntry::Insert { doc: doc.to_value() })?;
            Ok(doc.to_value())
        })
    }

    pub fn insert_many(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let mut docs = Vec::with_capacity(values.len());
            for v in values {
                docs.push(Document::prepare_for_insert(v)?);
            }
            let mut inner = state.lock();
            inner.index_set.insert_many(docs.clone())?;
            for doc in &docs {
                inner.persistence.append(&LogEntry::Insert { doc: doc.to_value() })?;
            }
            Ok(docs.into_iter().map(|d| d.to_value()).collect())
        })
    }

    fn candidates(inner: &Inner<P>, query: &Value) -> Vec<Document> {
        match planner::select_candidates(&inner.index_set, query) {
            Candidates::Full => inner.index_set.all_documents().cloned().collect(),
            Candidates::Narrowed(ids) => ids
                .into_iter()
                .filter_map(|id| inner.index_set.get(&id).cloned())
                .collect(),
        }
    }

    pub fn count(&self, query: Value) -> Result<usize> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let inner = state.lock();
            let matched = Self::candidates(&inner, &query)
                .into_iter()
                .filter(|d| query_match::matches(d, &query))
                .count();
            Ok(matched)
        })
    }

    /// Candidates, filtered by the matcher, then `aggregate(matches,
    /// true)`: sort (if configured), then skip/limit.
    pub fn find(&self, query: Value) -> Result<Vec<Value>> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let inner = state.lock();
            let matched: Vec<Document> = Self::candidates(&inner, &query)
                .into_iter()
                .filter(|d| query_match::matches(d, &query))
                .collect();
            let shaped = inner.aggregation.aggregate(matched, true);
            Ok(shaped.into_iter().map(|d| d.to_value()).collect())
        })
    }

    /// Sorts the *candidate* domain (not the filtered match set) per the
    /// configured aggregation state, never applies skip/limit, then
    /// returns the last candidate - in sorted order - that satisfies the
    /// matcher. This mirrors a documented source quirk rather than a
    /// "first match" shortcut; see DESIGN.md's Open Question log.
    pub fn find_one(&self, query: Value) -> Result<Option<Value>> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let inner = state.lock();
            let candidates = Self::candidates(&inner, &query);
            let sorted = inner.aggregation.sort_only(candidates);
            let last_match = sorted.into_iter().filter(|d| query_match::matches(d, &query)).last();
            Ok(last_match.map(|d| d.to_value()))
        })
    }

    /// `update_doc` is either a full replacement (no `$`-prefixed
    /// top-level key) or a modifier document. `options.upsert` inserts a
    /// document derived from the query's equality fields when nothing
    /// matches. Without `multi`, at most one survivor (after sort) is
    /// touched; with `multi`, survivors are whatever the configured
    /// aggregation state's skip/limit lets through.
    pub fn update(&self, query: Value, update_doc: Value, options: UpdateOptions) -> Result<UpdateResult> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let is_modifier = update_doc
                .as_object()
                .map(|o| o.keys().any(|k| k.starts_with('$')))
                .unwrap_or(false);

            let mut inner = state.lock();

            if options.upsert {
                let candidates = Self::candidates(&inner, &query);
                let sorted = inner.aggregation.sort_only(candidates);
                let exists = sorted.iter().any(|d| query_match::matches(d, &query));
                if !exists {
                    let seed = if is_modifier {
                        modify::apply_modifiers(&equality_seed(&query), &update_doc)?
                    } else {
                        update_doc.clone()
                    };
                    let doc = Document::prepare_for_insert(seed)?;
                    inner.index_set.add_to_indexes(doc.clone())?;
                    inner.persistence.append(&LogEntry::Insert { doc: doc.to_value() })?;
                    return Ok(UpdateResult { matched: 1, upserted_id: Some(doc.id.to_string()) });
                }
            }

            let matched: Vec<Document> = Self::candidates(&inner, &query)
                .into_iter()
                .filter(|d| query_match::matches(d, &query))
                .collect();

            let survivors = inner.aggregation.aggregate(matched, options.multi);
            let survivors: Vec<Document> =
                if options.multi { survivors } else { survivors.into_iter().take(1).collect() };

            // Build every survivor's (old, new) pair before touching any
            // index, then commit the whole batch through one atomic call -
            // spec.md §4.1's Update protocol is a per-batch operation, not
            // a per-document loop, so a conflict on document #3 must not
            // leave documents #1-#2 already mutated.
            let mut mods = Vec::with_capacity(survivors.len());
            for old in &survivors {
                let new_value = if is_modifier {
                    modify::apply_modifiers(&old.to_value(), &update_doc)?
                } else {
                    let mut v = update_doc.clone();
                    if let Some(obj) = v.as_object_mut() {
                        obj.insert("_id".to_string(), old.get_id_value());
                    }
                    v
                };
                let prepared = Document::prepare_for_insert(new_value)?;
                let new_doc = Document::new(old.id.clone(), prepared.fields);
                mods.push((old.clone(), new_doc));
            }

            inner.index_set.update_indexes(&mods)?;

            for (old, new_doc) in &mods {
                inner
                    .persistence
                    .append(&LogEntry::Update { id: old.id.to_string(), doc: new_doc.to_value() })?;
            }

            Ok(UpdateResult { matched: mods.len(), upserted_id: None })
        })
    }

    /// Without `multi`, removes at most one survivor (post-sort); with
    /// `multi`, removes whatever the configured aggregation state's
    /// skip/limit lets through, same convention as `update`.
    pub fn remove(&self, query: Value, multi: bool) -> Result<usize> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let mut inner = state.lock();
            let matched: Vec<Document> = Self::candidates(&inner, &query)
                .into_iter()
                .filter(|d| query_match::matches(d, &query))
                .collect();
            let survivors = inner.aggregation.aggregate(matched, multi);
            let survivors: Vec<Document> = if multi { survivors } else { survivors.into_iter().take(1).collect() };
            for doc in &survivors {
                inner.index_set.remove_from_indexes(doc);
                inner.persistence.append(&LogEntry::Remove { id: doc.id.to_string() })?;
            }
            Ok(survivors.len())
        })
    }

    /// Every live document, `_id` included - a synchronous snapshot via
    /// the `_id` index, matching spec.md §6's `getAllData()`.
    pub fn get_all_data(&self) -> Result<Vec<Value>> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let inner = state.lock();
            Ok(inner.index_set.all_documents().map(|d| d.to_value()).collect())
        })
    }

    pub fn compact(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.executor.submit(move || {
            let mut inner = state.lock();
            let documents: Vec<Document> = inner.index_set.all_documents().cloned().collect();
            let indexes = inner
                .index_set
                .field_names()
                .iter()
                .filter(|f| f.as_str() != "_id")
                .map(|f| {
                    let idx = inner.index_set.index(f).expect("field_names/index in sync");
                    (f.clone(), idx.options)
                })
                .collect();
            let state_to_write = crate::persistence::LoadedState { documents, indexes };
            inner.persistence.compact(&state_to_write)
        })
    }
}

/// The query's top-level equality fields (plain scalars or embedded-doc
/// equality, skipping `$`-prefixed keys and operator documents), used as
/// the seed document for an upsert with no match.
fn equality_seed(query: &Value) -> Value {
    let mut seed = serde_json::Map::new();
    if let Some(obj) = query.as_object() {
        for (k, v) in obj {
            let is_operator_doc = matches!(v, Value::Object(inner)
                if inner.keys().next().map(|k| k.starts_with('$')).unwrap_or(false));
            if !k.starts_with('$') && !is_operator_doc {
                seed.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use serde_json::json;

    fn memory_collection() -> Collection<MemoryPersistence> {
        Collection::new(MemoryPersistence, CollectionOptions { filename: None, autoload: true }).unwrap()
    }

    #[test]
    fn insert_then_find() {
        let c = memory_collection();
        c.insert(json!({"name": "Ada", "age": 30})).unwrap();
        c.insert(json!({"name": "Bob", "age": 40})).unwrap();
        let results = c.find(json!({"age": {"$gte": 35}})).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["name"], json!("Bob"));
    }

    #[test]
    fn find_respects_configured_aggregation_state() {
        let c = memory_collection();
        for n in 1..=5 {
            c.insert(json!({"n": n})).unwrap();
        }
        c.aggregate(json!({"$sort": [{"n": -1}], "$skip": 1, "$limit": 2})).unwrap();
        let page = c.find(json!({})).unwrap();
        let ns: Vec<i64> = page.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 3]);
    }

    #[test]
    fn find_one_returns_last_match_in_sorted_candidate_order() {
        let c = memory_collection();
        c.insert(json!({"tag": "a", "n": 1})).unwrap();
        c.insert(json!({"tag": "a", "n": 2})).unwrap();
        c.aggregate(json!({"$sort": "n"})).unwrap();
        let found = c.find_one(json!({"tag": "a"})).unwrap().unwrap();
        assert_eq!(found["n"], json!(2));
    }

    #[test]
    fn find_one_returns_none_when_no_match() {
        let c = memory_collection();
        let result = c.find_one(json!({"x": 1})).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn update_single_vs_multi() {
        let c = memory_collection();
        c.insert(json!({"tag": "a", "n": 1})).unwrap();
        c.insert(json!({"tag": "a", "n": 2})).unwrap();
        let result = c
            .update(json!({"tag": "a"}), json!({"$set": {"hit": true}}), UpdateOptions { multi: false, upsert: false })
            .unwrap();
        assert_eq!(result.matched, 1);

        let result = c
            .update(json!({"tag": "a"}), json!({"$set": {"hit": true}}), UpdateOptions { multi: true, upsert: false })
            .unwrap();
        assert_eq!(result.matched, 2);
    }

    #[test]
    fn upsert_inserts_when_absent_and_reports_matched_one() {
        let c = memory_collection();
        let result = c
            .update(json!({"key": "k1"}), json!({"$set": {"val": 5}}), UpdateOptions { multi: false, upsert: true })
            .unwrap();
        assert_eq!(result.matched, 1);
        assert!(result.upserted_id.is_some());
        let all = c.get_all_data().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["key"], json!("k1"));
        assert_eq!(all[0]["val"], json!(5));
    }

    #[test]
    fn remove_respects_multi_flag() {
        let c = memory_collection();
        c.insert(json!({"x": 1})).unwrap();
        c.insert(json!({"x": 1})).unwrap();
        let removed = c.remove(json!({"x": 1}), false).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(c.count(json!({})).unwrap(), 1);
    }

    #[test]
    fn remove_multi_true_after_inserting_five() {
        let c = memory_collection();
        for _ in 0..5 {
            c.insert(json!({})).unwrap();
        }
        let removed = c.remove(json!({}), true).unwrap();
        assert_eq!(removed, 5);
        assert!(c.get_all_data().unwrap().is_empty());
    }

    #[test]
    fn ensure_index_then_unique_violation() {
        let c = memory_collection();
        c.ensure_index("email", IndexOptions { unique: true, sparse: false }).unwrap();
        c.insert(json!({"email": "x@y.com"})).unwrap();
        let err = c.insert(json!({"email": "x@y.com"}));
        assert!(err.is_err());
    }

    #[test]
    fn count_with_query() {
        let c = memory_collection();
        c.insert(json!({"a": 1})).unwrap();
        c.insert(json!({"a": 2})).unwrap();
        assert_eq!(c.count(json!({})).unwrap(), 2);
        assert_eq!(c.count(json!({"a": 1})).unwrap(), 1);
    }

    #[test]
    fn seed_scenario_one_duplicate_id_rejected() {
        let c = memory_collection();
        c.insert(json!({"_id": "a", "x": 1})).unwrap();
        let err = c.insert(json!({"_id": "a", "x": 2}));
        assert!(err.is_err());
        let all = c.find(json!({})).unwrap();
        assert_eq!(all, vec![json!({"_id": "a", "x": 1})]);
    }

    #[test]
    fn seed_scenario_three_sort_desc_limit_two() {
        let c = memory_collection();
        c.insert(json!({"a": 1})).unwrap();
        c.insert(json!({"a": 2})).unwrap();
        c.insert(json!({"a": 3})).unwrap();
        c.aggregate(json!({"$sort": [{"a": -1}], "$limit": 2})).unwrap();
        let results = c.find(json!({})).unwrap();
        let values: Vec<i64> = results.iter().map(|d| d["a"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![3, 2]);
    }

    #[test]
    fn seed_scenario_two_ensure_index_over_duplicates_is_auto_removed() {
        let c = memory_collection();
        c.insert(json!({"x": 1})).unwrap();
        c.insert(json!({"x": 1})).unwrap();
        let err = c.ensure_index("x", IndexOptions { unique: true, sparse: false });
        assert!(err.is_err());
        // the failed index must not linger; a later non-unique index on the
        // same field should succeed with no conflict from stale state.
        c.ensure_index("x", IndexOptions::default()).unwrap();
    }

    #[test]
    fn seed_scenario_four_upsert_missing_id() {
        let c = memory_collection();
        let result = c
            .update(json!({"_id": "missing"}), json!({"$set": {"x": 9}}), UpdateOptions { multi: false, upsert: true })
            .unwrap();
        assert_eq!(result.matched, 1);
        assert!(result.upserted_id.is_some());
        let found = c.find_one(json!({"_id": "missing"})).unwrap().unwrap();
        assert_eq!(found["x"], json!(9));
    }
}
