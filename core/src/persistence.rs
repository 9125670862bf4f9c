// src/persistence.rs
//! The persistence contract (SPEC_FULL.md §4.6) and two implementations.
//!
//! The on-disk file driver (fsync cadence, compaction strategy, crash
//! recovery journal format) is an external collaborator this crate treats
//! as a black box - grounded on `storage/traits.rs`'s `Storage` trait
//! shape, not on the teacher's own WAL/CRC32 binary format, which is the
//! literal internals the spec scopes out. What's left is a plain
//! line-delimited JSON append log: every committed operation appends one
//! line, and loading replays the whole file by folding each line over an
//! initially-empty state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, DocumentId};
use crate::error::{DbError, Result};
use crate::index::IndexOptions;
use crate::log_debug;

/// One line of the append log. `Insert`/`Update` carry the full document
/// value (post-modification, `_id` included) so replay never needs to
/// re-run application logic - it only needs to fold state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEntry {
    Insert { doc: Value },
    Update { id: String, doc: Value },
    Remove { id: String },
    EnsureIndex { field: String, unique: bool, sparse: bool },
    RemoveIndex { field: String },
}

/// The result of folding an entire log: a flat set of live documents plus
/// the indexes that were ever created (minus ones later removed), which
/// `collection.rs` replays into a fresh `IndexSet`.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub documents: Vec<Document>,
    pub indexes: Vec<(String, IndexOptions)>,
}

pub trait Persistence: Send {
    fn append(&mut self, entry: &LogEntry) -> Result<()>;
    fn load(&mut self) -> Result<LoadedState>;
    /// Rewrite the log to just the entries needed to reconstruct `state`,
    /// discarding dead history (tombstoned removes, superseded updates).
    fn compact(&mut self, state: &LoadedState) -> Result<()>;
}

/// In-memory-only collection: appends are accepted (so callers don't need
/// to special-case it) but never persisted past process lifetime, and
/// `load` always returns empty state.
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn append(&mut self, _entry: &LogEntry) -> Result<()> {
        Ok(())
    }
    fn load(&mut self) -> Result<LoadedState> {
        Ok(LoadedState::default())
    }
    fn compact(&mut self, _state: &LoadedState) -> Result<()> {
        Ok(())
    }
}

pub struct FilePersistence {
    path: PathBuf,
    file: File,
}

impl FilePersistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        Ok(FilePersistence { path, file })
    }

    fn reopen_for_append(&mut self) -> Result<()> {
        self.file = OpenOptions::new().create(true).append(true).read(true).open(&self.path)?;
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }

    fn load(&mut self) -> Result<LoadedState> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut docs: Vec<Document> = Vec::new();
        let mut indexes: Vec<(String, IndexOptions)> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = serde_json::from_str(&line).map_err(|e| {
                DbError::Persistence(format!("corrupt log line: {e}"))
            })?;
            apply_entry(&mut docs, &mut indexes, entry);
        }
        log_debug!("loaded {} documents, {} indexes from {:?}", docs.len(), indexes.len(), self.path);
        Ok(LoadedState { documents: docs, indexes })
    }

    fn compact(&mut self, state: &LoadedState) -> Result<()> {
        let tmp_path = self.path.with_extension("compact.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for (field, opts) in &state.indexes {
                let entry = LogEntry::EnsureIndex { field: field.clone(), unique: opts.unique, sparse: opts.sparse };
                writeln!(tmp, "{}", serde_json::to_string(&entry)?)?;
            }
            for doc in &state.documents {
                let entry = LogEntry::Insert { doc: doc.to_value() };
                writeln!(tmp, "{}", serde_json::to_string(&entry)?)?;
            }
            tmp.flush()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        self.reopen_for_append()?;
        Ok(())
    }
}

fn apply_entry(docs: &mut Vec<Document>, indexes: &mut Vec<(String, IndexOptions)>, entry: LogEntry) {
    match entry {
        LogEntry::Insert { doc } => {
            if let Ok(d) = value_to_document(doc) {
                docs.retain(|existing| existing.id != d.id);
                docs.push(d);
            }
        }
        LogEntry::Update { id, doc } => {
            if let Ok(d) = value_to_document(doc) {
                docs.retain(|existing| existing.id != DocumentId(id.clone()));
                docs.push(d);
            }
        }
        LogEntry::Remove { id } => {
            docs.retain(|d| d.id != DocumentId(id.clone()));
        }
        LogEntry::EnsureIndex { field, unique, sparse } => {
            if !indexes.iter().any(|(f, _)| f == &field) {
                indexes.push((field, IndexOptions { unique, sparse }));
            }
        }
        LogEntry::RemoveIndex { field } => {
            indexes.retain(|(f, _)| f != &field);
        }
    }
}

fn value_to_document(mut value: Value) -> io::Result<Document> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "log entry document must be an object"))?;
    let id = obj
        .remove("_id")
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "log entry document missing _id"))?;
    let fields = obj.into_iter().map(|(k, v)| (k, v.clone())).collect();
    Ok(Document::new(DocumentId(id), fields))
}
