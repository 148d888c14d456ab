//! JSON file backed document store
//!
//! Each collection lives in `<dir>/<collection>.json`. The whole file is
//! rewritten on every mutation (temp file + rename), which keeps the on-disk
//! copy consistent for the record counts this service deals with.
//!
//! Writers of one collection take that collection's lock while the file is
//! written. Readers and writers of other collections never wait on disk IO.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::memory::{CollectionData, MemoryStore};
use super::{DocumentStore, StoreResult};

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    id: String,
    doc: Value,
}

/// Document store persisted as JSON files
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    memory: MemoryStore,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `dir`, loading existing collections
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let memory = MemoryStore::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = std::fs::read(&path)?;
            let docs: Vec<StoredDocument> = serde_json::from_slice(&content)?;
            tracing::debug!("Loaded {} document(s) from {:?}", docs.len(), path);
            memory.with_collection(collection, |data| {
                for stored in docs {
                    data.put(&stored.id, stored.doc);
                }
            });
        }

        Ok(Self {
            dir,
            memory,
            writers: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }

    fn persist(&self, collection: &str, data: &CollectionData) -> StoreResult<()> {
        let docs: Vec<StoredDocument> = data
            .entries()
            .map(|(id, doc)| StoredDocument {
                id: id.clone(),
                doc: doc.clone(),
            })
            .collect();

        let path = self.collection_path(collection);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&docs)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Apply `mutate` to a copy of the collection, persist it, then commit
    fn mutate<R>(
        &self,
        collection: &str,
        mutate: impl FnOnce(&mut CollectionData) -> R,
    ) -> StoreResult<R> {
        let writer = Arc::clone(
            self.writers
                .entry(collection.to_string())
                .or_default()
                .value(),
        );
        let _writing = writer.lock();

        let mut next = self.memory.snapshot(collection);
        let result = mutate(&mut next);
        self.persist(collection, &next)?;
        self.memory.replace(collection, next);
        Ok(result)
    }
}

impl DocumentStore for JsonFileStore {
    fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.mutate(collection, |data| data.put(id, doc))
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        self.memory.get(collection, id)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.mutate(collection, |data| data.delete(id))
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<Value>> {
        self.memory.list(collection)
    }
}
