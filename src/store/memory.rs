//! In-memory document store

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use super::{DocumentStore, StoreResult};

/// Documents of one collection, in insertion order
#[derive(Debug, Default, Clone)]
pub(crate) struct CollectionData {
    order: Vec<String>,
    docs: HashMap<String, Value>,
}

impl CollectionData {
    pub(crate) fn put(&mut self, id: &str, doc: Value) {
        if self.docs.insert(id.to_string(), doc).is_none() {
            self.order.push(id.to_string());
        }
    }

    pub(crate) fn delete(&mut self, id: &str) -> bool {
        if self.docs.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.docs.get(id).map(|doc| (id, doc)))
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|id| self.docs.get(id).cloned())
            .collect()
    }
}

/// Process-local store; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, CollectionData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one collection
    pub(crate) fn snapshot(&self, collection: &str) -> CollectionData {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn replace(&self, collection: &str, data: CollectionData) {
        self.collections.write().insert(collection.to_string(), data);
    }

    /// Run `f` against a collection under the write lock
    pub(crate) fn with_collection<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut CollectionData) -> R,
    ) -> R {
        let mut collections = self.collections.write();
        f(collections.entry(collection.to_string()).or_default())
    }
}

impl DocumentStore for MemoryStore {
    fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.with_collection(collection, |c| c.put(id, doc));
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.docs.get(id).cloned()))
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        Ok(self.with_collection(collection, |c| c.delete(id)))
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(CollectionData::values)
            .unwrap_or_default())
    }
}
