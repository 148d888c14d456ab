//! Document store
//!
//! Persistence for stream and overlay records. The supervisor and the
//! overlay store only see the [`DocumentStore`] trait, so the backend can be
//! swapped for an external database without touching either of them.
//!
//! - [`MemoryStore`]: process-local collections (default)
//! - [`JsonFileStore`]: one JSON file per collection on disk

pub mod file;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StoreError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Collection of streams
pub const STREAMS: &str = "streams";

/// Collection of overlays
pub const OVERLAYS: &str = "overlays";

/// Minimal CRUD interface over named collections of JSON documents.
///
/// `list` returns documents in insertion order; replacing an existing
/// document keeps its position.
pub trait DocumentStore: Send + Sync {
    fn put(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;
    fn list(&self, collection: &str) -> StoreResult<Vec<Value>>;
}

/// Typed view of a single collection
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _marker: PhantomData,
        }
    }

    pub fn put(&self, id: &str, doc: &T) -> StoreResult<()> {
        self.store.put(self.name, id, serde_json::to_value(doc)?)
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<T>> {
        match self.store.get(self.name, id)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(self.name, id)
    }

    pub fn list(&self) -> StoreResult<Vec<T>> {
        self.store
            .list(self.name)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }
}
