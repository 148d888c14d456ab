//! Overlay registry
//!
//! Overlays are scoped by stream id but never look at the stream itself:
//! they can be created, edited and deleted whether or not the stream is
//! running, or even exists.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::types::{Geometry, Overlay, OverlayKind, OverlayPatch};
use crate::error::{LiveError, Result};
use crate::store::{Collection, DocumentStore, OVERLAYS};

struct OverlayEntry {
    seq: u64,
    overlay: Overlay,
}

/// Write-through cache of the `overlays` collection
pub struct OverlayStore {
    overlays: DashMap<String, OverlayEntry>,
    next_seq: AtomicU64,
    collection: Collection<Overlay>,
}

impl OverlayStore {
    /// Create the store, loading any overlays already persisted
    pub fn open(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let collection: Collection<Overlay> = Collection::new(store, OVERLAYS);
        let overlays = DashMap::new();

        let existing = collection.list()?;
        let count = existing.len() as u64;
        for (seq, overlay) in existing.into_iter().enumerate() {
            overlays.insert(
                overlay.id.clone(),
                OverlayEntry {
                    seq: seq as u64,
                    overlay,
                },
            );
        }
        if count > 0 {
            tracing::info!("Restored {} overlay(s)", count);
        }

        Ok(Self {
            overlays,
            next_seq: AtomicU64::new(count),
            collection,
        })
    }

    /// Create an overlay for `stream_id`
    pub fn create(
        &self,
        stream_id: &str,
        kind: OverlayKind,
        content: String,
        geometry: Geometry,
    ) -> Result<Overlay> {
        if stream_id.trim().is_empty() {
            return Err(LiveError::InvalidOverlay("stream id is empty".to_string()));
        }
        geometry.validate()?;

        let now = Utc::now();
        let overlay = Overlay {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            kind,
            content,
            geometry,
            created_at: now,
            updated_at: now,
        };

        self.collection.put(&overlay.id, &overlay)?;
        self.overlays.insert(
            overlay.id.clone(),
            OverlayEntry {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                overlay: overlay.clone(),
            },
        );

        tracing::debug!(
            "Created {} overlay {} for stream {}",
            overlay.kind,
            overlay.id,
            stream_id
        );
        Ok(overlay)
    }

    /// Get an overlay by ID
    pub fn get(&self, overlay_id: &str) -> Result<Overlay> {
        self.overlays
            .get(overlay_id)
            .map(|e| e.overlay.clone())
            .ok_or_else(|| LiveError::OverlayNotFound(overlay_id.to_string()))
    }

    /// Overlays of one stream, in creation order
    pub fn list_for_stream(&self, stream_id: &str) -> Vec<Overlay> {
        let mut entries: Vec<(u64, Overlay)> = self
            .overlays
            .iter()
            .filter(|e| e.overlay.stream_id == stream_id)
            .map(|e| (e.seq, e.overlay.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, overlay)| overlay).collect()
    }

    /// Apply a partial update. The merged geometry is validated before
    /// anything is written.
    pub fn update(&self, overlay_id: &str, patch: OverlayPatch) -> Result<Overlay> {
        let mut entry = self
            .overlays
            .get_mut(overlay_id)
            .ok_or_else(|| LiveError::OverlayNotFound(overlay_id.to_string()))?;

        let mut updated = entry.overlay.clone();
        if let Some(kind) = patch.kind {
            updated.kind = kind;
        }
        if let Some(content) = patch.content {
            updated.content = content;
        }
        if let Some(geometry) = &patch.geometry {
            updated.geometry.apply(geometry);
            updated.geometry.validate()?;
        }
        updated.updated_at = Utc::now();

        self.collection.put(&updated.id, &updated)?;
        entry.overlay = updated.clone();
        Ok(updated)
    }

    /// Delete an overlay. Returns false if it did not exist.
    pub fn delete(&self, overlay_id: &str) -> Result<bool> {
        if !self.overlays.contains_key(overlay_id) {
            return Ok(false);
        }
        self.collection.delete(overlay_id)?;
        Ok(self.overlays.remove(overlay_id).is_some())
    }

    /// Delete every overlay of a stream, returning how many were removed
    pub fn delete_for_stream(&self, stream_id: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .overlays
            .iter()
            .filter(|e| e.overlay.stream_id == stream_id)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.delete(&id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }
}
