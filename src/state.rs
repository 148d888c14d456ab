//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The stream supervisor
//! - The overlay registry
//! - Metrics
//! - Server configuration

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::overlay::OverlayStore;
use crate::store::DocumentStore;
use crate::supervisor::StreamSupervisor;

/// Application state shared across all handlers
pub struct AppState {
    /// Owner of every stream and transcoder process
    pub supervisor: Arc<StreamSupervisor>,

    /// Overlay metadata
    pub overlays: OverlayStore,

    pub metrics: Arc<Metrics>,

    /// Server configuration
    pub config: ServerConfig,
}

impl AppState {
    /// Build the state on top of `store`, restoring persisted records
    pub fn new(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let supervisor = Arc::new(StreamSupervisor::open(
            config.transcoder.clone(),
            config.max_concurrent_streams,
            Arc::clone(&store),
            Arc::clone(&metrics),
        )?);
        let overlays = OverlayStore::open(store)?;

        Ok(Self {
            supervisor,
            overlays,
            metrics,
            config,
        })
    }
}
