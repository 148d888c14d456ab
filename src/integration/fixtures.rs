//! Test fixtures for integration tests
//!
//! Fake transcoders are small `/bin/sh` scripts passed through
//! `leading_args`, so the generated argument template ends up in `$@`.

use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::config::{ServerConfig, TranscoderConfig};
use crate::http::create_router;
use crate::state::AppState;
use crate::store::{DocumentStore, MemoryStore};
use crate::supervisor::events::StreamEvent;
use crate::supervisor::{Stream, StreamState, StreamSupervisor};

/// Runs until asked to quit on stdin
pub const WELL_BEHAVED: &str = "read _line; exit 0";

/// Dies on its own a second after starting
pub const CRASHES_AFTER_START: &str =
    "sleep 1; echo 'Input #0, rtsp' >&2; echo 'rtsp://cam1/feed: Connection reset by peer' >&2; exit 1";

/// Writes the manifest (last argument), then behaves
pub const WRITES_MANIFEST: &str =
    r#"for last; do :; done; printf '#EXTM3U\n#EXT-X-VERSION:3\n' > "$last"; read _line; exit 0"#;

/// Ignores the quit request when the source URI contains "stubborn"
pub const STUBBORN_WHEN_MARKED: &str =
    r#"case "$*" in *stubborn*) exec sleep 30;; esac; read _line; exit 0"#;

/// When the source URI contains "stuck", ignores the quit request and leaves
/// a helper holding stderr open, so a kill is not confirmed for about two
/// seconds
pub const UNREAPED_WHEN_MARKED: &str =
    r#"case "$*" in *stuck*) sleep 4 & exec sleep 30;; esac; read _line; exit 0"#;

pub fn transcoder_config(output_root: &Path, script: &str) -> TranscoderConfig {
    TranscoderConfig {
        executable: "/bin/sh".to_string(),
        leading_args: vec![
            "-c".to_string(),
            script.to_string(),
            "transcoder".to_string(),
        ],
        output_root: output_root.to_path_buf(),
        grace_period_secs: 1,
        kill_timeout_secs: 5,
        ..Default::default()
    }
}

/// Application state over a scratch output directory
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<dyn DocumentStore>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new(script: &str) -> Self {
        Self::with_store(script, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(script: &str, store: Arc<dyn DocumentStore>) -> Self {
        Self::build(script, store, |_| {})
    }

    /// Harness with adjusted transcoder settings
    pub fn with_transcoder<F>(script: &str, adjust: F) -> Self
    where
        F: FnOnce(&mut TranscoderConfig),
    {
        Self::build(script, Arc::new(MemoryStore::new()), adjust)
    }

    fn build<F>(script: &str, store: Arc<dyn DocumentStore>, adjust: F) -> Self
    where
        F: FnOnce(&mut TranscoderConfig),
    {
        let dir = TempDir::new().unwrap();
        let mut transcoder = transcoder_config(&dir.path().join("live"), script);
        adjust(&mut transcoder);
        let config = ServerConfig {
            transcoder,
            ..Default::default()
        };
        let state = Arc::new(AppState::new(config, store.clone()).unwrap());
        Self { dir, store, state }
    }

    pub fn supervisor(&self) -> &Arc<StreamSupervisor> {
        &self.state.supervisor
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }
}

/// Poll until the stream's state matches `pred`
pub async fn wait_for_state<F>(supervisor: &StreamSupervisor, id: &str, pred: F) -> Stream
where
    F: Fn(&StreamState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stream = supervisor.get_stream(id).unwrap();
        if pred(&stream.state) {
            return stream;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("stream {} stuck in {}", id, stream.state);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_until_running(supervisor: &StreamSupervisor, id: &str) -> Stream {
    wait_for_state(supervisor, id, |s| *s == StreamState::Running).await
}

/// Everything already queued on the receiver
pub fn drain_events(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
