//! Supervisor events
//!
//! Every state transition and every process failure is published on a
//! broadcast channel. Receivers that fall behind lose old events instead of
//! slowing the supervisor down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::stream::StreamState;

/// Capacity of the event channel
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    StateChanged {
        from: StreamState,
        to: StreamState,
    },
    SpawnFailed {
        reason: String,
    },
    Crashed {
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: Vec<String>,
    },
    /// A stop had to fall back to killing the process
    KillEscalated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub stream_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(stream_id: &str, kind: StreamEventKind) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Sending half of the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no receivers is fine.
    pub fn publish(&self, stream_id: &str, kind: StreamEventKind) {
        let _ = self.tx.send(StreamEvent::new(stream_id, kind));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

/// Log events until the channel closes
pub async fn log_events(mut rx: broadcast::Receiver<StreamEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                StreamEventKind::StateChanged { from, to } => {
                    tracing::info!("Stream {}: {} -> {}", event.stream_id, from, to);
                }
                StreamEventKind::SpawnFailed { reason } => {
                    tracing::error!("Stream {}: spawn failed: {}", event.stream_id, reason);
                }
                StreamEventKind::Crashed {
                    exit_code,
                    signal,
                    stderr_tail,
                } => {
                    tracing::error!(
                        "Stream {}: transcoder crashed (exit code {:?}, signal {:?}), stderr: {:?}",
                        event.stream_id,
                        exit_code,
                        signal,
                        stderr_tail
                    );
                }
                StreamEventKind::KillEscalated => {
                    tracing::warn!("Stream {}: transcoder had to be killed", event.stream_id);
                }
                StreamEventKind::Deleted => {
                    tracing::info!("Stream {} deleted", event.stream_id);
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Event log lagging, skipped {} event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
