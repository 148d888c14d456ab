//! Stream supervisor
//!
//! The supervisor is the only owner of transcoder processes. Each stream has
//! an entry holding its record and a process slot; the slot sits behind an
//! async mutex that every start, stop, delete, restart and crash handler
//! takes before looking at the process. Different streams never share a
//! lock.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::events::{EventBus, StreamEvent, StreamEventKind};
use super::stream::{validate_source_uri, Stream, StreamState};
use crate::config::TranscoderConfig;
use crate::error::{LiveError, ProcessFailure, Result};
use crate::metrics::Metrics;
use crate::process::{ExitOutcome, ProcessHandle, MANIFEST_NAME};
use crate::store::{Collection, DocumentStore, STREAMS};

/// URL path under which a stream's playlist is served
pub fn output_location_for(stream_id: &str) -> String {
    format!("/live/{}/{}", stream_id, MANIFEST_NAME)
}

struct LiveProcess {
    run: u64,
    handle: Arc<ProcessHandle>,
}

#[derive(Default)]
struct ProcessSlot {
    live: Option<LiveProcess>,
    /// Killed process whose exit was never observed; blocks a restart
    unreaped: Option<Arc<ProcessHandle>>,
    /// Number of processes spawned for this stream so far
    runs: u64,
}

struct StreamEntry {
    seq: u64,
    record: RwLock<Stream>,
    slot: Arc<tokio::sync::Mutex<ProcessSlot>>,
    /// Set under the slot lock once the stream is deleted
    removed: AtomicBool,
}

impl StreamEntry {
    fn new(seq: u64, stream: Stream) -> Self {
        Self {
            seq,
            record: RwLock::new(stream),
            slot: Arc::new(tokio::sync::Mutex::new(ProcessSlot::default())),
            removed: AtomicBool::new(false),
        }
    }

    fn id(&self) -> String {
        self.record.read().id.clone()
    }

    fn state(&self) -> StreamState {
        self.record.read().state.clone()
    }
}

/// Result of stopping every stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct StreamSupervisor {
    streams: DashMap<String, Arc<StreamEntry>>,
    next_seq: AtomicU64,
    /// Serializes the concurrency limit check with the insert
    admission: Mutex<()>,
    collection: Collection<Stream>,
    config: TranscoderConfig,
    max_streams: Option<usize>,
    events: EventBus,
    metrics: Arc<Metrics>,
    live_processes: AtomicUsize,
}

impl StreamSupervisor {
    /// Create the supervisor and reload persisted streams.
    ///
    /// No process survives a service restart, so any stream persisted in a
    /// non-terminal state is marked failed.
    pub fn open(
        config: TranscoderConfig,
        max_streams: Option<usize>,
        store: Arc<dyn DocumentStore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let collection: Collection<Stream> = Collection::new(store, STREAMS);
        let streams = DashMap::new();

        let existing = collection.list()?;
        let count = existing.len() as u64;
        let mut interrupted = 0;
        for (seq, mut stream) in existing.into_iter().enumerate() {
            if !stream.state.is_terminal() {
                stream.state = StreamState::failed(ProcessFailure::Interrupted);
                stream.updated_at = Utc::now();
                if let Err(e) = collection.put(&stream.id, &stream) {
                    tracing::warn!("Failed to persist recovered stream {}: {}", stream.id, e);
                }
                metrics.record_failure("interrupted");
                interrupted += 1;
            }
            streams.insert(
                stream.id.clone(),
                Arc::new(StreamEntry::new(seq as u64, stream)),
            );
        }
        if count > 0 {
            tracing::info!(
                "Restored {} stream(s), {} interrupted by restart",
                count,
                interrupted
            );
        }

        Ok(Self {
            streams,
            next_seq: AtomicU64::new(count),
            admission: Mutex::new(()),
            collection,
            config,
            max_streams,
            events: EventBus::default(),
            metrics,
            live_processes: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Directory the transcoder of `stream_id` writes into
    pub fn output_dir_for(&self, stream_id: &str) -> PathBuf {
        self.config.output_root.join(stream_id)
    }

    /// Number of transcoder processes currently registered
    pub fn live_process_count(&self) -> usize {
        self.live_processes.load(Ordering::SeqCst)
    }

    /// Streams that are not yet stopped or failed
    pub fn active_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|e| !e.record.read().state.is_terminal())
            .count()
    }

    fn entry(&self, stream_id: &str) -> Option<Arc<StreamEntry>> {
        self.streams.get(stream_id).map(|e| Arc::clone(e.value()))
    }

    /// Register a new stream and start its transcoder in the background.
    ///
    /// Returns as soon as the `Starting` record is persisted.
    pub async fn create_stream(
        self: &Arc<Self>,
        source_uri: &str,
        display_name: Option<String>,
    ) -> Result<Stream> {
        let source_uri = source_uri.trim();
        validate_source_uri(source_uri, &self.config.allowed_schemes)?;

        let display_name = display_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| source_uri.to_string());
        let stream = Stream::new(
            Uuid::new_v4().to_string(),
            source_uri.to_string(),
            display_name,
        );

        let entry = Arc::new(StreamEntry::new(
            self.next_seq.fetch_add(1, Ordering::Relaxed),
            stream.clone(),
        ));
        // Held until the first start attempt is over, so a stop issued right
        // after creation waits for it.
        let slot = Arc::clone(&entry.slot).lock_owned().await;

        {
            let _admission = self.admission.lock();
            if let Some(limit) = self.max_streams {
                if self.active_count() >= limit {
                    return Err(LiveError::TooManyStreams(limit));
                }
            }
            self.collection.put(&stream.id, &stream)?;
            self.streams.insert(stream.id.clone(), Arc::clone(&entry));
        }

        self.metrics.record_stream_created();
        tracing::info!(
            "Created stream {} ({}) for {}",
            stream.id,
            stream.display_name,
            stream.source_uri
        );

        self.spawn_start(entry, slot);
        Ok(stream)
    }

    fn spawn_start(self: &Arc<Self>, entry: Arc<StreamEntry>, mut slot: OwnedMutexGuard<ProcessSlot>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.start_locked(&entry, &mut slot);
        });
    }

    /// Start the transcoder for a stream in `Starting` state. Returns whether
    /// a process was spawned; a second call while one is live is a no-op.
    /// Production starts go through `spawn_start`, which already holds the lock.
    #[cfg(test)]
    pub async fn start_process_for(self: &Arc<Self>, stream_id: &str) -> Result<bool> {
        let entry = self
            .entry(stream_id)
            .ok_or_else(|| LiveError::StreamNotFound(stream_id.to_string()))?;
        let mut slot = entry.slot.lock().await;
        Ok(self.start_locked(&entry, &mut slot))
    }

    fn start_locked(self: &Arc<Self>, entry: &Arc<StreamEntry>, slot: &mut ProcessSlot) -> bool {
        if entry.removed.load(Ordering::SeqCst) {
            return false;
        }
        let (id, source_uri, state) = {
            let record = entry.record.read();
            (record.id.clone(), record.source_uri.clone(), record.state.clone())
        };
        if slot.live.is_some() {
            tracing::debug!("Stream {} already has a live transcoder", id);
            return false;
        }
        if state != StreamState::Starting {
            tracing::debug!("Stream {} is {}, not starting a transcoder", id, state);
            return false;
        }

        let output_dir = self.output_dir_for(&id);
        match ProcessHandle::spawn(&id, &source_uri, &output_dir, &self.config) {
            Ok(handle) => {
                slot.runs += 1;
                let run = slot.runs;
                let handle = Arc::new(handle);
                slot.live = Some(LiveProcess {
                    run,
                    handle: Arc::clone(&handle),
                });
                self.live_processes.fetch_add(1, Ordering::SeqCst);

                let location = output_location_for(&id);
                self.transition_with(entry, StreamState::Running, |record| {
                    record.output_location = Some(location);
                });

                let supervisor = Arc::clone(self);
                let entry = Arc::clone(entry);
                tokio::spawn(async move {
                    let outcome = handle.wait().await;
                    supervisor.on_process_exit(&entry, run, outcome).await;
                });
                true
            }
            Err(e) => {
                let reason = ProcessFailure::Spawn(e).to_string();
                tracing::error!("Stream {}: {}", id, reason);
                self.metrics.record_spawn_failure();
                self.events.publish(
                    &id,
                    StreamEventKind::SpawnFailed {
                        reason: reason.clone(),
                    },
                );
                self.transition(entry, StreamState::failed(reason));
                false
            }
        }
    }

    /// Watcher callback: the process of `run` exited
    async fn on_process_exit(&self, entry: &StreamEntry, run: u64, outcome: ExitOutcome) {
        let mut slot = entry.slot.lock().await;
        match &slot.live {
            Some(live) if live.run == run => {}
            // stopped on request, the stop already handled it
            _ => return,
        }
        self.record_crash_locked(entry, &mut slot, outcome);
    }

    /// An exit nobody asked for while the stream was running
    fn record_crash_locked(&self, entry: &StreamEntry, slot: &mut ProcessSlot, outcome: ExitOutcome) {
        self.take_live(slot);
        if entry.state() != StreamState::Running {
            return;
        }

        let id = entry.id();
        let failure = ProcessFailure::Crash {
            status: outcome.status_text(),
            stderr_tail: outcome.stderr_tail.clone(),
        };
        tracing::warn!("Stream {}: {}", id, failure);
        self.metrics.record_crash();
        self.events.publish(
            &id,
            StreamEventKind::Crashed {
                exit_code: outcome.exit_code,
                signal: outcome.signal,
                stderr_tail: outcome.stderr_tail,
            },
        );
        self.transition(entry, StreamState::failed(failure));
    }

    fn take_live(&self, slot: &mut ProcessSlot) -> Option<LiveProcess> {
        let live = slot.live.take();
        if live.is_some() {
            self.live_processes.fetch_sub(1, Ordering::SeqCst);
        }
        live
    }

    /// Stop a stream's transcoder.
    ///
    /// Returns false for unknown or already finished streams, and when the
    /// process could not be confirmed dead (the stream is then
    /// `Failed("kill-timeout")`).
    pub async fn stop_stream(&self, stream_id: &str) -> bool {
        let Some(entry) = self.entry(stream_id) else {
            return false;
        };
        let mut slot = entry.slot.lock().await;
        self.stop_locked(&entry, &mut slot).await
    }

    async fn stop_locked(&self, entry: &StreamEntry, slot: &mut ProcessSlot) -> bool {
        if entry.removed.load(Ordering::SeqCst) || entry.state().is_terminal() {
            return false;
        }

        // exited before the watcher got the lock
        if let Some(outcome) = slot.live.as_ref().and_then(|l| l.handle.exit_outcome()) {
            self.record_crash_locked(entry, slot, outcome);
            return false;
        }

        let id = entry.id();
        self.transition(entry, StreamState::Stopping);

        let Some(live) = self.take_live(slot) else {
            self.transition(entry, StreamState::Stopped);
            self.metrics.record_stop();
            return true;
        };

        let exited = live.handle.terminate(self.config.grace_period()).await;
        if live.handle.was_force_killed() {
            self.metrics.record_kill_escalation();
            self.events.publish(&id, StreamEventKind::KillEscalated);
        }

        if exited {
            self.transition(entry, StreamState::Stopped);
            self.metrics.record_stop();
            true
        } else {
            tracing::error!("Stream {}: transcoder did not die after kill", id);
            slot.unreaped = Some(live.handle);
            self.metrics.record_kill_timeout();
            self.transition(entry, StreamState::failed(ProcessFailure::KillTimeout));
            false
        }
    }

    /// Stop the stream if needed, then forget it. With `purge_output` the
    /// segment directory is removed too.
    pub async fn delete_stream(&self, stream_id: &str, purge_output: bool) -> Result<()> {
        let entry = self
            .entry(stream_id)
            .ok_or_else(|| LiveError::StreamNotFound(stream_id.to_string()))?;
        let mut slot = entry.slot.lock().await;
        if entry.removed.load(Ordering::SeqCst) {
            return Err(LiveError::StreamNotFound(stream_id.to_string()));
        }

        if !entry.state().is_terminal() {
            self.stop_locked(&entry, &mut slot).await;
        }

        entry.removed.store(true, Ordering::SeqCst);
        self.streams.remove(stream_id);
        if let Err(e) = self.collection.delete(stream_id) {
            tracing::warn!("Failed to delete stream {} from store: {}", stream_id, e);
        }
        drop(slot);

        if purge_output {
            let dir = self.output_dir_for(stream_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => tracing::debug!("Removed output directory {:?}", dir),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove output directory {:?}: {}", dir, e),
            }
        }

        tracing::info!("Deleted stream {}", stream_id);
        self.events.publish(stream_id, StreamEventKind::Deleted);
        Ok(())
    }

    /// Stop the stream if it is still active, then start a fresh run.
    ///
    /// Refused while a process killed by an earlier stop has not been reaped.
    pub async fn restart_stream(self: &Arc<Self>, stream_id: &str) -> Result<Stream> {
        let entry = self
            .entry(stream_id)
            .ok_or_else(|| LiveError::StreamNotFound(stream_id.to_string()))?;
        let mut slot = Arc::clone(&entry.slot).lock_owned().await;
        if entry.removed.load(Ordering::SeqCst) {
            return Err(LiveError::StreamNotFound(stream_id.to_string()));
        }
        if let Some(handle) = &slot.unreaped {
            if !handle.has_exited() {
                return Err(LiveError::ProcessNotReaped(stream_id.to_string()));
            }
            slot.unreaped = None;
        }

        if !entry.state().is_terminal() {
            self.stop_locked(&entry, &mut slot).await;
        }

        let (from, snapshot) = {
            let mut record = entry.record.write();
            let from = std::mem::replace(&mut record.state, StreamState::Starting);
            record.output_location = None;
            record.updated_at = Utc::now();
            (from, record.clone())
        };
        self.persist(&entry, &snapshot);
        tracing::info!("Restarting stream {} (was {})", stream_id, from);
        self.events.publish(
            stream_id,
            StreamEventKind::StateChanged {
                from,
                to: StreamState::Starting,
            },
        );

        self.spawn_start(entry, slot);
        Ok(snapshot)
    }

    pub async fn rename_stream(&self, stream_id: &str, display_name: String) -> Result<Stream> {
        let entry = self
            .entry(stream_id)
            .ok_or_else(|| LiveError::StreamNotFound(stream_id.to_string()))?;
        let _slot = entry.slot.lock().await;
        if entry.removed.load(Ordering::SeqCst) {
            return Err(LiveError::StreamNotFound(stream_id.to_string()));
        }

        let snapshot = {
            let mut record = entry.record.write();
            record.display_name = display_name;
            record.updated_at = Utc::now();
            record.clone()
        };
        self.persist(&entry, &snapshot);
        Ok(snapshot)
    }

    pub fn get_stream(&self, stream_id: &str) -> Result<Stream> {
        self.streams
            .get(stream_id)
            .map(|e| e.record.read().clone())
            .ok_or_else(|| LiveError::StreamNotFound(stream_id.to_string()))
    }

    /// All streams in creation order
    pub fn list_streams(&self) -> Vec<Stream> {
        let mut entries: Vec<(u64, Stream)> = self
            .streams
            .iter()
            .map(|e| (e.seq, e.record.read().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, stream)| stream).collect()
    }

    /// Whether a transcoder is registered for the stream right now
    #[cfg(test)]
    pub async fn has_live_process(&self, stream_id: &str) -> bool {
        match self.entry(stream_id) {
            Some(entry) => entry.slot.lock().await.live.is_some(),
            None => false,
        }
    }

    /// Number of processes ever spawned for the stream
    #[cfg(test)]
    pub async fn process_runs(&self, stream_id: &str) -> Option<u64> {
        let entry = self.entry(stream_id)?;
        let runs = entry.slot.lock().await.runs;
        Some(runs)
    }

    /// Stop every active stream concurrently. One stream failing to stop
    /// does not hold up the others.
    pub async fn shutdown_all(self: &Arc<Self>) -> ShutdownReport {
        let mut tasks = JoinSet::new();
        for stream in self.list_streams() {
            if stream.state.is_terminal() {
                continue;
            }
            let supervisor = Arc::clone(self);
            tasks.spawn(async move {
                let stopped = supervisor.stop_stream(&stream.id).await;
                (stream.id, stopped)
            });
        }

        let mut report = ShutdownReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, true)) => report.stopped.push(id),
                Ok((id, false)) => report.failed.push(id),
                Err(e) => tracing::error!("Stop task failed: {}", e),
            }
        }
        report.stopped.sort();
        report.failed.sort();

        tracing::info!(
            "Shutdown: {} stream(s) stopped, {} failed",
            report.stopped.len(),
            report.failed.len()
        );
        report
    }

    fn transition(&self, entry: &StreamEntry, next: StreamState) -> bool {
        self.transition_with(entry, next, |_| {})
    }

    /// Move the stream to `next` if that is a forward step, persist the
    /// record and publish the change.
    fn transition_with<F>(&self, entry: &StreamEntry, next: StreamState, update: F) -> bool
    where
        F: FnOnce(&mut Stream),
    {
        let (from, snapshot) = {
            let mut record = entry.record.write();
            if !record.state.can_transition_to(&next) {
                tracing::warn!(
                    "Stream {}: ignoring transition {} -> {}",
                    record.id,
                    record.state,
                    next
                );
                return false;
            }
            let from = std::mem::replace(&mut record.state, next.clone());
            update(&mut record);
            record.updated_at = Utc::now();
            (from, record.clone())
        };

        tracing::debug!("Stream {}: {} -> {}", snapshot.id, from, next);
        self.persist(entry, &snapshot);
        self.events
            .publish(&snapshot.id, StreamEventKind::StateChanged { from, to: next });
        true
    }

    /// Write-through after creation; failures are logged only
    fn persist(&self, entry: &StreamEntry, stream: &Stream) {
        if entry.removed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.collection.put(&stream.id, stream) {
            tracing::warn!("Failed to persist stream {}: {}", stream.id, e);
        }
    }
}
