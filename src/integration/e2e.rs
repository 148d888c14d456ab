//! End-to-end integration tests

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::util::ServiceExt;

use super::fixtures::*;
use crate::error::LiveError;
use crate::store::{DocumentStore, JsonFileStore, STREAMS};
use crate::supervisor::events::StreamEventKind;
use crate::supervisor::{output_location_for, StreamState};

#[tokio::test]
async fn test_stream_lifecycle() {
    let harness = Harness::new(WELL_BEHAVED);
    let supervisor = harness.supervisor();
    let mut events = supervisor.subscribe();

    let stream = supervisor
        .create_stream("rtsp://cam1/feed", Some("cam1".to_string()))
        .await
        .unwrap();
    assert_eq!(stream.state, StreamState::Starting);

    let running = wait_until_running(supervisor, &stream.id).await;
    assert_eq!(
        running.output_location,
        Some(output_location_for(&stream.id))
    );
    assert!(!running.output_location.unwrap().is_empty());

    let started = Instant::now();
    assert!(supervisor.stop_stream(&stream.id).await);
    assert!(started.elapsed() < supervisor.config().grace_period());
    assert_eq!(
        supervisor.get_stream(&stream.id).unwrap().state,
        StreamState::Stopped
    );

    let transitions: Vec<StreamState> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e.kind {
            StreamEventKind::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            StreamState::Running,
            StreamState::Stopping,
            StreamState::Stopped
        ]
    );
}

#[tokio::test]
async fn test_empty_source_is_rejected() {
    let harness = Harness::new(WELL_BEHAVED);

    let result = harness.supervisor().create_stream("", None).await;

    assert!(matches!(result, Err(LiveError::InvalidSource(_))));
    assert!(harness.supervisor().list_streams().is_empty());
    assert!(harness.store.list(STREAMS).unwrap().is_empty());
}

#[tokio::test]
async fn test_crash_is_detected_without_stop() {
    let harness = Harness::new(CRASHES_AFTER_START);
    let supervisor = harness.supervisor();
    let mut events = supervisor.subscribe();

    let stream = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    wait_until_running(supervisor, &stream.id).await;

    let failed =
        wait_for_state(supervisor, &stream.id, |s| matches!(s, StreamState::Failed { .. })).await;
    match &failed.state {
        StreamState::Failed { reason } => {
            assert!(reason.contains("exit code 1"), "{}", reason);
            assert!(reason.contains("Connection reset by peer"), "{}", reason);
        }
        other => panic!("unexpected state {}", other),
    }
    assert!(!supervisor.has_live_process(&stream.id).await);
    assert_eq!(supervisor.live_process_count(), 0);

    let crash = drain_events(&mut events)
        .into_iter()
        .find_map(|e| match e.kind {
            StreamEventKind::Crashed {
                exit_code,
                stderr_tail,
                ..
            } => Some((exit_code, stderr_tail)),
            _ => None,
        })
        .expect("no crash event");
    assert_eq!(crash.0, Some(1));
    assert_eq!(
        crash.1,
        vec!["Input #0, rtsp", "rtsp://cam1/feed: Connection reset by peer"]
    );

    // A stop after the crash is a no-op
    assert!(!supervisor.stop_stream(&stream.id).await);
    assert!(matches!(
        supervisor.get_stream(&stream.id).unwrap().state,
        StreamState::Failed { .. }
    ));
}

#[tokio::test]
async fn test_failed_stream_stays_failed_until_restart() {
    let harness = Harness::new(CRASHES_AFTER_START);
    let supervisor = harness.supervisor();

    let stream = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    wait_for_state(supervisor, &stream.id, |s| matches!(s, StreamState::Failed { .. })).await;

    // Nothing brings it back on its own
    assert!(!supervisor.start_process_for(&stream.id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        supervisor.get_stream(&stream.id).unwrap().state,
        StreamState::Failed { .. }
    ));

    supervisor.restart_stream(&stream.id).await.unwrap();
    wait_until_running(supervisor, &stream.id).await;
    assert_eq!(supervisor.process_runs(&stream.id).await, Some(2));
    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_transitions_are_monotonic() {
    let harness = Harness::new(WELL_BEHAVED);
    let supervisor = harness.supervisor();
    let mut events = supervisor.subscribe();

    let stream = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    supervisor.stop_stream(&stream.id).await;
    supervisor.stop_stream(&stream.id).await;
    supervisor.start_process_for(&stream.id).await.unwrap();
    supervisor.delete_stream(&stream.id, false).await.unwrap();

    let mut terminal_seen = false;
    for event in drain_events(&mut events) {
        match event.kind {
            StreamEventKind::StateChanged { from, to } => {
                assert!(!terminal_seen, "transition after terminal state");
                assert!(from.can_transition_to(&to), "{} -> {}", from, to);
                terminal_seen = to.is_terminal();
            }
            StreamEventKind::Deleted => assert!(terminal_seen),
            _ => {}
        }
    }
    assert!(terminal_seen);
}

#[tokio::test]
async fn test_racing_start_and_stop_never_doubles_processes() {
    let harness = Harness::new(WELL_BEHAVED);
    let supervisor = harness.supervisor();

    let mut ids = Vec::new();
    for n in 0..5 {
        let uri = format!("rtsp://cam{}/feed", n);
        ids.push(supervisor.create_stream(&uri, None).await.unwrap().id);
    }

    let mut tasks = Vec::new();
    for id in &ids {
        for round in 0..4 {
            let supervisor = Arc::clone(supervisor);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                if round % 2 == 0 {
                    supervisor.start_process_for(&id).await.unwrap();
                } else {
                    supervisor.stop_stream(&id).await;
                }
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }

    for id in &ids {
        assert!(supervisor.process_runs(id).await.unwrap() <= 1);
        assert_eq!(supervisor.get_stream(id).unwrap().state, StreamState::Stopped);
    }
    assert_eq!(supervisor.live_process_count(), 0);
}

#[tokio::test]
async fn test_delete_leaves_no_process_in_any_state() {
    let harness = Harness::new(WELL_BEHAVED);
    let supervisor = harness.supervisor();

    // Starting: delete right after create waits for the start, then stops
    let starting = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    supervisor.delete_stream(&starting.id, false).await.unwrap();

    let running = supervisor.create_stream("rtsp://cam2/feed", None).await.unwrap();
    wait_until_running(supervisor, &running.id).await;
    supervisor.delete_stream(&running.id, false).await.unwrap();

    let stopped = supervisor.create_stream("rtsp://cam3/feed", None).await.unwrap();
    supervisor.stop_stream(&stopped.id).await;
    supervisor.delete_stream(&stopped.id, false).await.unwrap();

    for id in [&starting.id, &running.id, &stopped.id] {
        assert!(!supervisor.has_live_process(id).await);
        assert!(matches!(
            supervisor.delete_stream(id, false).await,
            Err(LiveError::StreamNotFound(_))
        ));
    }
    assert_eq!(supervisor.live_process_count(), 0);
    assert!(supervisor.list_streams().is_empty());
}

#[tokio::test]
async fn test_delete_failed_stream() {
    let harness = Harness::new(CRASHES_AFTER_START);
    let supervisor = harness.supervisor();

    let stream = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    wait_for_state(supervisor, &stream.id, |s| matches!(s, StreamState::Failed { .. })).await;

    supervisor.delete_stream(&stream.id, true).await.unwrap();
    assert_eq!(supervisor.live_process_count(), 0);
    assert!(!supervisor.output_dir_for(&stream.id).exists());
}

#[tokio::test]
async fn test_shutdown_with_one_stubborn_stream() {
    let harness = Harness::new(STUBBORN_WHEN_MARKED);
    let supervisor = harness.supervisor();
    let mut events = supervisor.subscribe();

    let mut ids = Vec::new();
    for n in 0..4 {
        let uri = format!("rtsp://cam{}/feed", n);
        ids.push(supervisor.create_stream(&uri, None).await.unwrap().id);
    }
    let stubborn = supervisor
        .create_stream("rtsp://stubborn/feed", None)
        .await
        .unwrap()
        .id;
    for id in ids.iter().chain([&stubborn]) {
        wait_until_running(supervisor, id).await;
    }

    let report = supervisor.shutdown_all().await;

    for id in &ids {
        assert!(report.stopped.contains(id));
        assert_eq!(supervisor.get_stream(id).unwrap().state, StreamState::Stopped);
    }
    // killed after the grace period, which still counts as stopped
    assert!(report.stopped.contains(&stubborn));
    assert!(report.failed.is_empty());
    assert_eq!(supervisor.live_process_count(), 0);

    let escalated: Vec<String> = drain_events(&mut events)
        .into_iter()
        .filter(|e| e.kind == StreamEventKind::KillEscalated)
        .map(|e| e.stream_id)
        .collect();
    assert_eq!(escalated, vec![stubborn]);
}

fn kill_timeout_harness() -> Harness {
    Harness::with_transcoder(UNREAPED_WHEN_MARKED, |t| t.kill_timeout_secs = 1)
}

fn kill_timeout_state() -> StreamState {
    StreamState::Failed {
        reason: "kill-timeout".to_string(),
    }
}

#[tokio::test]
async fn test_unconfirmed_kill_fails_stream_and_holds_restart() {
    let harness = kill_timeout_harness();
    let supervisor = harness.supervisor();

    let stream = supervisor
        .create_stream("rtsp://stuck/feed", None)
        .await
        .unwrap();
    wait_until_running(supervisor, &stream.id).await;

    assert!(!supervisor.stop_stream(&stream.id).await);
    assert_eq!(
        supervisor.get_stream(&stream.id).unwrap().state,
        kill_timeout_state()
    );
    assert_eq!(supervisor.live_process_count(), 0);
    assert!(!supervisor.has_live_process(&stream.id).await);
    assert!(harness
        .state
        .metrics
        .export_prometheus()
        .contains("hls_live_failures_total{kind=\"kill_timeout\"} 1\n"));

    // the killed process has not been reaped yet
    let err = supervisor.restart_stream(&stream.id).await.unwrap_err();
    assert!(matches!(err, LiveError::ProcessNotReaped(_)));
    assert_eq!(
        supervisor.get_stream(&stream.id).unwrap().state,
        kill_timeout_state()
    );
    assert_eq!(supervisor.process_runs(&stream.id).await, Some(1));

    let deadline = Instant::now() + Duration::from_secs(10);
    let restarted = loop {
        match supervisor.restart_stream(&stream.id).await {
            Ok(stream) => break stream,
            Err(LiveError::ProcessNotReaped(_)) if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(e) => panic!("restart failed: {}", e),
        }
    };
    assert_eq!(restarted.state, StreamState::Starting);
    wait_until_running(supervisor, &stream.id).await;
    assert_eq!(supervisor.process_runs(&stream.id).await, Some(2));
    assert_eq!(supervisor.live_process_count(), 1);
}

#[tokio::test]
async fn test_shutdown_reports_unconfirmed_kill() {
    let harness = kill_timeout_harness();
    let supervisor = harness.supervisor();

    let mut ids = Vec::new();
    for n in 0..2 {
        let uri = format!("rtsp://cam{}/feed", n);
        ids.push(supervisor.create_stream(&uri, None).await.unwrap().id);
    }
    let stuck = supervisor
        .create_stream("rtsp://stuck/feed", None)
        .await
        .unwrap()
        .id;
    for id in ids.iter().chain([&stuck]) {
        wait_until_running(supervisor, id).await;
    }

    let report = supervisor.shutdown_all().await;

    assert_eq!(report.failed, vec![stuck.clone()]);
    ids.sort();
    assert_eq!(report.stopped, ids);
    for id in &ids {
        assert_eq!(supervisor.get_stream(id).unwrap().state, StreamState::Stopped);
    }
    assert_eq!(supervisor.get_stream(&stuck).unwrap().state, kill_timeout_state());
    assert_eq!(supervisor.live_process_count(), 0);
}

#[tokio::test]
async fn test_restart_is_recovered_as_interrupted() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let first = Harness::with_store(WELL_BEHAVED, store);

    let running = first
        .supervisor()
        .create_stream("rtsp://cam1/feed", None)
        .await
        .unwrap();
    wait_until_running(first.supervisor(), &running.id).await;
    let stopped = first
        .supervisor()
        .create_stream("rtsp://cam2/feed", None)
        .await
        .unwrap();
    first.supervisor().stop_stream(&stopped.id).await;

    // A second instance over the same directory, as after a crash
    let reopened: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let second = Harness::with_store(WELL_BEHAVED, reopened);
    let streams = second.supervisor().list_streams();

    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].id, running.id);
    assert_eq!(
        streams[0].state,
        StreamState::failed("interrupted by service restart")
    );
    assert_eq!(streams[1].state, StreamState::Stopped);
    assert_eq!(second.supervisor().live_process_count(), 0);

    first.supervisor().shutdown_all().await;
}

#[tokio::test]
async fn test_manifest_is_served() {
    let harness = Harness::new(WRITES_MANIFEST);
    let supervisor = harness.supervisor();

    let stream = supervisor.create_stream("rtsp://cam1/feed", None).await.unwrap();
    let running = wait_until_running(supervisor, &stream.id).await;
    let location = running.output_location.unwrap();

    let manifest = supervisor.output_dir_for(&stream.id).join("index.m3u8");
    for _ in 0..100 {
        if manifest.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let response = harness
        .router()
        .oneshot(Request::builder().uri(&location).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.starts_with(b"#EXTM3U"));

    supervisor.shutdown_all().await;
}

#[tokio::test]
async fn test_overlay_geometry_validation() {
    let harness = Harness::new(WELL_BEHAVED);
    let app = harness.router();

    let create = |x: i64| {
        Request::builder()
            .method(Method::POST)
            .uri("/streams/s1/overlays")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "kind": "text",
                    "content": "LIVE",
                    "geometry": {"x": x, "y": 0, "width": 10, "height": 10, "zIndex": 0}
                })
                .to_string(),
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(create(-1)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(create(0)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let overlay = json_body(response).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/streams/s1/overlays")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed = json_body(response).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["overlays"][0]["id"], overlay["id"]);
    assert_eq!(listed["overlays"][0]["geometry"]["x"], 0);
}

#[tokio::test]
async fn test_http_delete_with_cascade() {
    let harness = Harness::new(WELL_BEHAVED);
    let app = harness.router();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/streams")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"source_uri": "rtsp://cam1/feed", "display_name": "Lobby"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    let id = created["stream_id"].as_str().unwrap().to_string();
    assert_eq!(created["state"]["status"], "starting");
    assert_eq!(created["output_location"], output_location_for(&id));

    harness
        .state
        .overlays
        .create(
            &id,
            crate::overlay::OverlayKind::Image,
            "logo.png".to_string(),
            crate::overlay::Geometry {
                x: 8,
                y: 8,
                width: 64,
                height: 64,
                z_index: 2,
            },
        )
        .unwrap();
    wait_until_running(harness.supervisor(), &id).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/streams/{}?purge=true&cascade=true", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(harness.state.overlays.list_for_stream(&id).is_empty());
    assert!(!harness.supervisor().output_dir_for(&id).exists());
    assert_eq!(harness.supervisor().live_process_count(), 0);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/streams/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_over_loopback() {
    let harness = Harness::new(WELL_BEHAVED);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = harness.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let created: serde_json::Value = client
        .post(format!("{}/streams", base))
        .json(&json!({"source_uri": "rtmp://origin/live/key"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["stream_id"].as_str().unwrap().to_string();
    wait_until_running(harness.supervisor(), &id).await;

    let renamed: serde_json::Value = client
        .patch(format!("{}/streams/{}", base, id))
        .json(&json!({"display_name": "Studio"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(renamed["display_name"], "Studio");
    assert_eq!(renamed["state"]["status"], "running");

    let stop: serde_json::Value = client
        .post(format!("{}/streams/{}/stop", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stop["stopped"], true);

    let again: serde_json::Value = client
        .post(format!("{}/streams/{}/stop", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["stopped"], false);

    let listed: serde_json::Value = client
        .get(format!("{}/streams?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["streams"][0]["state"]["status"], "stopped");
}
