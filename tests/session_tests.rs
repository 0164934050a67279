//! Recognition session state-machine tests with scripted collaborators.

mod common;

use avisense::config::SessionOptions;
use avisense::events::SessionEvent;
use avisense::session::RecognitionSession;
use avisense::storage::LocalDirStorage;
use common::{MockEngine, ScriptedSource, SilentSource, UnavailableSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const INPUT_LENGTH: usize = 16;

fn session_options() -> SessionOptions {
    SessionOptions {
        model_input_length: INPUT_LENGTH,
        confidence_threshold: 0.5,
        top_k: 1,
        warmup_runs: 0,
        ..Default::default()
    }
}

fn make_session(
    engine: Arc<MockEngine>,
    source: Box<dyn avisense::audio::AudioSource>,
) -> (RecognitionSession, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = Arc::new(LocalDirStorage::new(dir.path()).expect("storage"));
    let session =
        RecognitionSession::new(session_options(), engine, source, storage).expect("session");
    (session, dir)
}

/// Poll until `cond` holds or the timeout elapses.
async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

#[test_log::test(tokio::test)]
async fn stop_without_save_twice_deletes_temp_file_once() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let source = Box::new(ScriptedSource::new(vec![vec![100; 8]; 4]));
    let (session, _dir) = make_session(engine.clone(), source);

    session.start().await.expect("start");
    let temp = session.recording_path().expect("live temp file");
    assert!(temp.exists());
    wait_for(|| engine.acoustic_calls() >= 4).await;

    assert!(session.stop(false).await.is_none());
    assert!(!temp.exists());
    assert!(!session.is_active().await);

    // Second stop is a safe no-op; nothing is deleted twice.
    assert!(session.stop(false).await.is_none());
    assert!(!temp.exists());
}

#[test_log::test(tokio::test)]
async fn stop_before_start_is_a_safe_noop() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let source = Box::new(ScriptedSource::new(vec![]));
    let (session, _dir) = make_session(engine, source);

    assert!(session.stop(true).await.is_none());
    assert!(session.stop(false).await.is_none());
}

#[test_log::test(tokio::test)]
async fn start_is_idempotent() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let source = Box::new(SilentSource::new());
    let (session, _dir) = make_session(engine, source);

    session.start().await.expect("start");
    assert!(session.is_active().await);
    // Starting an active session changes nothing.
    session.start().await.expect("second start");
    assert!(session.is_active().await);

    assert!(session.stop(false).await.is_none());
    assert!(!session.is_active().await);
}

#[test_log::test(tokio::test)]
async fn saved_recording_contains_every_captured_block() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let blocks = vec![vec![10i16; 8], vec![20; 8], vec![30; 8]];
    let source = Box::new(ScriptedSource::new(blocks));
    let (session, dir) = make_session(engine.clone(), source);

    session.start().await.expect("start");
    wait_for(|| engine.acoustic_calls() >= 3).await;

    let stored = session.stop(true).await.expect("stored recording");
    assert!(stored.starts_with(dir.path()));

    let samples: Vec<i16> = hound::WavReader::open(&stored)
        .expect("open recording")
        .samples::<i16>()
        .map(|s| s.expect("sample"))
        .collect();
    let mut expected = vec![10i16; 8];
    expected.extend(vec![20i16; 8]);
    expected.extend(vec![30i16; 8]);
    assert_eq!(samples, expected);
}

#[test_log::test(tokio::test)]
async fn detections_are_published_in_order_and_finished_last() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0, -5.0]));
    let source = Box::new(ScriptedSource::new(vec![vec![100; 8]; 2]));
    let (session, _dir) = make_session(engine.clone(), source);

    let mut events = session.subscribe();
    session.start().await.expect("start");
    wait_for(|| engine.acoustic_calls() >= 2).await;
    let _ = session.stop(false).await;

    let mut detection_batches = 0;
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Detections(detections) => {
                assert!(!finished, "no events may follow Finished");
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].class_index, 0);
                assert!(detections[0].confidence >= 0.5);
                assert!(detections[0].chunk_index.is_none());
                detection_batches += 1;
            }
            SessionEvent::Finished => finished = true,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(detection_batches, 2);
    assert!(finished);
}

#[test_log::test(tokio::test)]
async fn stop_interrupts_an_idle_capture_stream() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let source = Box::new(SilentSource::new());
    let (session, _dir) = make_session(engine, source);

    session.start().await.expect("start");
    // The loop is parked waiting for a block that never comes; stop
    // must still return promptly via cancellation.
    let stopped = tokio::time::timeout(Duration::from_secs(2), session.stop(false))
        .await
        .expect("stop finished in time");
    assert!(stopped.is_none());
}

#[test_log::test(tokio::test)]
async fn device_failure_leaves_no_partial_session() {
    let engine = Arc::new(MockEngine::new(INPUT_LENGTH, vec![5.0]));
    let (session, dir) = make_session(engine, Box::new(UnavailableSource));

    assert!(session.start().await.is_err());
    assert!(!session.is_active().await);
    // The sink's temp file was cleaned up on the failed start.
    assert!(session.recording_path().is_none());
    let leftovers: Vec<PathBuf> = std::fs::read_dir(dir.path())
        .expect("read storage dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert!(leftovers.is_empty());
}
