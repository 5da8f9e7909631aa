//! Orchestrator integration: session lifecycle, error policy, calibration
//! scheduling, trigger-ordered teardown, and post-session file operations.

mod common;

use std::time::Duration;

use camrig::camera::driver::CameraSdk;
use camrig::errors::RigError;
use camrig::pipeline::PipelineEvent;
use camrig::trigger::TriggerController;
use camrig::types::{PreviewMode, RigState, Session, WriterState};

use common::{
    memory_factory, test_config, test_recorder, wait_until, MockSerialLink, SinkEventKind,
};

fn session(recorder: &camrig::pipeline::Recorder, id: &str) -> Session {
    recorder.defaults().session(id, None)
}

#[test]
fn test_record_session_drains_frames_to_all_writers() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, log, _sdk) = test_recorder(2, dir.path());

    recorder.start_record(session(&recorder, "sess01")).unwrap();
    assert!(recorder.is_recording());
    assert!(!recorder.is_viewing());
    assert_eq!(recorder.state(), RigState::Recording);

    // Both sinks must receive frames.
    assert!(wait_until(
        || {
            let log = log.lock().unwrap();
            let mut paths: Vec<_> = log
                .iter()
                .filter(|e| e.kind == SinkEventKind::Frame)
                .map(|e| e.path.clone())
                .collect();
            paths.sort();
            paths.dedup();
            paths.len() == 2
        },
        Duration::from_secs(5)
    ));

    recorder.stop().unwrap();
    assert_eq!(recorder.state(), RigState::Idle);
    assert!(!recorder.is_recording());

    for record in recorder.writer_records() {
        assert_eq!(record.state(), WriterState::Stopped);
        assert!(record.path.exists(), "output missing: {:?}", record.path);
    }
    // Timestamp sidecars land beside the videos.
    let sidecar = dir.path().join("sess01_cam0_timestamps.csv");
    let text = std::fs::read_to_string(sidecar).unwrap();
    assert!(text.lines().count() >= 2, "sidecar should have rows: {text}");
}

#[test]
fn test_single_session_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(2, dir.path());

    recorder.start_record(session(&recorder, "first")).unwrap();

    let again = session(&recorder, "second");
    assert!(matches!(
        recorder.start_record(again),
        Err(RigError::AlreadyActive)
    ));
    assert!(matches!(
        recorder.start_preview(PreviewMode::Multi, false),
        Err(RigError::AlreadyActive)
    ));
    assert!(matches!(
        recorder.start_calibration(
            session(&recorder, "third"),
            Duration::from_millis(10),
            Duration::from_millis(10)
        ),
        Err(RigError::AlreadyActive)
    ));
    // The rejected starts left the running session untouched.
    assert_eq!(recorder.state(), RigState::Recording);
    assert!(recorder.is_recording());

    recorder.stop().unwrap();

    // Previewing blocks starts the same way.
    recorder.start_preview(PreviewMode::Multi, false).unwrap();
    assert!(matches!(
        recorder.start_record(session(&recorder, "fourth")),
        Err(RigError::AlreadyActive)
    ));
    recorder.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent_from_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(1, dir.path());

    recorder.stop().unwrap();
    recorder.stop().unwrap();
    assert_eq!(recorder.state(), RigState::Idle);
}

#[test]
fn test_preview_modes_deliver_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(3, dir.path());

    recorder
        .start_preview(PreviewMode::Single { cam_index: 1 }, false)
        .unwrap();
    assert!(recorder.is_viewing());
    assert!(!recorder.is_recording());
    assert!(wait_until(
        || recorder.poll_preview(0).is_some(),
        Duration::from_secs(5)
    ));
    let frame = loop {
        if let Some(f) = recorder.poll_preview(0) {
            break f;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(frame.cam_index, 1);
    recorder.stop().unwrap();

    recorder.start_preview(PreviewMode::Multi, false).unwrap();
    let status = recorder.status();
    assert_eq!(status.preview_depths.len(), 3);
    assert!(wait_until(
        || (0..3).all(|slot| recorder.status().preview_depths[slot] > 0
            || recorder.poll_preview(slot).is_some()),
        Duration::from_secs(5)
    ));
    recorder.stop().unwrap();
}

#[test]
fn test_state_change_events_emitted() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(1, dir.path());
    let events = recorder.subscribe();

    recorder.start_preview(PreviewMode::Multi, false).unwrap();
    recorder.stop().unwrap();

    let seen: Vec<PipelineEvent> = events.try_iter().collect();
    assert!(seen.contains(&PipelineEvent::StateChanged(RigState::Previewing)));
    assert!(seen.contains(&PipelineEvent::StateChanged(RigState::Idle)));
}

#[test]
fn test_worker_failure_forces_stop_and_surfaces_pipeline_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, sdk) = test_recorder(2, dir.path());

    // First camera dies after a few frames; its sibling keeps producing.
    let serial = sdk.enumerate()[0].serial.clone();
    sdk.fail_after_frames(&serial, 3);

    recorder.start_record(session(&recorder, "doomed")).unwrap();

    let mut surfaced = None;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        match recorder.tick() {
            Ok(()) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                surfaced = Some(e);
                break;
            }
        }
    }

    let err = surfaced.expect("tick should surface the failure");
    assert!(matches!(err, RigError::Pipeline(_)));
    assert_eq!(recorder.state(), RigState::Idle);
    assert!(recorder.error_raised());
    // Writers were still closed gracefully on the way down.
    for record in recorder.writer_records() {
        assert_eq!(record.state(), WriterState::Stopped);
    }
    // A later tick from Idle stays quiet.
    recorder.tick().unwrap();
}

#[test]
fn test_rejected_encoder_config_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = camrig::camera::sim::SimSdk::with_cameras(1);
    let cams = common::connected_cams(&sdk);
    // Default ffmpeg factory validates codec names before spawning anything.
    let mut recorder = camrig::pipeline::Recorder::new(cams, test_config(dir.path()));

    let mut bad = recorder.defaults().session("bad", None);
    bad.codec = "definitely_not_a_codec".to_string();
    let err = recorder.start_record(bad).unwrap_err();
    assert!(matches!(err, RigError::EncoderInit(_)));
    assert_eq!(recorder.state(), RigState::Idle);
    assert!(!recorder.is_recording());

    // The rig is still usable afterwards.
    let (factory, _log) = memory_factory(None);
    let mut recorder = recorder.with_encoder_factory(factory);
    recorder.start_record(session(&recorder, "good")).unwrap();
    recorder.stop().unwrap();
}

#[test]
fn test_calibration_is_a_timed_record_window() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(1, dir.path());

    recorder
        .start_calibration(
            session(&recorder, "calib"),
            Duration::from_millis(100),
            Duration::from_millis(250),
        )
        .unwrap();
    assert_eq!(recorder.state(), RigState::Calibrating);
    assert!(!recorder.is_recording());

    // Recording begins once the wait elapses...
    assert!(wait_until(
        || {
            let _ = recorder.tick();
            recorder.is_recording()
        },
        Duration::from_secs(5)
    ));
    assert_eq!(recorder.state(), RigState::Calibrating);
    // Calibration always runs hardware-triggered.
    // (forced even though the session was built with hw_trigger=false)

    // ...and stops by itself after the duration.
    assert!(wait_until(
        || {
            let _ = recorder.tick();
            recorder.state() == RigState::Idle
        },
        Duration::from_secs(5)
    ));
    assert!(!recorder.is_recording());
    for record in recorder.writer_records() {
        assert_eq!(record.state(), WriterState::Stopped);
    }
}

#[test]
fn test_stop_waits_for_trigger_before_finalizing_writers() {
    let dir = tempfile::tempdir().unwrap();
    let sdk = camrig::camera::sim::SimSdk::with_cameras(2);
    let cams = common::connected_cams(&sdk);
    let config = test_config(dir.path());
    let (factory, log) = memory_factory(None);
    let mut recorder =
        camrig::pipeline::Recorder::new(cams, config.clone()).with_encoder_factory(factory);

    // Slow serial writes make the pulse stop observably non-instant.
    let (link, written) = MockSerialLink::new(Duration::from_millis(150));
    let mut trigger = TriggerController::new(config.trigger.clone());
    trigger.attach(Box::new(link));
    recorder.set_trigger(trigger);

    let mut sess = recorder.defaults().session("trig", None);
    sess.use_hw_trigger = true;
    recorder.start_record(sess).unwrap();

    // Fire the settle-delay timer that arms the trigger.
    assert!(wait_until(
        || {
            let _ = recorder.tick();
            recorder.trigger().map(|t| t.is_pulsing()).unwrap_or(false)
        },
        Duration::from_secs(5)
    ));

    recorder.stop().unwrap();
    assert!(!recorder.trigger().unwrap().is_pulsing());

    // The STOP command hit the wire strictly before any writer finalized.
    let stop_at = written
        .lock()
        .unwrap()
        .iter()
        .find(|(line, _)| line == "STOP")
        .map(|(_, at)| *at)
        .expect("trigger STOP was never sent");
    let log = log.lock().unwrap();
    let finishes: Vec<_> = log
        .iter()
        .filter(|e| e.kind == SinkEventKind::Finish)
        .collect();
    assert_eq!(finishes.len(), 2);
    for finish in finishes {
        assert!(
            finish.at > stop_at,
            "writer finalized before the trigger stopped pulsing"
        );
    }
}

#[test]
fn test_copy_files_guard_and_latch() {
    let dir = tempfile::tempdir().unwrap();
    let session_dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(2, dir.path());

    recorder.start_record(session(&recorder, "sess42")).unwrap();

    // Copying while recording is rejected and copies nothing.
    let err = recorder.copy_session_files(session_dir.path()).unwrap_err();
    assert!(matches!(err, RigError::Pipeline(_)));
    assert!(!session_dir.path().join("videos").exists());

    recorder.stop().unwrap();

    recorder.copy_session_files(session_dir.path()).unwrap();
    let video_dir = session_dir.path().join("videos");
    assert!(video_dir.join("sess42_cam0.mp4").exists());
    assert!(video_dir.join("sess42_cam1.mp4").exists());

    // Latched: a repeat copy succeeds without re-copying.
    std::fs::remove_dir_all(&video_dir).unwrap();
    recorder.copy_session_files(session_dir.path()).unwrap();
    assert!(!video_dir.exists());
}

#[test]
fn test_copy_files_legacy_tag_routes_to_session_root() {
    let dir = tempfile::tempdir().unwrap();
    let session_dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(1, dir.path());

    recorder
        .start_record(session(&recorder, "MusterMaus_07"))
        .unwrap();
    recorder.stop().unwrap();

    recorder.copy_session_files(session_dir.path()).unwrap();
    assert!(session_dir.path().join("MusterMaus_07_cam0.mp4").exists());
    assert!(!session_dir.path().join("videos").exists());
}

#[test]
fn test_purge_deletes_only_stopped_writers() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recorder, _log, _sdk) = test_recorder(2, dir.path());

    recorder.start_record(session(&recorder, "purgeme")).unwrap();

    // While recording, writers are not Stopped; nothing may be deleted.
    recorder.purge_files();
    recorder.stop().unwrap();
    for record in recorder.writer_records() {
        assert!(record.path.exists());
    }

    recorder.purge_files();
    for record in recorder.writer_records() {
        assert!(!record.path.exists(), "file survived purge: {:?}", record.path);
    }
}

#[test]
fn test_auto_routines_broadcast_in_enumeration_order() {
    let dir = tempfile::tempdir().unwrap();
    let (recorder, _log, _sdk) = test_recorder(3, dir.path());

    let exposures = recorder
        .run_auto_exposure(camrig::types::ControlScope::All)
        .unwrap();
    assert_eq!(
        exposures.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    let gains = recorder
        .run_auto_gain(camrig::types::ControlScope::One(1))
        .unwrap();
    assert_eq!(gains.len(), 1);
    assert_eq!(gains[0].0, 1);

    recorder
        .run_white_balance(camrig::types::ControlScope::All)
        .unwrap();
}
