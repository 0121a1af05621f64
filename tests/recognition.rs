mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use calamine::{open_workbook, Data, Reader, Xlsx};
use common::{face_rect, register, setup_registry, ScriptedBackend};
use rollcall_backend::db::registry::StudentRegistry;
use rollcall_backend::error::Error;
use rollcall_backend::ledger::AttendanceLedger;
use rollcall_backend::models::labels::LabelMap;
use rollcall_backend::pipeline::recognize::{RecognitionConfig, RecognitionController};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    registry: Arc<StudentRegistry>,
    ledger: Arc<AttendanceLedger>,
    backend: Arc<ScriptedBackend>,
    controller: RecognitionController,
}

fn harness(with_model: bool, backend: Arc<ScriptedBackend>) -> Harness {
    let (tmp, registry) = setup_registry();
    let ledger = Arc::new(AttendanceLedger::new(tmp.path().join("attendance.xlsx")));
    let labels = Arc::new(LabelMap::new());
    let model_path = tmp.path().join("trained_model.yml");
    if with_model {
        std::fs::write(&model_path, b"scripted-model").unwrap();
    }
    let controller = RecognitionController::new(
        backend.clone(),
        registry.clone(),
        labels,
        ledger.clone(),
        RecognitionConfig {
            camera_index: 0,
            confidence_threshold: 80.0,
            model_candidates: vec![model_path],
            startup_wait: Duration::from_millis(500),
            join_deadline: Duration::from_secs(3),
        },
    );
    Harness { _tmp: tmp, registry, ledger, backend, controller }
}

fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..150 {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

fn rows_for(path: &std::path::Path, name: &str) -> usize {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    let range = workbook.worksheet_range("Attendance").unwrap();
    range
        .rows()
        .skip(1)
        .filter(|cells| matches!(cells.first(), Some(Data::String(s)) if s == name))
        .count()
}

#[test]
fn recognizes_and_marks_exactly_once() {
    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    backend.set_default_prediction(0, 42.0);
    backend.queue_frames(4);

    let h = harness(true, backend);
    let ada = register(&h.registry, "Ada", "CS");
    assert_eq!(ada.label_id, 0);

    h.controller.start().unwrap();
    assert!(h.controller.is_running());
    assert!(h.backend.state.camera_open.load(Ordering::SeqCst));

    assert!(wait_for(|| h.ledger.marked_today().unwrap().contains("Ada")));
    // Let the remaining queued frames drain; each would try to re-mark.
    assert!(wait_for(|| h.backend.frames_pending() == 0));

    h.controller.stop().unwrap();
    assert!(!h.controller.is_running());
    // Camera is released once stop returns.
    assert!(!h.backend.state.camera_open.load(Ordering::SeqCst));

    assert_eq!(rows_for(h.ledger.path(), "Ada"), 1);
}

#[test]
fn high_distance_is_reported_unknown() {
    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    backend.set_default_prediction(0, 92.0);
    backend.queue_frames(3);

    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");

    h.controller.start().unwrap();
    assert!(wait_for(|| h.backend.frames_pending() == 0));
    h.controller.stop().unwrap();

    assert!(h.ledger.marked_today().unwrap().is_empty());
    assert!(!h.ledger.path().exists());
}

#[test]
fn unmapped_label_is_reported_unknown() {
    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    // Confident prediction, but label 7 has no registered subject.
    backend.set_default_prediction(7, 40.0);
    backend.queue_frames(3);

    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");

    h.controller.start().unwrap();
    assert!(wait_for(|| h.backend.frames_pending() == 0));
    h.controller.stop().unwrap();

    assert!(h.ledger.marked_today().unwrap().is_empty());
}

#[test]
fn already_marked_subjects_are_not_rewritten() {
    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    backend.set_default_prediction(0, 30.0);
    backend.queue_frames(3);

    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");
    // Ada is already in today's ledger before the session starts.
    assert!(h.ledger.mark_attendance("Ada", "CS", "Present").unwrap());

    h.controller.start().unwrap();
    assert!(wait_for(|| h.backend.frames_pending() == 0));
    h.controller.stop().unwrap();

    assert_eq!(rows_for(h.ledger.path(), "Ada"), 1);
}

#[test]
fn start_without_model_fails() {
    let backend = ScriptedBackend::new();
    let h = harness(false, backend);

    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(_)), "unexpected error: {err:?}");
    assert!(!h.controller.status().running);
}

#[test]
fn camera_failure_surfaces_and_leaves_idle() {
    let backend = ScriptedBackend::failing(false, false, true);
    let h = harness(true, backend);

    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, Error::CameraUnavailable(_)), "unexpected error: {err:?}");
    assert!(!h.controller.is_running());
    // A failed start can be retried once the fault clears; here it cannot,
    // but the controller must not think a session exists.
    let err = h.controller.stop().unwrap_err();
    assert!(matches!(err, Error::NotRunning));
}

#[test]
fn model_load_failure_surfaces() {
    let backend = ScriptedBackend::failing(false, true, false);
    let h = harness(true, backend);

    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)), "unexpected error: {err:?}");
    assert!(!h.controller.is_running());
}

#[test]
fn second_start_is_rejected() {
    let backend = ScriptedBackend::new();
    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");

    h.controller.start().unwrap();
    let err = h.controller.start().unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning), "unexpected error: {err:?}");
    h.controller.stop().unwrap();
}

#[test]
fn stop_when_idle_is_not_running() {
    let backend = ScriptedBackend::new();
    let h = harness(true, backend);
    let err = h.controller.stop().unwrap_err();
    assert!(matches!(err, Error::NotRunning), "unexpected error: {err:?}");
}

#[test]
fn status_tracks_the_lifecycle() {
    let backend = ScriptedBackend::new();
    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");

    assert!(!h.controller.status().running);
    h.controller.start().unwrap();
    assert!(h.controller.status().running);
    h.controller.stop().unwrap();
    assert!(!h.controller.status().running);
}

#[test]
fn restart_after_stop_works() {
    let backend = ScriptedBackend::new();
    let h = harness(true, backend);
    register(&h.registry, "Ada", "CS");

    h.controller.start().unwrap();
    h.controller.stop().unwrap();
    h.controller.start().unwrap();
    assert!(h.controller.is_running());
    h.controller.stop().unwrap();
}
