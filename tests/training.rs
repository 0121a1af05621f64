mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{face_rect, register, setup_registry, ScriptedBackend};
use rollcall_backend::error::Error;
use rollcall_backend::pipeline::external::ExternalRecognizer;
use rollcall_backend::pipeline::train::{TrainMode, Trainer};
use tempfile::TempDir;

/// An adapter whose runtime probe can never succeed.
fn unavailable_external() -> Arc<ExternalRecognizer> {
    Arc::new(ExternalRecognizer::with_candidates(
        PathBuf::from("helper.py"),
        Duration::from_secs(5),
        vec!["rollcall-no-such-interpreter".to_string()],
    ))
}

fn trainer_for(tmp: &TempDir, registry: Arc<rollcall_backend::db::registry::StudentRegistry>, backend: Arc<ScriptedBackend>) -> Trainer {
    Trainer::new(
        registry,
        backend,
        unavailable_external(),
        tmp.path().join("trained_model.yml"),
        tmp.path().join("label_names.txt"),
    )
}

#[tokio::test]
async fn training_requires_registered_students() {
    let (tmp, registry) = setup_registry();
    let trainer = trainer_for(&tmp, registry, ScriptedBackend::new());

    let err = trainer.train(TrainMode::Auto).await.unwrap_err();
    assert!(matches!(err, Error::Precondition(_)), "unexpected error: {err:?}");
    assert!(!tmp.path().join("trained_model.yml").exists());
}

#[tokio::test]
async fn native_training_covers_all_students() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");
    register(&registry, "Bo", "EE");

    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    let trainer = trainer_for(&tmp, registry, backend.clone());

    let report = trainer.train(TrainMode::Native).await.unwrap();
    assert_eq!(report.trained, 2);
    assert_eq!(report.implementation, "native");
    assert_eq!(*backend.state.trained_labels.lock(), vec![0, 1]);
    assert!(tmp.path().join("trained_model.yml").is_file());

    let names = std::fs::read_to_string(tmp.path().join("label_names.txt")).unwrap();
    assert_eq!(names, "0=Ada\n1=Bo\n");
}

#[tokio::test]
async fn students_without_detectable_faces_are_skipped() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");
    register(&registry, "Bo", "EE");

    let backend = ScriptedBackend::new();
    // Ada's image yields one face, Bo's none.
    backend.queue_detection(vec![face_rect()]);
    backend.queue_detection(vec![]);
    let trainer = trainer_for(&tmp, registry, backend.clone());

    let report = trainer.train(TrainMode::Native).await.unwrap();
    assert_eq!(report.trained, 1);
    assert_eq!(*backend.state.trained_labels.lock(), vec![0]);
}

#[tokio::test]
async fn training_fails_when_nothing_is_usable() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");

    let backend = ScriptedBackend::new(); // detector finds nothing by default
    let trainer = trainer_for(&tmp, registry, backend);

    let err = trainer.train(TrainMode::Native).await.unwrap_err();
    assert!(matches!(err, Error::Training(_)), "unexpected error: {err:?}");
    assert!(!tmp.path().join("trained_model.yml").exists());
}

#[tokio::test]
async fn auto_mode_falls_back_to_native() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");

    let backend = ScriptedBackend::new();
    backend.set_default_detection(vec![face_rect()]);
    let trainer = trainer_for(&tmp, registry, backend);

    let report = trainer.train(TrainMode::Auto).await.unwrap();
    assert_eq!(report.implementation, "native");
    assert_eq!(report.trained, 1);
}

#[tokio::test]
async fn external_mode_requires_the_helper() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");
    let trainer = trainer_for(&tmp, registry, ScriptedBackend::new());

    let err = trainer.train(TrainMode::External).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable), "unexpected error: {err:?}");
}

#[tokio::test]
async fn detector_failure_surfaces_as_its_kind() {
    let (tmp, registry) = setup_registry();
    register(&registry, "Ada", "CS");
    let backend = ScriptedBackend::failing(true, false, false);
    let trainer = trainer_for(&tmp, registry, backend);

    let err = trainer.train(TrainMode::Native).await.unwrap_err();
    assert!(matches!(err, Error::DetectorUnavailable(_)), "unexpected error: {err:?}");
}
