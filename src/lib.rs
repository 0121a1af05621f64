pub mod api;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod utils;
pub mod vision;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::db::registry::StudentRegistry;
use crate::error::Error;
use crate::ledger::AttendanceLedger;
use crate::models::labels::LabelMap;
use crate::pipeline::external::ExternalRecognizer;
use crate::pipeline::recognize::{RecognitionConfig, RecognitionController};
use crate::pipeline::train::Trainer;
use crate::utils::config::Config;
use crate::vision::VisionBackend;

/// Root assembly: every collaborator is constructed here and handed to the
/// others explicitly. The only process-wide mutable state is the lifecycle
/// controller's atomic flag.
pub struct AppState {
    pub started_at: std::time::Instant,
    pub config: Config,
    pub registry: Arc<StudentRegistry>,
    pub labels: Arc<LabelMap>,
    pub ledger: Arc<AttendanceLedger>,
    pub external: Arc<ExternalRecognizer>,
    pub trainer: Arc<Trainer>,
    pub recognition: Arc<RecognitionController>,
}

impl AppState {
    pub fn new(config: Config, conn: Connection, vision: Arc<dyn VisionBackend>) -> Result<Self, Error> {
        let conn = Arc::new(Mutex::new(conn));
        let registry = Arc::new(StudentRegistry::new(conn, config.images_dir.clone())?);
        let labels = Arc::new(LabelMap::new());
        let ledger = Arc::new(AttendanceLedger::new(config.ledger_path.clone()));
        let external =
            Arc::new(ExternalRecognizer::new(config.external_script.clone(), config.external_timeout));
        let trainer = Arc::new(Trainer::new(
            registry.clone(),
            vision.clone(),
            external.clone(),
            config.model_path(),
            config.labels_path(),
        ));
        let recognition = Arc::new(RecognitionController::new(
            vision,
            registry.clone(),
            labels.clone(),
            ledger.clone(),
            RecognitionConfig {
                camera_index: config.camera_index,
                confidence_threshold: config.confidence_threshold,
                model_candidates: config.model_candidates(),
                startup_wait: config.startup_wait,
                join_deadline: config.join_deadline,
            },
        ));
        Ok(Self {
            started_at: std::time::Instant::now(),
            config,
            registry,
            labels,
            ledger,
            external,
            trainer,
            recognition,
        })
    }
}
