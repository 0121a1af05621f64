use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::recognize::DEFAULT_CONFIDENCE_THRESHOLD;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub images_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub model_file: PathBuf,
    pub labels_file: PathBuf,
    pub cascade_path: PathBuf,
    pub camera_index: u32,
    pub confidence_threshold: f64,
    pub external_script: PathBuf,
    pub external_timeout: Duration,
    pub startup_wait: Duration,
    pub join_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("ROLLCALL_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8085);
        let db_path = env::var("ROLLCALL_DB").unwrap_or_else(|_| "rollcall.db".to_string());
        let images_dir = env::var("ROLLCALL_IMAGES_DIR").unwrap_or_else(|_| "student_images".to_string());
        let ledger_path = env::var("ROLLCALL_LEDGER").unwrap_or_else(|_| "attendance.xlsx".to_string());
        let model_file = env::var("ROLLCALL_MODEL").unwrap_or_else(|_| "trained_model.yml".to_string());
        let labels_file = env::var("ROLLCALL_LABEL_NAMES").unwrap_or_else(|_| "label_names.txt".to_string());
        let cascade_path = env::var("ROLLCALL_CASCADE")
            .unwrap_or_else(|_| "haarcascade_frontalface_default.xml".to_string());
        let camera_index = env::var("ROLLCALL_CAMERA_INDEX").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
        let confidence_threshold = env::var("ROLLCALL_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        let external_script = env::var("ROLLCALL_EXTERNAL_SCRIPT")
            .unwrap_or_else(|_| "python/face_recognition_service.py".to_string());
        let external_timeout_secs = env::var("ROLLCALL_EXTERNAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120u64);
        let startup_wait_ms = env::var("ROLLCALL_STARTUP_WAIT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500u64);
        let join_deadline_secs = env::var("ROLLCALL_JOIN_DEADLINE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(3u64);
        Self {
            port,
            db_path: PathBuf::from(db_path),
            images_dir: PathBuf::from(images_dir),
            ledger_path: PathBuf::from(ledger_path),
            model_file: PathBuf::from(model_file),
            labels_file: PathBuf::from(labels_file),
            cascade_path: PathBuf::from(cascade_path),
            camera_index,
            confidence_threshold,
            external_script: PathBuf::from(external_script),
            external_timeout: Duration::from_secs(external_timeout_secs),
            startup_wait: Duration::from_millis(startup_wait_ms),
            join_deadline: Duration::from_secs(join_deadline_secs),
        }
    }

    /// Absolute location the trained model is published to.
    pub fn model_path(&self) -> PathBuf {
        Self::absolutize(&self.model_file)
    }

    /// Absolute location of the `labelId=name` side file.
    pub fn labels_path(&self) -> PathBuf {
        Self::absolutize(&self.labels_file)
    }

    /// Candidate locations probed, in order, when the recognition worker
    /// resolves the model artifact.
    pub fn model_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = vec![
            self.model_file.clone(),
            PathBuf::from(".").join(&self.model_file),
            PathBuf::from("..").join(&self.model_file),
        ];
        if let Ok(cwd) = env::current_dir() {
            candidates.push(cwd.join(&self.model_file));
            if let Some(parent) = cwd.parent() {
                candidates.push(parent.join(&self.model_file));
            }
        }
        candidates
    }

    fn absolutize(path: &PathBuf) -> PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.clone())
        }
    }
}
