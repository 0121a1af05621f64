use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::registry::StudentRegistry;
use crate::error::Error;
use crate::models::student::Student;
use crate::pipeline::external::ExternalRecognizer;
use crate::vision::{self, VisionBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainMode {
    Auto,
    Native,
    External,
}

impl Default for TrainMode {
    fn default() -> Self {
        TrainMode::Auto
    }
}

#[derive(Debug, Serialize)]
pub struct TrainReport {
    pub trained: usize,
    pub implementation: String,
}

/// Builds a classifier over every registered student and publishes the model
/// artifact plus the `labelId=name` side file. Subjects are processed in
/// registry insertion order; one sample per subject, the largest detected
/// face in its reference image.
pub struct Trainer {
    registry: Arc<StudentRegistry>,
    vision: Arc<dyn VisionBackend>,
    external: Arc<ExternalRecognizer>,
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl Trainer {
    pub fn new(
        registry: Arc<StudentRegistry>,
        vision: Arc<dyn VisionBackend>,
        external: Arc<ExternalRecognizer>,
        model_path: PathBuf,
        labels_path: PathBuf,
    ) -> Self {
        Self { registry, vision, external, model_path, labels_path }
    }

    pub async fn train(&self, mode: TrainMode) -> Result<TrainReport, Error> {
        let students = self.registry.list()?;
        if students.is_empty() {
            return Err(Error::Precondition(
                "no students registered; register students before training".to_string(),
            ));
        }

        let use_external = match mode {
            TrainMode::External => {
                if !self.external.available().await {
                    return Err(Error::Unavailable);
                }
                true
            }
            TrainMode::Native => false,
            TrainMode::Auto => self.external.available().await,
        };

        if use_external {
            info!("training with the external recognizer ({} students)", students.len());
            let report = self.external.train(&students).await?;
            if !report.success {
                return Err(Error::Training(
                    report.message.unwrap_or_else(|| "external helper reported failure".to_string()),
                ));
            }
            Ok(TrainReport { trained: report.trained_count, implementation: "external".to_string() })
        } else {
            info!("training with the native classifier ({} students)", students.len());
            let vision = self.vision.clone();
            let model_path = self.model_path.clone();
            let labels_path = self.labels_path.clone();
            tokio::task::spawn_blocking(move || train_native(vision, students, model_path, labels_path))
                .await
                .map_err(|e| Error::Training(format!("training task failed: {e}")))?
        }
    }
}

fn train_native(
    vision: Arc<dyn VisionBackend>,
    students: Vec<Student>,
    model_path: PathBuf,
    labels_path: PathBuf,
) -> Result<TrainReport, Error> {
    let mut detector = vision.load_detector()?;

    let mut samples = Vec::new();
    let mut labels = Vec::new();
    for student in &students {
        let gray = match image::open(&student.image_path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("skipping {}: cannot read {}: {e}", student.name, student.image_path);
                continue;
            }
        };
        let faces = match detector.detect(&gray) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("skipping {}: detection failed: {e}", student.name);
                continue;
            }
        };
        let Some(rect) = vision::largest_face(&faces) else {
            warn!("skipping {}: no detectable face in reference image", student.name);
            continue;
        };
        samples.push(vision::face_sample(&gray, rect));
        labels.push(student.label_id);
        info!("prepared training sample for {} (label {})", student.name, student.label_id);
    }

    if samples.is_empty() {
        return Err(Error::Training("no usable faces across registered students".to_string()));
    }

    let mut trainer = vision.trainer()?;
    trainer.train_and_save(&samples, &labels, &model_path)?;
    write_label_names(&labels_path, &students)?;

    info!(
        "training complete: {} of {} students, model at {}",
        samples.len(),
        students.len(),
        model_path.display()
    );
    Ok(TrainReport { trained: samples.len(), implementation: "native".to_string() })
}

/// Line-oriented `labelId=name` mapping for legacy consumers of the model.
fn write_label_names(path: &PathBuf, students: &[Student]) -> Result<(), Error> {
    let mut out = String::new();
    for student in students {
        out.push_str(&format!("{}={}\n", student.label_id, student.name));
    }
    fs::write(path, out)?;
    Ok(())
}
