#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::{GrayImage, RgbImage};
use parking_lot::Mutex;
use rusqlite::Connection;
use tempfile::TempDir;

use rollcall_backend::db;
use rollcall_backend::db::registry::StudentRegistry;
use rollcall_backend::models::student::Student;
use rollcall_backend::vision::{
    ClassifierTrainer, DisplaySurface, FaceClassifier, FaceDetector, FaceRect, FrameSource,
    VisionBackend, VisionError,
};

/// Temp dir + registry backed by a throwaway SQLite database.
pub fn setup_registry() -> (TempDir, Arc<StudentRegistry>) {
    let tmp = TempDir::new().unwrap();
    let conn: Connection = db::open_or_create(tmp.path().join("rollcall.db")).unwrap();
    let registry = StudentRegistry::new(
        Arc::new(Mutex::new(conn)),
        tmp.path().join("student_images"),
    )
    .unwrap();
    (tmp, Arc::new(registry))
}

/// A small decodable JPEG with some gradient texture.
pub fn test_jpeg() -> Vec<u8> {
    let mut img = RgbImage::new(64, 64);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = image::Rgb([(x * 4) as u8, (y * 4) as u8, 128]);
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

pub fn register(registry: &StudentRegistry, name: &str, department: &str) -> Student {
    registry.register(name, department, &test_jpeg(), "image/jpeg").unwrap()
}

pub fn face_rect() -> FaceRect {
    FaceRect { x: 8, y: 8, width: 32, height: 32 }
}

pub fn blank_frame() -> RgbImage {
    RgbImage::new(64, 64)
}

/// Scriptable stand-in for the vision capabilities: detections and
/// predictions can be queued per call (falling back to defaults), camera
/// frames are a finite queue, and camera open/close is observable.
pub struct ScriptedBackend {
    pub fail_detector: bool,
    pub fail_model: bool,
    pub fail_camera: bool,
    pub state: Arc<ScriptedState>,
}

#[derive(Default)]
pub struct ScriptedState {
    pub detections: Mutex<VecDeque<Vec<FaceRect>>>,
    pub default_detection: Mutex<Vec<FaceRect>>,
    pub predictions: Mutex<VecDeque<(i32, f64)>>,
    pub default_prediction: Mutex<(i32, f64)>,
    pub frames: Mutex<VecDeque<RgbImage>>,
    pub camera_open: AtomicBool,
    pub trained_labels: Mutex<Vec<i32>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_detector: false,
            fail_model: false,
            fail_camera: false,
            state: Arc::new(ScriptedState::default()),
        })
    }

    pub fn failing(detector: bool, model: bool, camera: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_detector: detector,
            fail_model: model,
            fail_camera: camera,
            state: Arc::new(ScriptedState::default()),
        })
    }

    pub fn set_default_detection(&self, faces: Vec<FaceRect>) {
        *self.state.default_detection.lock() = faces;
    }

    pub fn queue_detection(&self, faces: Vec<FaceRect>) {
        self.state.detections.lock().push_back(faces);
    }

    pub fn set_default_prediction(&self, label: i32, distance: f64) {
        *self.state.default_prediction.lock() = (label, distance);
    }

    pub fn queue_frames(&self, count: usize) {
        let mut frames = self.state.frames.lock();
        for _ in 0..count {
            frames.push_back(blank_frame());
        }
    }

    pub fn frames_pending(&self) -> usize {
        self.state.frames.lock().len()
    }
}

impl VisionBackend for ScriptedBackend {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, VisionError> {
        if self.fail_detector {
            return Err(VisionError::Detector("scripted detector failure".to_string()));
        }
        Ok(Box::new(ScriptedDetector(self.state.clone())))
    }

    fn load_classifier(&self, _model_path: &Path) -> Result<Box<dyn FaceClassifier>, VisionError> {
        if self.fail_model {
            return Err(VisionError::Model("scripted model load failure".to_string()));
        }
        Ok(Box::new(ScriptedClassifier(self.state.clone())))
    }

    fn trainer(&self) -> Result<Box<dyn ClassifierTrainer>, VisionError> {
        Ok(Box::new(ScriptedTrainer(self.state.clone())))
    }

    fn open_camera(&self, _index: u32) -> Result<Box<dyn FrameSource>, VisionError> {
        if self.fail_camera {
            return Err(VisionError::Camera("scripted camera failure".to_string()));
        }
        self.state.camera_open.store(true, Ordering::SeqCst);
        Ok(Box::new(ScriptedCamera(self.state.clone())))
    }

    fn open_display(&self, _title: &str) -> Option<Box<dyn DisplaySurface>> {
        None
    }
}

struct ScriptedDetector(Arc<ScriptedState>);

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<FaceRect>, VisionError> {
        let scripted = self.0.detections.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| self.0.default_detection.lock().clone()))
    }
}

struct ScriptedClassifier(Arc<ScriptedState>);

impl FaceClassifier for ScriptedClassifier {
    fn predict(&mut self, _face: &GrayImage) -> Result<(i32, f64), VisionError> {
        let scripted = self.0.predictions.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| *self.0.default_prediction.lock()))
    }
}

struct ScriptedTrainer(Arc<ScriptedState>);

impl ClassifierTrainer for ScriptedTrainer {
    fn train_and_save(
        &mut self,
        samples: &[GrayImage],
        labels: &[i32],
        model_path: &Path,
    ) -> Result<(), VisionError> {
        assert_eq!(samples.len(), labels.len());
        *self.0.trained_labels.lock() = labels.to_vec();
        std::fs::write(model_path, b"scripted-model").map_err(|e| VisionError::Model(e.to_string()))
    }
}

struct ScriptedCamera(Arc<ScriptedState>);

impl FrameSource for ScriptedCamera {
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError> {
        Ok(self.0.frames.lock().pop_front())
    }
}

impl Drop for ScriptedCamera {
    fn drop(&mut self) {
        self.0.camera_open.store(false, Ordering::SeqCst);
    }
}
