#[cfg(feature = "facial-recognition")]
pub mod opencv;

use std::path::Path;

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use thiserror::Error;

/// Classifier samples are normalized to this square size before training
/// and prediction.
pub const FACE_SAMPLE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("{0}")]
    Detector(String),
    #[error("{0}")]
    Model(String),
    #[error("{0}")]
    Camera(String),
    #[error("{0}")]
    Grab(String),
    #[error("{0}")]
    Image(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// What a session paints over a presented frame for one detected face.
pub struct FaceOverlay {
    pub rect: FaceRect,
    pub caption: String,
    pub accepted: bool,
}

pub trait FaceDetector: Send {
    /// Candidate face rectangles in a greyscale frame.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRect>, VisionError>;
}

pub trait FaceClassifier: Send {
    /// Predicted `(label, distance)` for a normalized face crop. Smaller
    /// distance means a better match.
    fn predict(&mut self, face: &GrayImage) -> Result<(i32, f64), VisionError>;
}

pub trait ClassifierTrainer: Send {
    fn train_and_save(
        &mut self,
        samples: &[GrayImage],
        labels: &[i32],
        model_path: &Path,
    ) -> Result<(), VisionError>;
}

pub trait FrameSource: Send {
    /// One frame, or `None` when the device produced nothing this round.
    /// Errors are fatal to the session. The device is released on drop.
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError>;
}

pub trait DisplaySurface: Send {
    fn present(&mut self, frame: &RgbImage, overlays: &[FaceOverlay]) -> Result<(), VisionError>;
}

/// Factory for the hardware and classifier capabilities a session needs.
/// The recognition and training pipelines only ever talk to these traits.
pub trait VisionBackend: Send + Sync {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, VisionError>;
    fn load_classifier(&self, model_path: &Path) -> Result<Box<dyn FaceClassifier>, VisionError>;
    fn trainer(&self) -> Result<Box<dyn ClassifierTrainer>, VisionError>;
    fn open_camera(&self, index: u32) -> Result<Box<dyn FrameSource>, VisionError>;
    /// `None` on headless hosts; the session then paces itself instead.
    fn open_display(&self, title: &str) -> Option<Box<dyn DisplaySurface>>;
}

/// Backend used when the crate is built without the `facial-recognition`
/// feature: registry and ledger endpoints stay functional, capture and
/// classification report themselves unavailable.
pub struct DisabledBackend;

const DISABLED: &str = "built without the facial-recognition feature";

impl VisionBackend for DisabledBackend {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, VisionError> {
        Err(VisionError::Detector(DISABLED.to_string()))
    }

    fn load_classifier(&self, _model_path: &Path) -> Result<Box<dyn FaceClassifier>, VisionError> {
        Err(VisionError::Model(DISABLED.to_string()))
    }

    fn trainer(&self) -> Result<Box<dyn ClassifierTrainer>, VisionError> {
        Err(VisionError::Detector(DISABLED.to_string()))
    }

    fn open_camera(&self, _index: u32) -> Result<Box<dyn FrameSource>, VisionError> {
        Err(VisionError::Camera(DISABLED.to_string()))
    }

    fn open_display(&self, _title: &str) -> Option<Box<dyn DisplaySurface>> {
        None
    }
}

pub fn to_grayscale(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

/// The face fed to the classifier when a frame contains several: biggest
/// area wins, first detection wins a tie.
pub fn largest_face(faces: &[FaceRect]) -> Option<FaceRect> {
    let mut best: Option<FaceRect> = None;
    for &face in faces {
        if best.map_or(true, |b| face.area() > b.area()) {
            best = Some(face);
        }
    }
    best
}

/// Crop a detected face out of the greyscale frame and normalize it to
/// `FACE_SAMPLE_SIZE` squared.
pub fn face_sample(frame: &GrayImage, rect: FaceRect) -> GrayImage {
    let crop = image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image();
    image::imageops::resize(&crop, FACE_SAMPLE_SIZE, FACE_SAMPLE_SIZE, FilterType::Triangle)
}
