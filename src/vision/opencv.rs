//! OpenCV-backed capabilities: Haar cascade detection, LBPH classification
//! and V4L capture through `videoio`, with an optional `highgui` preview
//! window. Requires a system OpenCV built with the contrib face module.

use std::path::{Path, PathBuf};

use image::{GrayImage, RgbImage};
use opencv::core::{self, Mat, Ptr, Rect, Scalar, Size, Vector};
use opencv::face::{FaceRecognizerTrait, FaceRecognizerTraitConst, LBPHFaceRecognizer};
use opencv::objdetect::{self, CascadeClassifier, CascadeClassifierTrait};
use opencv::prelude::*;
use opencv::{highgui, imgproc, videoio};
use tracing::{info, warn};

use super::{
    DisplaySurface, FaceClassifier, FaceDetector, FaceOverlay, FaceRect, FrameSource,
    ClassifierTrainer, VisionBackend, VisionError,
};

pub struct OpencvBackend {
    cascade_path: PathBuf,
}

impl OpencvBackend {
    pub fn new(cascade_path: PathBuf) -> Self {
        Self { cascade_path }
    }
}

impl VisionBackend for OpencvBackend {
    fn load_detector(&self) -> Result<Box<dyn FaceDetector>, VisionError> {
        if !self.cascade_path.is_file() {
            return Err(VisionError::Detector(format!(
                "cascade file not found at {}",
                self.cascade_path.display()
            )));
        }
        let cascade = CascadeClassifier::new(&self.cascade_path.to_string_lossy())
            .map_err(|e| VisionError::Detector(e.to_string()))?;
        if cascade.empty().map_err(|e| VisionError::Detector(e.to_string()))? {
            return Err(VisionError::Detector(format!(
                "could not load cascade from {}",
                self.cascade_path.display()
            )));
        }
        info!("face detector cascade loaded from {}", self.cascade_path.display());
        Ok(Box::new(CascadeDetector { cascade }))
    }

    fn load_classifier(&self, model_path: &Path) -> Result<Box<dyn FaceClassifier>, VisionError> {
        let mut model = LBPHFaceRecognizer::create_def().map_err(|e| VisionError::Model(e.to_string()))?;
        model
            .read(&model_path.to_string_lossy())
            .map_err(|e| VisionError::Model(format!("{}: {e}", model_path.display())))?;
        info!("classifier model loaded from {}", model_path.display());
        Ok(Box::new(LbphClassifier { model }))
    }

    fn trainer(&self) -> Result<Box<dyn ClassifierTrainer>, VisionError> {
        let model = LBPHFaceRecognizer::create_def().map_err(|e| VisionError::Model(e.to_string()))?;
        Ok(Box::new(LbphTrainer { model }))
    }

    fn open_camera(&self, index: u32) -> Result<Box<dyn FrameSource>, VisionError> {
        let capture = videoio::VideoCapture::new(index as i32, videoio::CAP_ANY)
            .map_err(|e| VisionError::Camera(e.to_string()))?;
        let opened = capture.is_opened().map_err(|e| VisionError::Camera(e.to_string()))?;
        if !opened {
            return Err(VisionError::Camera(format!(
                "device {index} could not be opened (missing, busy or permission denied)"
            )));
        }
        info!("camera device {index} opened");
        Ok(Box::new(CameraSource { capture }))
    }

    fn open_display(&self, title: &str) -> Option<Box<dyn DisplaySurface>> {
        match highgui::named_window(title, highgui::WINDOW_AUTOSIZE) {
            Ok(()) => Some(Box::new(HighguiDisplay { window: title.to_string() })),
            Err(e) => {
                warn!("no display surface available, running headless: {e}");
                None
            }
        }
    }
}

struct CascadeDetector {
    cascade: CascadeClassifier,
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRect>, VisionError> {
        let mat = gray_to_mat(frame)?;
        let mut faces = Vector::<Rect>::new();
        self.cascade
            .detect_multi_scale(
                &mat,
                &mut faces,
                1.1,
                3,
                objdetect::CASCADE_SCALE_IMAGE,
                Size::new(30, 30),
                Size::new(0, 0),
            )
            .map_err(|e| VisionError::Detector(e.to_string()))?;
        Ok(faces
            .iter()
            .map(|r| FaceRect {
                x: r.x.max(0) as u32,
                y: r.y.max(0) as u32,
                width: r.width.max(0) as u32,
                height: r.height.max(0) as u32,
            })
            .collect())
    }
}

struct LbphClassifier {
    model: Ptr<LBPHFaceRecognizer>,
}

impl FaceClassifier for LbphClassifier {
    fn predict(&mut self, face: &GrayImage) -> Result<(i32, f64), VisionError> {
        let mat = gray_to_mat(face)?;
        let mut label = -1i32;
        let mut distance = f64::MAX;
        self.model
            .predict(&mat, &mut label, &mut distance)
            .map_err(|e| VisionError::Model(e.to_string()))?;
        Ok((label, distance))
    }
}

struct LbphTrainer {
    model: Ptr<LBPHFaceRecognizer>,
}

impl ClassifierTrainer for LbphTrainer {
    fn train_and_save(
        &mut self,
        samples: &[GrayImage],
        labels: &[i32],
        model_path: &Path,
    ) -> Result<(), VisionError> {
        let mut images = Vector::<Mat>::new();
        for sample in samples {
            images.push(gray_to_mat(sample)?);
        }
        let label_mat = Mat::from_slice(labels)
            .and_then(|m| m.try_clone())
            .map_err(|e| VisionError::Model(e.to_string()))?;
        self.model
            .train(&images, &label_mat)
            .map_err(|e| VisionError::Model(e.to_string()))?;
        self.model
            .write(&model_path.to_string_lossy())
            .map_err(|e| VisionError::Model(format!("{}: {e}", model_path.display())))?;
        Ok(())
    }
}

struct CameraSource {
    capture: videoio::VideoCapture,
}

impl FrameSource for CameraSource {
    fn grab(&mut self) -> Result<Option<RgbImage>, VisionError> {
        let mut frame = Mat::default();
        let got = self.capture.read(&mut frame).map_err(|e| VisionError::Grab(e.to_string()))?;
        if !got || frame.empty() {
            return Ok(None);
        }
        bgr_to_rgb_image(&frame).map(Some)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("error releasing camera: {e}");
        }
    }
}

struct HighguiDisplay {
    window: String,
}

impl DisplaySurface for HighguiDisplay {
    fn present(&mut self, frame: &RgbImage, overlays: &[FaceOverlay]) -> Result<(), VisionError> {
        let mut mat = rgb_image_to_bgr(frame)?;
        for overlay in overlays {
            let rect = Rect::new(
                overlay.rect.x as i32,
                overlay.rect.y as i32,
                overlay.rect.width as i32,
                overlay.rect.height as i32,
            );
            let color = if overlay.accepted {
                Scalar::new(0.0, 255.0, 0.0, 0.0)
            } else {
                Scalar::new(0.0, 0.0, 255.0, 0.0)
            };
            imgproc::rectangle(&mut mat, rect, color, 2, imgproc::LINE_8, 0)
                .map_err(|e| VisionError::Image(e.to_string()))?;
            let origin = core::Point::new(rect.x, if rect.y > 10 { rect.y - 10 } else { rect.y });
            imgproc::put_text_def(
                &mut mat,
                &overlay.caption,
                origin,
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                color,
            )
            .map_err(|e| VisionError::Image(e.to_string()))?;
        }
        highgui::imshow(&self.window, &mat).map_err(|e| VisionError::Image(e.to_string()))?;
        let _ = highgui::wait_key(1).map_err(|e| VisionError::Image(e.to_string()))?;
        Ok(())
    }
}

impl Drop for HighguiDisplay {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.window);
    }
}

fn gray_to_mat(img: &GrayImage) -> Result<Mat, VisionError> {
    let (width, height) = img.dimensions();
    Mat::new_rows_cols_with_data(height as i32, width as i32, img.as_raw())
        .and_then(|m| m.try_clone())
        .map_err(|e| VisionError::Image(e.to_string()))
}

fn bgr_to_rgb_image(mat: &Mat) -> Result<RgbImage, VisionError> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb, imgproc::COLOR_BGR2RGB)
        .map_err(|e| VisionError::Image(e.to_string()))?;
    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let data = rgb.data_bytes().map_err(|e| VisionError::Image(e.to_string()))?.to_vec();
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| VisionError::Image("camera frame has unexpected layout".to_string()))
}

fn rgb_image_to_bgr(img: &RgbImage) -> Result<Mat, VisionError> {
    let (width, height) = img.dimensions();
    let rgb = Mat::new_rows_cols_with_data(height as i32, (width * 3) as i32, img.as_raw())
        .and_then(|m| m.try_clone())
        .and_then(|m| m.reshape(3, height as i32).and_then(|r| r.try_clone()))
        .map_err(|e| VisionError::Image(e.to_string()))?;
    let mut bgr = Mat::default();
    imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)
        .map_err(|e| VisionError::Image(e.to_string()))?;
    Ok(bgr)
}
