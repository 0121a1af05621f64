use std::time::Duration;

use thiserror::Error;

use crate::vision::VisionError;

/// Tagged failure kinds returned by every core operation. The HTTP layer maps
/// these to status codes; nothing below `api` knows about transports.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("attendance ledger is corrupt: {0}")]
    Corruption(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("face detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("classifier model not found (searched {0})")]
    ModelNotFound(String),
    #[error("failed to load classifier model: {0}")]
    ModelLoad(String),
    #[error("recognition is already running")]
    AlreadyRunning,
    #[error("recognition is not running")]
    NotRunning,
    #[error("recognition worker did not finish initializing within {0:?}")]
    StartTimeout(Duration),
    #[error("training failed: {0}")]
    Training(String),
    #[error("external recognizer error: {0}")]
    External(String),
    #[error("external recognizer is not available")]
    Unavailable,
}

impl Error {
    /// Stable machine-readable name for the kind, used in response bodies
    /// and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Precondition(_) => "precondition",
            Error::Storage(_) => "storage",
            Error::Corruption(_) => "corruption",
            Error::CameraUnavailable(_) => "camera_unavailable",
            Error::DetectorUnavailable(_) => "detector_unavailable",
            Error::ModelNotFound(_) => "model_not_found",
            Error::ModelLoad(_) => "model_load",
            Error::AlreadyRunning => "already_running",
            Error::NotRunning => "not_running",
            Error::StartTimeout(_) => "start_timeout",
            Error::Training(_) => "training",
            Error::External(_) => "external",
            Error::Unavailable => "unavailable",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<VisionError> for Error {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::Detector(msg) => Error::DetectorUnavailable(msg),
            VisionError::Model(msg) => Error::ModelLoad(msg),
            VisionError::Camera(msg) | VisionError::Grab(msg) => Error::CameraUnavailable(msg),
            VisionError::Image(msg) => Error::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(Error::Validation("x".to_string()).kind(), "validation");
        assert_eq!(Error::AlreadyRunning.kind(), "already_running");
        assert_eq!(Error::ModelNotFound("a, b".to_string()).kind(), "model_not_found");
        assert_eq!(Error::StartTimeout(Duration::from_millis(500)).kind(), "start_timeout");
    }

    #[test]
    fn test_vision_errors_map_to_their_kinds() {
        let e: Error = VisionError::Camera("device 0 is busy".to_string()).into();
        assert!(matches!(e, Error::CameraUnavailable(_)));
        let e: Error = VisionError::Detector("cascade missing".to_string()).into();
        assert!(matches!(e, Error::DetectorUnavailable(_)));
        let e: Error = VisionError::Model("bad yml".to_string()).into();
        assert!(matches!(e, Error::ModelLoad(_)));
    }

    #[test]
    fn test_io_errors_become_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: Error = io.into();
        assert!(matches!(e, Error::Storage(_)));
    }
}
