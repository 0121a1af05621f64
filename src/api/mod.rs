pub mod handlers;
pub mod routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use crate::error::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) | Error::AlreadyRunning | Error::NotRunning => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Precondition(_) => StatusCode::PRECONDITION_FAILED,
            Error::Unavailable
            | Error::CameraUnavailable(_)
            | Error::DetectorUnavailable(_)
            | Error::ModelNotFound(_)
            | Error::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::StartTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Storage(_) | Error::Corruption(_) | Error::Training(_) | Error::External(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("request failed ({}): {self}", self.kind());
        } else {
            debug!("request rejected ({}): {self}", self.kind());
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
