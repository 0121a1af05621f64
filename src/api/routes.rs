use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::handlers;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/students", get(handlers::list_students).post(handlers::register_student))
        .route("/students/:id", get(handlers::get_student).delete(handlers::delete_student))
        .route("/train", post(handlers::train))
        .route("/recognition/start", post(handlers::start_recognition))
        .route("/recognition/stop", post(handlers::stop_recognition))
        .route("/recognition/status", get(handlers::recognition_status))
        .route("/recognize", post(handlers::recognize_image))
        .route("/attendance", get(handlers::attendance_file))
        .route("/attendance/download", get(handlers::download_attendance))
        .route("/external/status", get(handlers::external_status))
        // Reference images can be a few megabytes.
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}
