use std::sync::Arc;
use std::time::UNIX_EPOCH;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::pipeline::train::TrainMode;
use crate::AppState;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn register_student(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Error> {
    let mut name = None;
    let mut department = None;
    let mut image: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(|e| Error::Validation(e.to_string()))?)
            }
            Some("department") => {
                department = Some(field.text().await.map_err(|e| Error::Validation(e.to_string()))?)
            }
            Some("image") => {
                let mime = field.content_type().unwrap_or("image/jpeg").to_string();
                let bytes = field.bytes().await.map_err(|e| Error::Validation(e.to_string()))?;
                image = Some((bytes.to_vec(), mime));
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| Error::Validation("student name is required".to_string()))?;
    let department =
        department.ok_or_else(|| Error::Validation("department is required".to_string()))?;
    let (image, mime) =
        image.ok_or_else(|| Error::Validation("student image is required".to_string()))?;

    let registry = state.registry.clone();
    let labels = state.labels.clone();
    let student = tokio::task::spawn_blocking(move || {
        let student = registry.register(&name, &department, &image, &mime)?;
        labels.refresh(&registry)?;
        Ok::<_, Error>(student)
    })
    .await
    .map_err(|e| Error::Storage(e.to_string()))??;

    Ok((StatusCode::CREATED, Json(student)))
}

pub async fn list_students(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, Error> {
    let registry = state.registry.clone();
    let students = tokio::task::spawn_blocking(move || registry.list())
        .await
        .map_err(|e| Error::Storage(e.to_string()))??;
    Ok(Json(students))
}

pub async fn get_student(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, Error> {
    let registry = state.registry.clone();
    let student = tokio::task::spawn_blocking(move || registry.find(id))
        .await
        .map_err(|e| Error::Storage(e.to_string()))??;
    Ok(Json(student))
}

pub async fn delete_student(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, Error> {
    let registry = state.registry.clone();
    let labels = state.labels.clone();
    tokio::task::spawn_blocking(move || {
        registry.delete(id)?;
        labels.refresh(&registry)?;
        Ok::<_, Error>(())
    })
    .await
    .map_err(|e| Error::Storage(e.to_string()))??;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TrainRequest {
    #[serde(default)]
    pub mode: Option<TrainMode>,
}

pub async fn train(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TrainRequest>>,
) -> Result<impl IntoResponse, Error> {
    let mode = body.and_then(|b| b.0.mode).unwrap_or_default();
    let report = state.trainer.train(mode).await?;
    Ok(Json(json!({
        "success": true,
        "trained": report.trained,
        "implementation": report.implementation,
    })))
}

pub async fn start_recognition(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, Error> {
    let controller = state.recognition.clone();
    tokio::task::spawn_blocking(move || controller.start())
        .await
        .map_err(|e| Error::Storage(e.to_string()))??;
    let status = state.recognition.status();
    Ok(Json(json!({
        "started": true,
        "running": status.running,
        "message": "face recognition started",
    })))
}

pub async fn stop_recognition(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, Error> {
    let controller = state.recognition.clone();
    tokio::task::spawn_blocking(move || controller.stop())
        .await
        .map_err(|e| Error::Storage(e.to_string()))??;
    Ok(Json(json!({
        "stopped": true,
        "running": state.recognition.is_running(),
    })))
}

pub async fn recognition_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.recognition.status())
}

pub async fn recognize_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Error> {
    let mut image: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("image") {
            let bytes = field.bytes().await.map_err(|e| Error::Validation(e.to_string()))?;
            image = Some(bytes.to_vec());
        }
    }
    let image = image.filter(|b| !b.is_empty());
    let image = image.ok_or_else(|| Error::Validation("image file is required".to_string()))?;

    let scratch = tempfile::Builder::new()
        .prefix("recognize_")
        .suffix(".jpg")
        .tempfile()
        .map_err(|e| Error::Storage(e.to_string()))?;
    tokio::fs::write(scratch.path(), &image).await.map_err(|e| Error::Storage(e.to_string()))?;

    let outcome = state.external.recognize(scratch.path()).await?;
    if !outcome.success {
        return Err(Error::External(
            outcome.message.unwrap_or_else(|| "recognition failed".to_string()),
        ));
    }
    Ok(Json(json!({
        "success": true,
        "implementation": "external",
        "faces": outcome.faces,
    })))
}

pub async fn attendance_file(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let path = state.ledger.path();
    let meta = std::fs::metadata(path).ok();
    let size = meta.as_ref().map(|m| m.len());
    let modified_ms = meta
        .as_ref()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64);
    Json(json!({
        "path": path.display().to_string(),
        "exists": meta.is_some(),
        "size": size,
        "modifiedMs": modified_ms,
    }))
}

pub async fn download_attendance(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, Error> {
    let path = state.ledger.path().to_path_buf();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound("no attendance has been recorded yet".to_string()))
        }
        Err(e) => return Err(Error::Storage(e.to_string())),
    };
    let headers = [
        (header::CONTENT_TYPE, XLSX_MIME),
        (header::CONTENT_DISPOSITION, "attachment; filename=\"attendance.xlsx\""),
    ];
    Ok((headers, bytes))
}

pub async fn external_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let runtime = state.external.runtime().await;
    Json(json!({
        "available": runtime.is_some(),
        "runtime": runtime,
        "message": if state.external.available().await {
            "external recognizer is ready"
        } else {
            "external recognizer is not available; using the native classifier"
        },
    }))
}
