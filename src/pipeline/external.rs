use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::models::student::Student;
use crate::utils::exec;

/// Runtimes probed, in order, when resolving the helper interpreter.
const COMMAND_CANDIDATES: &[&str] = &["python3", "python", "py"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRecord {
    id: i64,
    name: String,
    department: String,
    image_path: String,
    label_id: i32,
}

impl From<&Student> for SubjectRecord {
    fn from(s: &Student) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            department: s.department.clone(),
            // The helper expects forward slashes regardless of host.
            image_path: s.image_path.replace('\\', "/"),
            label_id: s.label_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTrainReport {
    pub success: bool,
    #[serde(default)]
    pub trained_count: usize,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedFace {
    pub label_id: i32,
    pub name: String,
    pub department: String,
    pub confidence: f64,
    /// `[top, right, bottom, left]` in image coordinates.
    pub location: [i64; 4],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOutcome {
    pub success: bool,
    #[serde(default)]
    pub faces: Vec<RecognizedFace>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Bridge to the optional out-of-process recognizer. Two verbs:
/// `train <subjectsJsonPath>` and `recognize <imagePath>`, both answering
/// with a single JSON document on stdout. The helper may also print warnings
/// there, so only lines opening a JSON value are parsed.
pub struct ExternalRecognizer {
    script: PathBuf,
    timeout: Duration,
    candidates: Vec<String>,
    resolved: Mutex<Option<Option<String>>>,
}

impl ExternalRecognizer {
    pub fn new(script: PathBuf, timeout: Duration) -> Self {
        Self::with_candidates(
            script,
            timeout,
            COMMAND_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        )
    }

    pub fn with_candidates(script: PathBuf, timeout: Duration, candidates: Vec<String>) -> Self {
        Self { script, timeout, candidates, resolved: Mutex::new(None) }
    }

    pub async fn available(&self) -> bool {
        self.runtime().await.is_some()
    }

    /// The interpreter command this adapter settled on, probing each
    /// candidate with `--version` once and caching the answer.
    pub async fn runtime(&self) -> Option<String> {
        let mut resolved = self.resolved.lock().await;
        if let Some(cached) = resolved.as_ref() {
            return cached.clone();
        }
        let mut found = None;
        for candidate in &self.candidates {
            match exec::exec_capture(candidate, &["--version"], self.timeout).await {
                Ok((0, _, _)) => {
                    info!("found external recognizer runtime: {candidate}");
                    found = Some(candidate.clone());
                    break;
                }
                Ok((code, _, _)) => debug!("{candidate} --version exited with {code}"),
                Err(e) => debug!("{candidate} not usable: {e}"),
            }
        }
        if found.is_none() {
            warn!("no external recognizer runtime found (tried {:?})", self.candidates);
        }
        *resolved = Some(found.clone());
        found
    }

    pub async fn train(&self, students: &[Student]) -> Result<ExternalTrainReport, Error> {
        let runtime = self.runtime().await.ok_or(Error::Unavailable)?;
        let subjects: Vec<SubjectRecord> = students.iter().map(SubjectRecord::from).collect();
        let file = tempfile::Builder::new()
            .prefix("students_")
            .suffix(".json")
            .tempfile()
            .map_err(|e| Error::Storage(e.to_string()))?;
        serde_json::to_writer_pretty(file.as_file(), &subjects)
            .map_err(|e| Error::Storage(format!("cannot serialize subjects: {e}")))?;
        let stdout = self.invoke(&runtime, "train", file.path()).await?;
        parse_payload(&stdout)
    }

    pub async fn recognize(&self, image_path: &Path) -> Result<RecognitionOutcome, Error> {
        let runtime = self.runtime().await.ok_or(Error::Unavailable)?;
        let stdout = self.invoke(&runtime, "recognize", image_path).await?;
        parse_payload(&stdout)
    }

    async fn invoke(&self, runtime: &str, verb: &str, arg: &Path) -> Result<String, Error> {
        let script = self.script.to_string_lossy().into_owned();
        let arg = arg.to_string_lossy().into_owned();
        let args = [script.as_str(), verb, arg.as_str()];
        let (code, stdout, stderr) = exec::exec_capture(runtime, &args, self.timeout)
            .await
            .map_err(|e| Error::External(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            debug!("helper stderr: {}", String::from_utf8_lossy(&stderr).trim_end());
        }
        if code != 0 {
            error!(
                "external recognizer {verb} exited with {code}: {}",
                String::from_utf8_lossy(&stderr).trim_end()
            );
            return Err(Error::External(format!("{verb} exited with status {code}")));
        }
        Ok(stdout)
    }
}

/// Keep only the lines that open a JSON value; the helper is allowed to emit
/// plain-text warnings around its answer.
fn json_payload(stdout: &str) -> Option<String> {
    let mut payload = String::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.starts_with('{') || line.starts_with('[') {
            payload.push_str(line);
        }
    }
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(stdout: &str) -> Result<T, Error> {
    let payload = json_payload(stdout)
        .ok_or_else(|| Error::External("helper produced no JSON output".to_string()))?;
    serde_json::from_str(&payload).map_err(|e| Error::External(format!("malformed helper output: {e}")))
}
