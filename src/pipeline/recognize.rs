use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::registry::StudentRegistry;
use crate::error::Error;
use crate::ledger::AttendanceLedger;
use crate::models::labels::{LabelEntry, LabelMap};
use crate::vision::{self, FaceOverlay, VisionBackend};

/// Accept an identity only when the classifier distance is below this and
/// the label resolves in the session's label map. Smaller distance = better
/// match. Calibration knob, overridable through configuration.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 80.0;

const NULL_FRAME_BACKOFF: Duration = Duration::from_millis(100);
const HEADLESS_FRAME_PACING: Duration = Duration::from_millis(33);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct RecognitionConfig {
    pub camera_index: u32,
    pub confidence_threshold: f64,
    pub model_candidates: Vec<PathBuf>,
    pub startup_wait: Duration,
    pub join_deadline: Duration,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub message: String,
}

struct Session {
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Owns the single recognition worker. Start and stop serialize on one
/// mutex; status is a lock-free read of the worker's atomic flag. The worker
/// itself runs on a dedicated thread (the loop is blocking camera I/O) and
/// receives a cancellation flag rather than any reference back to the
/// controller.
pub struct RecognitionController {
    vision: Arc<dyn VisionBackend>,
    registry: Arc<StudentRegistry>,
    labels: Arc<LabelMap>,
    ledger: Arc<AttendanceLedger>,
    config: RecognitionConfig,
    running: Arc<AtomicBool>,
    lifecycle: Mutex<Option<Session>>,
}

impl RecognitionController {
    pub fn new(
        vision: Arc<dyn VisionBackend>,
        registry: Arc<StudentRegistry>,
        labels: Arc<LabelMap>,
        ledger: Arc<AttendanceLedger>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            vision,
            registry,
            labels,
            ledger,
            config,
            running: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(None),
        }
    }

    /// Launches the worker and waits a bounded window for it to publish
    /// `Running`. Initialization failures come back as their own kinds; a
    /// worker that is still initializing when the window closes is reported
    /// as `StartTimeout` and remains tracked for a later stop.
    pub fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock();

        if let Some(session) = lifecycle.as_mut() {
            if session.done_rx.try_recv().is_ok() {
                if let Some(handle) = session.handle.take() {
                    let _ = handle.join();
                }
                *lifecycle = None;
            } else {
                return Err(Error::AlreadyRunning);
            }
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let model_path = resolve_model_path(&self.config.model_candidates).ok_or_else(|| {
            let searched = self
                .config
                .model_candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Error::ModelNotFound(searched)
        })?;
        info!("classifier model found at {}", model_path.display());

        let stop = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), Error>>(1);
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let context = SessionContext {
            vision: self.vision.clone(),
            registry: self.registry.clone(),
            labels: self.labels.clone(),
            ledger: self.ledger.clone(),
            running: self.running.clone(),
            stop: stop.clone(),
            camera_index: self.config.camera_index,
            threshold: self.config.confidence_threshold,
            model_path,
        };
        let handle = thread::Builder::new()
            .name("recognition".to_string())
            .spawn(move || run_session(context, init_tx, done_tx))
            .map_err(|e| Error::Storage(format!("cannot spawn recognition worker: {e}")))?;

        match init_rx.recv_timeout(self.config.startup_wait) {
            Ok(Ok(())) => {
                *lifecycle = Some(Session { stop, done_rx, handle: Some(handle) });
                info!("recognition started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = done_rx.recv_timeout(self.config.join_deadline);
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                // The worker is still somewhere in its start sequence (a
                // slow camera open, usually). Keep it tracked so status and
                // stop stay truthful about whatever it becomes.
                warn!("recognition worker still initializing after {:?}", self.config.startup_wait);
                *lifecycle = Some(Session { stop, done_rx, handle: Some(handle) });
                Err(Error::StartTimeout(self.config.startup_wait))
            }
        }
    }

    /// Signals the worker, then blocks up to the join deadline. A worker
    /// that misses the deadline is considered leaked: the camera may stay
    /// held until the process exits.
    pub fn stop(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock();
        let Some(mut session) = lifecycle.take() else {
            return Err(Error::NotRunning);
        };

        session.stop.store(true, Ordering::SeqCst);
        match session.done_rx.recv_timeout(self.config.join_deadline) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = session.handle.take() {
                    let _ = handle.join();
                }
                info!("recognition stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "recognition worker did not stop within {:?}; the camera may be held until process exit",
                    self.config.join_deadline
                );
                self.running.store(false, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StatusReport {
        let running = self.is_running();
        StatusReport {
            running,
            message: if running {
                "face recognition is active".to_string()
            } else {
                "face recognition is inactive".to_string()
            },
        }
    }
}

fn resolve_model_path(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

struct SessionContext {
    vision: Arc<dyn VisionBackend>,
    registry: Arc<StudentRegistry>,
    labels: Arc<LabelMap>,
    ledger: Arc<AttendanceLedger>,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    camera_index: u32,
    threshold: f64,
    model_path: PathBuf,
}

struct SessionResources {
    detector: Box<dyn vision::FaceDetector>,
    classifier: Box<dyn vision::FaceClassifier>,
    camera: Box<dyn vision::FrameSource>,
    display: Option<Box<dyn vision::DisplaySurface>>,
    names: HashMap<i32, LabelEntry>,
    marked: HashSet<String>,
}

fn run_session(context: SessionContext, init_tx: SyncSender<Result<(), Error>>, done_tx: Sender<()>) {
    let resources = match init_session(&context) {
        Ok(resources) => {
            context.running.store(true, Ordering::SeqCst);
            let _ = init_tx.send(Ok(()));
            info!("recognition session started ({} known labels)", resources.names.len());
            resources
        }
        Err(e) => {
            error!("recognition startup failed: {e}");
            let _ = init_tx.send(Err(e));
            let _ = done_tx.send(());
            return;
        }
    };

    run_loop(&context, resources);

    context.running.store(false, Ordering::SeqCst);
    let _ = done_tx.send(());
}

fn init_session(context: &SessionContext) -> Result<SessionResources, Error> {
    let detector = context.vision.load_detector()?;
    let classifier = context.vision.load_classifier(&context.model_path)?;
    // Exclusive for the whole session; released when the resources drop at
    // loop exit, before the done signal.
    let camera = context.vision.open_camera(context.camera_index)?;
    context.labels.refresh(&context.registry)?;
    let names = context.labels.snapshot();
    let marked = context.ledger.marked_today()?;
    let display = context.vision.open_display("Rollcall");
    if display.is_none() {
        info!("running headless; attendance marks are visible in the log");
    }
    Ok(SessionResources { detector, classifier, camera, display, names, marked })
}

fn run_loop(context: &SessionContext, mut res: SessionResources) {
    let mut frames_since_heartbeat: u64 = 0;
    let mut last_heartbeat = Instant::now();

    while !context.stop.load(Ordering::SeqCst) {
        let frame = match res.camera.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("null frame from camera");
                thread::sleep(NULL_FRAME_BACKOFF);
                continue;
            }
            Err(e) => {
                error!("fatal camera error, ending session: {e}");
                break;
            }
        };

        frames_since_heartbeat += 1;
        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            info!(
                "processing frames ({frames_since_heartbeat} in the last {:.0?})",
                last_heartbeat.elapsed()
            );
            frames_since_heartbeat = 0;
            last_heartbeat = Instant::now();
        }

        let gray = vision::to_grayscale(&frame);
        let faces = match res.detector.detect(&gray) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("face detection failed on this frame: {e}");
                continue;
            }
        };

        let mut overlays = Vec::with_capacity(faces.len());
        for rect in faces {
            let sample = vision::face_sample(&gray, rect);
            let (label, distance) = match res.classifier.predict(&sample) {
                Ok(prediction) => prediction,
                Err(e) => {
                    warn!("prediction failed: {e}");
                    continue;
                }
            };
            debug!(
                "prediction: label={label} distance={distance:.2} threshold={:.2}",
                context.threshold
            );

            let identity =
                if distance < context.threshold { res.names.get(&label).cloned() } else { None };
            match identity {
                Some(entry) => {
                    info!(
                        "recognized {} ({}, distance {distance:.2})",
                        entry.name, entry.department
                    );
                    if !res.marked.contains(&entry.name) {
                        match context.ledger.mark_attendance(&entry.name, &entry.department, "Present") {
                            Ok(true) => info!(
                                "{} marked Present in {}",
                                entry.name,
                                context.ledger.path().display()
                            ),
                            Ok(false) => debug!("{} already marked today", entry.name),
                            Err(e) => warn!("attendance write failed for {}: {e}", entry.name),
                        }
                        // Inserted on the no-op and error outcomes too, so a
                        // face in view does not hammer the ledger every
                        // frame. The ledger stays authoritative.
                        res.marked.insert(entry.name.clone());
                    }
                    overlays.push(FaceOverlay {
                        rect,
                        caption: format!("{} ({distance:.1})", entry.name),
                        accepted: true,
                    });
                }
                None => {
                    if distance < context.threshold {
                        debug!("label {label} is not in the label map");
                    } else {
                        debug!("distance {distance:.2} is above the threshold");
                    }
                    overlays.push(FaceOverlay {
                        rect,
                        caption: format!("Unknown ({distance:.1})"),
                        accepted: false,
                    });
                }
            }
        }

        let mut display_lost = false;
        match res.display.as_mut() {
            Some(display) => {
                if let Err(e) = display.present(&frame, &overlays) {
                    warn!("display error, continuing headless: {e}");
                    display_lost = true;
                }
            }
            None => thread::sleep(HEADLESS_FRAME_PACING),
        }
        if display_lost {
            res.display = None;
        }
    }

    // Camera and display close here, before the done signal is observable.
    drop(res);
    info!("recognition loop ended");
}
