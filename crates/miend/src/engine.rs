//! Engine actor: owns the camera, the ONNX provider, and the recognition
//! session on a dedicated OS thread.
//!
//! Requests arrive over an mpsc channel with oneshot replies; session
//! transitions go out on a broadcast channel. The tick loop is strictly
//! serialized — capture, detection, matching, and the state update all
//! complete before the next tick is considered — and the countdown timer
//! replaces polling entirely while a match is being verified.

use crate::config::Config;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::GrayImage;
use mien_core::{
    DetectedFace, Embedding, EmbeddingProvider, EuclideanMatcher, MatchOutcome, Matcher,
    Observation, OnnxFacePipeline, Phase, ProviderError, Session, SessionConfig, Transition,
};
use mien_hw::{Camera, CameraError, Frame};
use mien_store::{ProfileStore, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Broadcast buffer: recognition produces at most one transition burst per
/// second, so a small backlog only matters to very slow subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera unavailable: {0}")]
    MediaAccessDenied(String),
    #[error("camera error: {0}")]
    Camera(CameraError),
    #[error("face detection unavailable: {0}")]
    DetectionUnavailable(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no enrolled profiles")]
    NoProfiles,
    #[error("recognition already running")]
    AlreadyRunning,
    #[error("recognition holds the camera — stop it before a live capture")]
    CameraInUse,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("provider: {0}")]
    Provider(ProviderError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<CameraError> for EngineError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::AccessDenied(_)
            | CameraError::DeviceBusy
            | CameraError::DeviceNotFound(_) => EngineError::MediaAccessDenied(e.to_string()),
            other => EngineError::Camera(other),
        }
    }
}

/// Daemon status snapshot, rendered to JSON for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: Phase,
    pub profiles: usize,
    pub camera_active: bool,
}

enum EngineRequest {
    StartRecognition {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StopRecognition {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CancelCountdown {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    EnrollPhotos {
        name: String,
        photos: Vec<PathBuf>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    EnrollLive {
        name: String,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    events: broadcast::Sender<Transition>,
}

impl EngineHandle {
    /// Subscribe to session transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    /// Acquire the camera and start the recognition loop.
    pub async fn start_recognition(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartRecognition { reply })
            .await?
    }

    /// Stop recognition, cancelling any countdown and releasing the camera.
    pub async fn stop_recognition(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StopRecognition { reply })
            .await?
    }

    /// Cancel a running countdown and resume scanning. No-op when no
    /// countdown is active.
    pub async fn cancel_countdown(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::CancelCountdown { reply })
            .await?
    }

    /// Enroll a profile from photo files. Returns the number of embeddings
    /// stored.
    pub async fn enroll_photos(
        &self,
        name: String,
        photos: Vec<PathBuf>,
    ) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::EnrollPhotos {
            name,
            photos,
            reply,
        })
        .await?
    }

    /// Enroll a profile from a live camera capture.
    pub async fn enroll_live(&self, name: String) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::EnrollLive { name, reply })
            .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously (fail-fast); the camera is only
/// acquired when recognition or a live capture needs it, and released on
/// every exit path.
pub fn spawn_engine(
    config: &Config,
    store: Arc<Mutex<ProfileStore>>,
) -> Result<EngineHandle, EngineError> {
    let provider = OnnxFacePipeline::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )
    .map_err(EngineError::Provider)?;
    tracing::info!(model_dir = %config.model_dir.display(), "face pipeline loaded");

    let (tx, rx) = mpsc::channel::<EngineRequest>(4);
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let worker = Worker {
        camera_device: config.camera_device.clone(),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        match_threshold: config.match_threshold,
        frames_per_enroll: config.frames_per_enroll,
        session: Session::new(SessionConfig {
            confirm_streak: config.confirm_streak,
            countdown_secs: config.countdown_secs,
        }),
        provider: Box::new(provider),
        matcher: EuclideanMatcher,
        camera: None,
        store,
        events: events.clone(),
        rx,
    };

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            worker.run();
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx, events })
}

struct Worker {
    camera_device: String,
    poll_interval: Duration,
    match_threshold: f32,
    frames_per_enroll: usize,
    session: Session,
    provider: Box<dyn EmbeddingProvider>,
    matcher: EuclideanMatcher,
    /// Held only while recognition is active.
    camera: Option<Camera>,
    store: Arc<Mutex<ProfileStore>>,
    events: broadcast::Sender<Transition>,
    rx: mpsc::Receiver<EngineRequest>,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.session.is_counting_down() {
                // Countdown replaces polling: only the 1 s timer advances.
                std::thread::sleep(Duration::from_secs(1));
                if self.drain_requests() {
                    return;
                }
                if !self.session.is_counting_down() {
                    continue; // cancelled by a command while we slept
                }
                let transitions = self.session.tick_countdown();
                self.publish(&transitions);
                if self.session.phase() == Phase::Confirmed {
                    // Terminal: tear down polling and release the camera.
                    self.camera = None;
                }
            } else if self.session.is_polling() {
                if self.drain_requests() {
                    return;
                }
                if !self.session.is_polling() {
                    continue;
                }
                let started = Instant::now();
                self.recognition_tick();
                if let Some(rest) = self.poll_interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            } else {
                // Idle or Confirmed: nothing to drive, wait for a command.
                match self.rx.blocking_recv() {
                    Some(req) => self.handle(req),
                    None => return,
                }
            }
        }
    }

    /// Handle queued requests without blocking. Returns true when all
    /// handles are gone and the thread should exit.
    fn drain_requests(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(req) => self.handle(req),
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::StartRecognition { reply } => {
                let _ = reply.send(self.handle_start());
            }
            EngineRequest::StopRecognition { reply } => {
                self.handle_stop();
                let _ = reply.send(Ok(()));
            }
            EngineRequest::CancelCountdown { reply } => {
                if let Some(cancelled) = self.session.cancel_countdown() {
                    self.publish(std::slice::from_ref(&cancelled));
                }
                let _ = reply.send(Ok(()));
            }
            EngineRequest::EnrollPhotos {
                name,
                photos,
                reply,
            } => {
                let _ = reply.send(self.handle_enroll_photos(&name, &photos));
            }
            EngineRequest::EnrollLive { name, reply } => {
                let _ = reply.send(self.handle_enroll_live(&name));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(EngineStatus {
                    phase: self.session.phase(),
                    profiles: self.store_lock().len(),
                    camera_active: self.camera.is_some(),
                });
            }
        }
    }

    fn handle_start(&mut self) -> Result<(), EngineError> {
        if self.session.is_polling() || self.session.is_counting_down() {
            return Err(EngineError::AlreadyRunning);
        }
        if self.store_lock().is_empty() {
            return Err(EngineError::NoProfiles);
        }

        let camera = Camera::open(&self.camera_device)?;
        tracing::info!(device = %camera.device_path, "recognition camera acquired");
        self.camera = Some(camera);

        let started = self.session.begin();
        self.publish(std::slice::from_ref(&started));
        Ok(())
    }

    fn handle_stop(&mut self) {
        let transitions = self.session.halt();
        self.publish(&transitions);
        if self.camera.take().is_some() {
            tracing::info!("recognition camera released");
        }
    }

    /// One recognition tick: capture → detect → match → state update.
    fn recognition_tick(&mut self) {
        let frame = match self.camera.as_ref() {
            Some(camera) => match camera.capture_frame() {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::warn!(error = %e, "capture failed, treating as no face");
                    None
                }
            },
            None => None,
        };

        let observation = match frame {
            Some(frame) => self.evaluate_frame(&frame),
            None => Observation::NoFace,
        };

        let transitions = self.session.observe(observation);
        self.publish(&transitions);
    }

    /// Detect every face in the frame, match each against the gallery, and
    /// keep the smallest-distance outcome. Provider failures are absorbed
    /// as "no face" so one bad frame only resets tentative progress.
    fn evaluate_frame(&mut self, frame: &Frame) -> Observation {
        let faces = match self.provider.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "detection failed, treating as no face");
                return Observation::NoFace;
            }
        };
        if faces.is_empty() {
            return Observation::NoFace;
        }

        let store = self.store_lock();
        let profiles = store.profiles();

        let mut best: Option<MatchOutcome> = None;
        for face in &faces {
            let outcome = self
                .matcher
                .best_match(&face.embedding, profiles, self.match_threshold);
            let better = match (&best, outcome.distance()) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(prev), Some(d)) => prev.distance().map(|p| d < p).unwrap_or(true),
            };
            if better {
                best = Some(outcome);
            }
        }

        match best {
            Some(MatchOutcome::Match { label, distance }) => {
                Observation::Match { label, distance }
            }
            Some(MatchOutcome::Unknown { distance }) => Observation::Unknown { distance },
            _ => {
                tracing::warn!("gallery empty during recognition");
                Observation::NoFace
            }
        }
    }

    fn handle_enroll_photos(
        &mut self,
        name: &str,
        photos: &[PathBuf],
    ) -> Result<usize, EngineError> {
        if self.store_lock().contains(name) {
            return Err(StoreError::DuplicateName(name.to_string()).into());
        }

        let mut embeddings: Vec<Embedding> = Vec::new();
        let mut thumbnail: Option<String> = None;

        for path in photos {
            let img = image::open(path)?.to_luma8();
            let (width, height) = img.dimensions();
            let faces = self
                .provider
                .detect(img.as_raw(), width, height)
                .map_err(|e| EngineError::DetectionUnavailable(e.to_string()))?;

            if faces.is_empty() {
                tracing::debug!(path = %path.display(), "no face in photo");
                continue;
            }

            if thumbnail.is_none() {
                thumbnail = photo_data_url(path).ok();
            }
            embeddings.extend(faces.into_iter().map(|f| f.embedding));
        }

        if embeddings.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }

        let count = embeddings.len();
        self.store_lock().create(name, embeddings, thumbnail)?;
        tracing::info!(name, count, "profile enrolled from photos");
        Ok(count)
    }

    /// Capture a burst, keep the highest-confidence face, store one
    /// embedding plus a PNG thumbnail of the winning frame.
    fn handle_enroll_live(&mut self, name: &str) -> Result<usize, EngineError> {
        if self.camera.is_some() {
            // Recognition and live capture never share the device.
            return Err(EngineError::CameraInUse);
        }
        if self.store_lock().contains(name) {
            return Err(StoreError::DuplicateName(name.to_string()).into());
        }

        // Camera is scoped to this call; dropping it releases the device
        // on success and on every error path alike.
        let camera = Camera::open(&self.camera_device)?;
        let frames = camera.capture_frames(self.frames_per_enroll)?;
        drop(camera);

        let mut best: Option<(usize, DetectedFace)> = None;
        for (i, frame) in frames.iter().enumerate() {
            let faces = self
                .provider
                .detect(&frame.data, frame.width, frame.height)
                .map_err(|e| EngineError::DetectionUnavailable(e.to_string()))?;
            for face in faces {
                let better = best
                    .as_ref()
                    .map(|(_, b)| face.bbox.confidence > b.bbox.confidence)
                    .unwrap_or(true);
                if better {
                    best = Some((i, face));
                }
            }
        }

        let Some((frame_idx, face)) = best else {
            return Err(EngineError::NoFaceDetected);
        };
        tracing::info!(
            name,
            confidence = face.bbox.confidence,
            frame = frame_idx,
            "live enrollment: best face selected"
        );

        let thumbnail = frame_data_url(&frames[frame_idx])?;
        self.store_lock()
            .create(name, vec![face.embedding], Some(thumbnail))?;
        Ok(1)
    }

    fn publish(&self, transitions: &[Transition]) {
        for t in transitions {
            tracing::debug!(transition = ?t, "session transition");
            let _ = self.events.send(t.clone());
        }
    }

    fn store_lock(&self) -> std::sync::MutexGuard<'_, ProfileStore> {
        self.store.lock().expect("store mutex poisoned")
    }
}

/// Data URL for an enrollment photo, inferring the MIME type from the
/// file extension.
fn photo_data_url(path: &Path) -> Result<String, std::io::Error> {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    let bytes = std::fs::read(path)?;
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

/// PNG data URL for a captured grayscale frame.
fn frame_data_url(frame: &Frame) -> Result<String, EngineError> {
    let img = GrayImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(
        || {
            EngineError::Camera(CameraError::CaptureFailed(
                "frame buffer shorter than its dimensions".into(),
            ))
        },
    )?;
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(buf)))
}
