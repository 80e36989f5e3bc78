use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use log::{info, warn};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{audio_loop, frame_loop, object_loop, prepare_face, LoopContext};
use super::{ProctoringStatus, StatusBoard, Subsystem, SubsystemState};
use crate::api::ProctoringApi;
use crate::detection::{FaceModelLoader, ObjectModelLoader};
use crate::media::MediaStream;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::settings::ProctorSettings;
use crate::violations::{ViolationDispatcher, ViolationTracker};

/// Collaborators for one session. Missing model loaders leave the matching
/// subsystem unavailable; everything else still runs.
pub struct ProctoringSetup {
    pub reporter: Arc<dyn ProctoringApi>,
    pub face_models: Option<Arc<dyn FaceModelLoader>>,
    pub object_models: Option<Arc<dyn ObjectModelLoader>>,
    pub reference_photo: Option<RgbImage>,
}

impl ProctoringSetup {
    pub fn new(reporter: Arc<dyn ProctoringApi>) -> Self {
        Self {
            reporter,
            face_models: None,
            object_models: None,
            reference_photo: None,
        }
    }

    pub fn with_face_models(mut self, loader: Arc<dyn FaceModelLoader>) -> Self {
        self.face_models = Some(loader);
        self
    }

    pub fn with_object_models(mut self, loader: Arc<dyn ObjectModelLoader>) -> Self {
        self.object_models = Some(loader);
        self
    }

    pub fn with_reference_photo(mut self, photo: RgbImage) -> Self {
        self.reference_photo = Some(photo);
        self
    }
}

/// Owns every task of a proctoring session. All tasks share one
/// cancellation token; [`ProctoringController::stop`] cancels and joins
/// them, and dropping the controller cancels them.
pub struct ProctoringController {
    session_id: String,
    board: StatusBoard,
    metrics: MetricsCollector,
    tracker: Arc<ViolationTracker>,
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl ProctoringController {
    pub fn start(
        session_id: impl Into<String>,
        stream: MediaStream,
        setup: ProctoringSetup,
        settings: ProctorSettings,
    ) -> Result<Self> {
        validate(&settings)?;

        let session_id = session_id.into();
        let cancel_token = CancellationToken::new();
        let board = StatusBoard::new(session_id.clone(), settings.alert_duration());
        let metrics = MetricsCollector::new();
        let tracker = Arc::new(ViolationTracker::new(settings.throttle_window()));

        let mut controller = Self {
            session_id: session_id.clone(),
            board: board.clone(),
            metrics: metrics.clone(),
            tracker: tracker.clone(),
            handles: Vec::with_capacity(5),
            cancel_token: Some(cancel_token.clone()),
        };

        let (dispatcher, reporting) = ViolationDispatcher::spawn(
            tracker,
            setup.reporter,
            settings.report_timeout(),
            metrics.clone(),
            cancel_token.clone(),
        );
        controller.handles.push(reporting);

        let ctx = LoopContext {
            session_id: Arc::from(session_id.as_str()),
            stream,
            settings: Arc::new(settings),
            board,
            dispatcher,
            metrics,
            cancel_token,
        };

        let engine = Arc::new(OnceCell::new());
        controller.handles.push(tokio::spawn(prepare_face(
            ctx.clone(),
            setup.face_models,
            setup.reference_photo.map(Arc::new),
            engine.clone(),
        )));
        controller
            .handles
            .push(tokio::spawn(frame_loop(ctx.clone(), engine)));
        controller.handles.push(tokio::spawn(audio_loop(ctx.clone())));
        controller
            .handles
            .push(tokio::spawn(object_loop(ctx, setup.object_models)));

        info!("proctoring started for session {}", controller.session_id);
        Ok(controller)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.cancel_token.is_some()
    }

    pub fn status(&self) -> ProctoringStatus {
        self.board.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProctoringStatus> {
        self.board.subscribe()
    }

    pub fn tracker(&self) -> &ViolationTracker {
        &self.tracker
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_snapshot().await
    }

    /// Cancels every loop and waits for them to finish. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(token) = self.cancel_token.take() else {
            return Ok(());
        };
        token.cancel();

        let mut first_err = None;
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await.context("proctoring task failed to join") {
                warn!("{err:#}");
                first_err.get_or_insert(err);
            }
        }

        self.board.update(|status| {
            for subsystem in [
                Subsystem::Face,
                Subsystem::Brightness,
                Subsystem::Audio,
                Subsystem::Objects,
            ] {
                if !matches!(status.subsystems.get(subsystem), SubsystemState::Unavailable(_)) {
                    status.subsystems.set(subsystem, SubsystemState::Stopped);
                }
            }
        });
        info!("proctoring stopped for session {}", self.session_id);

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ProctoringController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

fn validate(settings: &ProctorSettings) -> Result<()> {
    if !(0.0..=255.0).contains(&settings.black_screen_threshold) {
        bail!(
            "blackScreenThreshold must be within 0..=255, got {}",
            settings.black_screen_threshold
        );
    }
    if !(0.0..=1.0).contains(&settings.objects.min_confidence) {
        bail!(
            "objects.minConfidence must be within 0..=1, got {}",
            settings.objects.min_confidence
        );
    }
    let match_threshold = settings.face.match_threshold;
    if !(match_threshold > 0.0 && match_threshold.is_finite()) {
        bail!("face.matchThreshold must be a positive number, got {match_threshold}");
    }
    if !settings.noise_threshold_db.is_finite() {
        bail!(
            "noiseThresholdDb must be a finite dB value, got {}",
            settings.noise_threshold_db
        );
    }
    Ok(())
}
