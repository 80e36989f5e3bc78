use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use image::RgbImage;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{ReferenceState, StatusBoard, Subsystem, SubsystemState};
use crate::detection::{
    brightness, objects::objects_metadata, AudioMonitor, DetectionResult, FaceDescriptor,
    FaceDetector, FaceModelLoader, FaceStatus, ObjectDetector, ObjectModelLoader,
};
use crate::media::MediaStream;
use crate::metrics::{CycleMetrics, MetricsCollector};
use crate::settings::ProctorSettings;
use crate::violations::{ViolationDispatcher, ViolationEvent, ViolationType};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Face models plus the enrollment descriptor, published once loaded.
pub struct FaceEngine {
    pub detector: Arc<FaceDetector>,
    pub reference: Option<FaceDescriptor>,
}

/// Everything a detector loop shares with its siblings.
#[derive(Clone)]
pub struct LoopContext {
    pub session_id: Arc<str>,
    pub stream: MediaStream,
    pub settings: Arc<ProctorSettings>,
    pub board: StatusBoard,
    pub dispatcher: ViolationDispatcher,
    pub metrics: MetricsCollector,
    pub cancel_token: CancellationToken,
}

impl LoopContext {
    /// Sends a candidate through the throttle; accepted ones also raise a
    /// transient alert.
    pub async fn raise(&self, kind: ViolationType, metadata: Value) {
        let event = ViolationEvent::new(kind, metadata);
        if !self.dispatcher.raise(event).await {
            return;
        }

        log_info!("session {}: {} accepted", self.session_id, kind);
        self.board.push_alert(kind);

        let board = self.board.clone();
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(board.alert_duration()) => board.dismiss_expired(),
                _ = cancel_token.cancelled() => {}
            }
        });
    }

    /// Polls until the camera delivers frames. `false` when cancelled first.
    async fn wait_for_video(&self) -> bool {
        let mut poll = tokio::time::interval(self.settings.video_poll());
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.stream.video.is_ready() {
                        return true;
                    }
                }
                _ = self.cancel_token.cancelled() => return false,
            }
        }
    }

    async fn grab_frame(&self) -> Result<Arc<RgbImage>> {
        let video = self.stream.video.clone();
        let frame = tokio::task::spawn_blocking(move || video.grab_frame())
            .await
            .context("frame grab worker join failed")?
            .context("frame grab failed")?;
        Ok(Arc::new(frame))
    }

    /// Runs `cycle` on every tick until cancelled. A cycle is awaited before
    /// the next tick is taken and late ticks are skipped, so cycles of one
    /// loop never overlap. Cancellation also abandons the cycle in flight.
    async fn run_ticks<F, Fut>(&self, subsystem: Subsystem, period: Duration, mut cycle: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let timeout = self.settings.detection_timeout();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel_token.cancelled() => break,
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(timeout, cycle()) => outcome,
                _ = self.cancel_token.cancelled() => break,
            };

            let timed_out = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    log_debug!("{:?} cycle skipped for session {}: {err:#}", subsystem, self.session_id);
                    false
                }
                Err(_) => {
                    log_warn!("{:?} cycle timeout (> {}ms) session {}", subsystem, timeout.as_millis(), self.session_id);
                    true
                }
            };

            self.metrics
                .record_cycle(CycleMetrics {
                    timestamp: Utc::now(),
                    subsystem,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timed_out,
                })
                .await;
        }
        log_debug!("{:?} loop shutting down", subsystem);
    }
}

/// Loads face models and the reference descriptor, then publishes them for
/// the frame loop. Never blocks the other subsystems.
pub async fn prepare_face(
    ctx: LoopContext,
    loader: Option<Arc<dyn FaceModelLoader>>,
    reference_photo: Option<Arc<RgbImage>>,
    engine: Arc<OnceCell<FaceEngine>>,
) {
    let Some(loader) = loader else {
        ctx.board.update(|status| {
            status.subsystems.face = SubsystemState::Unavailable("no face models configured".into());
            status.reference = ReferenceState::Absent;
        });
        return;
    };

    let backends = tokio::select! {
        loaded = loader.load() => loaded,
        _ = ctx.cancel_token.cancelled() => return,
    };

    let backends = match backends {
        Ok(backends) if !backends.is_empty() => backends,
        Ok(_) => {
            log_warn!("face model loader returned no backends");
            ctx.board.update(|status| {
                status.subsystems.face = SubsystemState::Unavailable("no face backends".into());
                status.reference = ReferenceState::Absent;
            });
            return;
        }
        Err(err) => {
            log_warn!("face models unavailable for session {}: {err:#}", ctx.session_id);
            ctx.board.update(|status| {
                status.subsystems.face = SubsystemState::Unavailable(format!("{err:#}"));
                status.reference = ReferenceState::Absent;
            });
            return;
        }
    };

    let detector = Arc::new(FaceDetector::new(backends, ctx.settings.face.clone()));

    let reference = match reference_photo {
        Some(photo) => detector.compute_reference_descriptor(&photo).await,
        None => {
            log_info!("no reference photo for session {}", ctx.session_id);
            None
        }
    };

    let reference_state = if reference.is_some() {
        ReferenceState::Loaded
    } else {
        ReferenceState::Absent
    };

    // Only this task sets the cell.
    let _ = engine.set(FaceEngine {
        detector,
        reference,
    });

    ctx.board.update(|status| {
        status.reference = reference_state;
        if status.subsystems.face == SubsystemState::LoadingModels {
            status.subsystems.face = SubsystemState::WaitingForVideo;
        }
    });
    log_info!("face detection ready for session {}", ctx.session_id);
}

/// Brightness and face share this tick since both need the current frame.
pub async fn frame_loop(ctx: LoopContext, engine: Arc<OnceCell<FaceEngine>>) {
    if !ctx.wait_for_video().await {
        return;
    }
    ctx.board
        .set_state(Subsystem::Brightness, SubsystemState::Running);
    log_info!("frame loop running for session {}", ctx.session_id);

    let period = ctx.settings.face_interval();
    ctx.run_ticks(Subsystem::Face, period, || frame_cycle(&ctx, &engine))
        .await;
}

async fn frame_cycle(ctx: &LoopContext, engine: &OnceCell<FaceEngine>) -> Result<()> {
    let frame = ctx.grab_frame().await?;

    let threshold = ctx.settings.black_screen_threshold;
    let reading = tokio::task::spawn_blocking({
        let frame = Arc::clone(&frame);
        move || brightness::measure(&frame, threshold)
    })
    .await
    .context("brightness worker join failed")?;

    ctx.board.update(|status| status.brightness = Some(reading));
    if reading.is_black {
        ctx.raise(
            ViolationType::ScreenBlackDetected,
            json!({ "brightness": reading.brightness }),
        )
        .await;
    }

    let Some(engine) = engine.get() else {
        return Ok(());
    };

    let result = match engine
        .detector
        .try_detect(&frame, engine.reference.as_ref())
        .await
    {
        Ok(result) => result,
        Err(err) => {
            // Shown as no-face, but a failed inference is not evidence of a violation.
            log_debug!("face detection failed: {err:#}");
            ctx.board.update(|status| {
                status.subsystems.face = SubsystemState::Running;
                status.face = Some(DetectionResult::no_face());
            });
            return Ok(());
        }
    };

    let face_count = result.face_count;
    let candidate = match result.status {
        FaceStatus::NoFace => Some((
            ViolationType::NoFaceDetected,
            json!({ "faceCount": face_count }),
        )),
        FaceStatus::Multiple => Some((
            ViolationType::MultipleFaces,
            json!({ "faceCount": face_count }),
        )),
        FaceStatus::Mismatch => Some((
            ViolationType::FaceMismatch,
            json!({ "confidence": result.confidence, "distance": result.distance }),
        )),
        FaceStatus::Match | FaceStatus::Unverified => None,
    };

    ctx.board.update(|status| {
        status.subsystems.face = SubsystemState::Running;
        status.face = Some(result);
    });

    if let Some((kind, metadata)) = candidate {
        ctx.raise(kind, metadata).await;
    }
    Ok(())
}

pub async fn audio_loop(ctx: LoopContext) {
    let Some(input) = ctx.stream.audio.clone() else {
        ctx.board.set_state(
            Subsystem::Audio,
            SubsystemState::Unavailable("no microphone".into()),
        );
        return;
    };

    // Dropped when the loop ends, which releases the audio context.
    let mut analyser = match input.open_analyser() {
        Ok(analyser) => analyser,
        Err(err) => {
            log_warn!("microphone unavailable for session {}: {err:#}", ctx.session_id);
            ctx.board
                .set_state(Subsystem::Audio, SubsystemState::Unavailable(format!("{err:#}")));
            return;
        }
    };

    ctx.board.set_state(Subsystem::Audio, SubsystemState::Running);
    log_info!("audio loop running for session {}", ctx.session_id);

    let mut monitor = AudioMonitor::new(ctx.settings.noise_threshold_db);
    let period = ctx.settings.audio_interval();
    let analyser = &mut analyser;
    let monitor = &mut monitor;
    let ctx_ref = &ctx;

    ctx.run_ticks(Subsystem::Audio, period, move || {
        let level = monitor.sample(&mut **analyser);
        async move {
            ctx_ref.board.update(|status| status.audio = Some(level));
            if level.is_noisy {
                ctx_ref
                    .raise(
                        ViolationType::AudioNoiseDetected,
                        json!({ "level": level.decibels }),
                    )
                    .await;
            }
            Ok(())
        }
    })
    .await;
}

pub async fn object_loop(ctx: LoopContext, loader: Option<Arc<dyn ObjectModelLoader>>) {
    let Some(loader) = loader else {
        ctx.board.set_state(
            Subsystem::Objects,
            SubsystemState::Unavailable("no object model configured".into()),
        );
        return;
    };

    let model = tokio::select! {
        loaded = loader.load() => loaded,
        _ = ctx.cancel_token.cancelled() => return,
    };

    let model = match model {
        Ok(model) => model,
        Err(err) => {
            log_warn!("object model unavailable for session {}: {err:#}", ctx.session_id);
            ctx.board.set_state(
                Subsystem::Objects,
                SubsystemState::Unavailable(format!("{err:#}")),
            );
            return;
        }
    };

    let detector = ObjectDetector::new(model, ctx.settings.objects.clone());

    ctx.board
        .set_state(Subsystem::Objects, SubsystemState::WaitingForVideo);
    if !ctx.wait_for_video().await {
        return;
    }
    ctx.board.set_state(Subsystem::Objects, SubsystemState::Running);
    log_info!("object loop running for session {}", ctx.session_id);

    let period = ctx.settings.object_interval();
    ctx.run_ticks(Subsystem::Objects, period, || object_cycle(&ctx, &detector))
        .await;
}

async fn object_cycle(ctx: &LoopContext, detector: &ObjectDetector) -> Result<()> {
    let frame = ctx.grab_frame().await?;
    let found = detector.detect(&frame).await?;

    ctx.board.update(|status| status.objects = found.clone());
    if !found.is_empty() {
        log_debug!("suspicious objects: {:?}", found);
        ctx.raise(ViolationType::UnwantedObjectDetected, objects_metadata(&found))
            .await;
    }
    Ok(())
}
