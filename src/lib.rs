pub mod api;
pub mod cli;
pub mod detection;
pub mod media;
pub mod metrics;
pub mod proctoring;
pub mod settings;
pub mod timer;
pub mod utils;
pub mod violations;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::sync::Notify;
use uuid::Uuid;

use api::{InMemoryExamApi, LogReporter};
use cli::ProctorArgs;
use media::{DirectoryFrameSource, MediaStream};
use proctoring::{ProctoringController, ProctoringSetup};
use settings::SettingsStore;
use timer::ExamTimer;

/// Offline session: replays a directory of frames, keeps time against an
/// in-memory backend and logs every accepted violation.
pub async fn run() -> Result<()> {
    // Reads RUST_LOG; info unless overridden
    env_logger::Builder::new()
        .filter_level(if settings::debug_mode() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let args = ProctorArgs::parse();
    let proctor_settings = SettingsStore::new(args.settings.clone())?.settings();

    let session_id = Uuid::new_v4().to_string();
    info!("exam proctor starting session {}", session_id);

    let frames = DirectoryFrameSource::open(&args.frames_dir)?;
    info!(
        "replaying {} frame(s) from {}",
        frames.len(),
        args.frames_dir.display()
    );
    let stream = MediaStream::new(Arc::new(frames));

    let backend = Arc::new(InMemoryExamApi::new(args.duration_secs));
    let time_up = Arc::new(Notify::new());
    let timer = ExamTimer::new(backend, session_id.clone(), {
        let time_up = time_up.clone();
        Arc::new(move || time_up.notify_one())
    });
    timer.initialize().await?;

    let setup = ProctoringSetup::new(Arc::new(LogReporter));
    let mut controller = ProctoringController::start(session_id.clone(), stream, setup, proctor_settings)?;

    let heartbeat_every = if settings::debug_mode() { 1 } else { 10 };
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_every));

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let status = controller.status();
                let clock = timer.snapshot().await;
                info!(
                    "session {}: {:?}, {}s remaining",
                    session_id, status.indicator, clock.remaining_seconds
                );
            }
            _ = time_up.notified() => {
                info!("exam time is up for session {}", session_id);
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("failed to listen for ctrl-c: {err}");
                }
                info!("interrupted; stopping session {}", session_id);
                break;
            }
        }
    }

    timer.stop().await;
    controller.stop().await?;

    let metrics = controller.metrics().await;
    info!(
        "session {} finished: {} cycles, {} violations reported, {} throttled",
        session_id,
        metrics.cycle_count,
        metrics.violations.reported,
        metrics.violations.throttled
    );
    Ok(())
}
