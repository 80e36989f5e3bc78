use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time,
};

use crate::api::ExamSessionApi;

use super::{CountdownState, TimerPhase};

pub type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

/// Exam countdown for one session.
///
/// Remaining time comes from the backend once, then ticks down locally. The
/// expiry callback runs exactly once, whether zero is reached by a local tick
/// or reported by the backend. This is a display and notification aid; the
/// backend remains the authority on whether the exam is over.
#[derive(Clone)]
pub struct ExamTimer {
    session_id: String,
    api: Arc<dyn ExamSessionApi>,
    state: Arc<Mutex<CountdownState>>,
    updates: Arc<watch::Sender<CountdownState>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
    on_expire: ExpiryCallback,
}

impl ExamTimer {
    pub fn new(
        api: Arc<dyn ExamSessionApi>,
        session_id: impl Into<String>,
        on_expire: ExpiryCallback,
    ) -> Self {
        let (updates, _) = watch::channel(CountdownState::new());
        Self {
            session_id: session_id.into(),
            api,
            state: Arc::new(Mutex::new(CountdownState::new())),
            updates: Arc::new(updates),
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(1),
            on_expire,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Registers the session start, loads the authoritative remaining time and
    /// starts the local countdown.
    pub async fn initialize(&self) -> Result<CountdownState> {
        self.register_start().await;

        let server = self
            .api
            .get_timer_state(&self.session_id)
            .await
            .with_context(|| format!("failed to load timer state for {}", self.session_id))?;

        let expired_now = {
            let mut guard = self.state.lock().await;
            let expired_now = guard.apply_server_state(&server);
            self.updates.send_replace(*guard);
            expired_now
        };

        if expired_now {
            info!("session {} already expired on load", self.session_id);
            (self.on_expire)();
        } else {
            self.spawn_ticker().await;
        }

        Ok(self.snapshot().await)
    }

    async fn register_start(&self) {
        match self.api.start_session(&self.session_id).await {
            Ok(()) => info!("session {} started", self.session_id),
            Err(err) if err.is_conflict() => {
                info!("session {} already active; continuing", self.session_id)
            }
            Err(err) => warn!(
                "failed to register start for session {}: {err}",
                self.session_id
            ),
        }
    }

    /// Re-reads the backend clock and replaces the local estimate.
    pub async fn resync(&self) -> Result<CountdownState> {
        let server = self
            .api
            .get_timer_state(&self.session_id)
            .await
            .with_context(|| format!("failed to resync timer for {}", self.session_id))?;

        let (expired_now, snapshot) = {
            let mut guard = self.state.lock().await;
            let expired_now = guard.apply_server_state(&server);
            self.updates.send_replace(*guard);
            (expired_now, *guard)
        };

        if expired_now {
            info!("backend reports session {} expired", self.session_id);
            self.cancel_ticker().await;
            (self.on_expire)();
        }

        Ok(snapshot)
    }

    pub async fn snapshot(&self) -> CountdownState {
        *self.state.lock().await
    }

    pub fn subscribe(&self) -> watch::Receiver<CountdownState> {
        self.updates.subscribe()
    }

    pub async fn stop(&self) {
        self.cancel_ticker().await;
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let updates = self.updates.clone();
        let on_expire = self.on_expire.clone();
        let tick_interval = self.tick_interval;
        let session_id = self.session_id.clone();

        let handle = tokio::spawn(async move {
            let mut interval =
                time::interval_at(time::Instant::now() + tick_interval, tick_interval);
            loop {
                interval.tick().await;

                let expired_now = {
                    let mut guard = state.lock().await;
                    if guard.phase != TimerPhase::Running {
                        break;
                    }
                    let expired_now = guard.tick();
                    updates.send_replace(*guard);
                    expired_now
                };

                if expired_now {
                    info!("session {} time is up", session_id);
                    on_expire();
                    break;
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, InMemoryExamApi, TimerStateResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, ExpiryCallback) {
        let fired = Arc::new(AtomicUsize::new(0));
        let cb_fired = fired.clone();
        let cb: ExpiryCallback = Arc::new(move || {
            cb_fired.fetch_add(1, Ordering::SeqCst);
        });
        (fired, cb)
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_remaining_seconds_and_fires_once() {
        let api = Arc::new(InMemoryExamApi::new(3));
        let (fired, cb) = counter();
        let timer = ExamTimer::new(api, "s1", cb);

        let initial = timer.initialize().await.unwrap();
        assert_eq!(initial.remaining_seconds, 3);
        assert_eq!(initial.phase, TimerPhase::Running);

        time::sleep(Duration::from_millis(2_500)).await;
        let mid = timer.snapshot().await;
        assert_eq!(mid.remaining_seconds, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(600)).await;
        let done = timer.snapshot().await;
        assert!(done.has_expired);
        assert_eq!(done.remaining_seconds, 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_started_session_is_not_an_error() {
        let api = Arc::new(InMemoryExamApi::new(30));
        api.start_session("s1").await.unwrap();
        let (_, cb) = counter();

        let timer = ExamTimer::new(api, "s1", cb);
        let state = timer.initialize().await.unwrap();
        assert!(state.has_started);
        assert_eq!(state.remaining_seconds, 30);
        timer.stop().await;
    }

    struct ScriptedClock {
        expired: AtomicBool,
    }

    #[async_trait]
    impl ExamSessionApi for ScriptedClock {
        async fn start_session(&self, _session_id: &str) -> Result<(), ApiError> {
            Err(ApiError::Status {
                code: 409,
                message: "Session already active".into(),
            })
        }

        async fn get_timer_state(&self, _session_id: &str) -> Result<TimerStateResponse, ApiError> {
            let expired = self.expired.load(Ordering::SeqCst);
            Ok(TimerStateResponse {
                has_expired: expired,
                remaining_seconds: if expired { 0 } else { 600 },
                total_duration_seconds: Some(600),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backend_expiry_wins_over_local_ticks_once() {
        let api = Arc::new(ScriptedClock {
            expired: AtomicBool::new(false),
        });
        let (fired, cb) = counter();
        let timer = ExamTimer::new(api.clone(), "s1", cb);
        timer.initialize().await.unwrap();

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(timer.snapshot().await.remaining_seconds, 599);

        api.expired.store(true, Ordering::SeqCst);
        let state = timer.resync().await.unwrap();
        assert!(state.has_expired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        timer.resync().await.unwrap();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_on_load_fires_without_ticking() {
        let api = Arc::new(ScriptedClock {
            expired: AtomicBool::new(true),
        });
        let (fired, cb) = counter();
        let timer = ExamTimer::new(api, "s1", cb);

        let state = timer.initialize().await.unwrap();
        assert_eq!(state.phase, TimerPhase::Expired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_each_tick() {
        let api = Arc::new(InMemoryExamApi::new(5));
        let (_, cb) = counter();
        let timer = ExamTimer::new(api, "s1", cb);
        let mut rx = timer.subscribe();

        timer.initialize().await.unwrap();
        rx.changed().await.unwrap();
        let seen = *rx.borrow_and_update();
        assert_eq!(seen.remaining_seconds, 5);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().remaining_seconds, 4);
        timer.stop().await;
    }
}
