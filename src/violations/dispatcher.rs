use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ViolationEvent, ViolationTracker};
use crate::api::ProctoringApi;
use crate::metrics::MetricsCollector;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Gate between detector loops and the reporting backend.
///
/// Accepted events are queued in acceptance order and sent one at a time by a
/// single reporting task, so detector loops never wait on the network.
#[derive(Clone)]
pub struct ViolationDispatcher {
    tracker: Arc<ViolationTracker>,
    // Held across check-and-enqueue so queue order equals acceptance order.
    queue: Arc<Mutex<mpsc::UnboundedSender<ViolationEvent>>>,
    metrics: MetricsCollector,
}

impl ViolationDispatcher {
    pub fn spawn(
        tracker: Arc<ViolationTracker>,
        reporter: Arc<dyn ProctoringApi>,
        report_timeout: Duration,
        metrics: MetricsCollector,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(reporting_loop(
            rx,
            reporter,
            report_timeout,
            metrics.clone(),
            cancel_token,
        ));

        let dispatcher = Self {
            tracker,
            queue: Arc::new(Mutex::new(tx)),
            metrics,
        };
        (dispatcher, handle)
    }

    pub fn tracker(&self) -> &ViolationTracker {
        &self.tracker
    }

    /// Runs a candidate through the throttle. Returns `true` when it was
    /// accepted and queued for reporting.
    pub async fn raise(&self, event: ViolationEvent) -> bool {
        let (accepted, queued) = {
            let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            if self.tracker.should_report(event.kind) {
                (true, queue.send(event.clone()).is_ok())
            } else {
                (false, false)
            }
        };

        if !accepted {
            log_debug!("{} throttled", event.kind);
        }
        self.metrics.record_candidate(accepted).await;
        if accepted && !queued {
            log_warn!("reporting task gone; dropping {}", event.kind);
            self.metrics.record_report(false).await;
        }
        accepted
    }
}

async fn reporting_loop(
    mut rx: mpsc::UnboundedReceiver<ViolationEvent>,
    reporter: Arc<dyn ProctoringApi>,
    report_timeout: Duration,
    metrics: MetricsCollector,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            next = rx.recv() => {
                let Some(event) = next else { return };
                send_report(reporter.as_ref(), &event, report_timeout, &metrics).await;
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    // Accepted events still go out once, each under the same timeout.
    rx.close();
    let mut flushed = 0usize;
    while let Ok(event) = rx.try_recv() {
        send_report(reporter.as_ref(), &event, report_timeout, &metrics).await;
        flushed += 1;
    }
    log_debug!("reporting loop shutting down, flushed {} pending report(s)", flushed);
}

async fn send_report(
    reporter: &dyn ProctoringApi,
    event: &ViolationEvent,
    report_timeout: Duration,
    metrics: &MetricsCollector,
) {
    let ok = match tokio::time::timeout(report_timeout, reporter.report_violation(event)).await {
        Ok(Ok(())) => {
            log_info!("reported {} at {}", event.kind, event.timestamp_iso());
            true
        }
        Ok(Err(err)) => {
            log_warn!("failed to report {}: {err}", event.kind);
            false
        }
        Err(_) => {
            log_warn!("reporting {} timed out after {}ms", event.kind, report_timeout.as_millis());
            false
        }
    };
    metrics.record_report(ok).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryExamApi;
    use crate::violations::ViolationType;
    use serde_json::json;

    fn dispatcher(
        api: Arc<InMemoryExamApi>,
        cancel: CancellationToken,
    ) -> (ViolationDispatcher, JoinHandle<()>, MetricsCollector) {
        let metrics = MetricsCollector::new();
        let (dispatcher, handle) = ViolationDispatcher::spawn(
            Arc::new(ViolationTracker::new(Duration::from_secs(5))),
            api,
            Duration::from_secs(1),
            metrics.clone(),
            cancel,
        );
        (dispatcher, handle, metrics)
    }

    #[tokio::test]
    async fn accepted_events_reach_backend_in_order() {
        let api = Arc::new(InMemoryExamApi::new(60));
        let cancel = CancellationToken::new();
        let (dispatcher, handle, _) = dispatcher(api.clone(), cancel.clone());

        assert!(dispatcher.raise(ViolationEvent::new(ViolationType::NoFaceDetected, json!({ "faceCount": 0 }))).await);
        assert!(!dispatcher.raise(ViolationEvent::new(ViolationType::NoFaceDetected, json!({ "faceCount": 0 }))).await);
        assert!(dispatcher.raise(ViolationEvent::new(ViolationType::AudioNoiseDetected, json!({ "level": -10.0 }))).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let kinds: Vec<_> = api.reported().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ViolationType::NoFaceDetected, ViolationType::AudioNoiseDetected]
        );
    }

    #[tokio::test]
    async fn failed_reports_are_dropped_not_retried() {
        let api = Arc::new(InMemoryExamApi::new(60));
        api.set_fail_reports(true);
        let cancel = CancellationToken::new();
        let (dispatcher, handle, metrics) = dispatcher(api.clone(), cancel.clone());

        assert!(dispatcher.raise(ViolationEvent::new(ViolationType::MultipleFaces, json!({ "faceCount": 2 }))).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        api.set_fail_reports(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(api.reported().is_empty());
        let counters = metrics.get_snapshot().await.violations;
        assert_eq!(counters.report_failures, 1);
        assert_eq!(counters.reported, 0);
    }

    #[tokio::test]
    async fn queued_reports_are_flushed_on_shutdown() {
        let api = Arc::new(InMemoryExamApi::new(60));
        let cancel = CancellationToken::new();
        let (dispatcher, handle, metrics) = dispatcher(api.clone(), cancel.clone());

        for kind in ViolationType::ALL {
            assert!(dispatcher.raise(ViolationEvent::new(kind, json!({}))).await);
        }
        cancel.cancel();
        handle.await.unwrap();

        let counters = metrics.get_snapshot().await.violations;
        assert_eq!(counters.accepted, ViolationType::ALL.len() as u64);
        assert_eq!(counters.reported + counters.report_failures, counters.accepted);
        assert_eq!(api.reported().len(), ViolationType::ALL.len());
    }

    #[tokio::test]
    async fn raise_after_shutdown_counts_as_report_failure() {
        let api = Arc::new(InMemoryExamApi::new(60));
        let cancel = CancellationToken::new();
        let (dispatcher, handle, metrics) = dispatcher(api.clone(), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();

        assert!(dispatcher.raise(ViolationEvent::new(ViolationType::FaceMismatch, json!({}))).await);
        assert!(api.reported().is_empty());

        let counters = metrics.get_snapshot().await.violations;
        assert_eq!(counters.accepted, 1);
        assert_eq!(counters.report_failures, 1);
    }
}
