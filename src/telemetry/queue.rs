use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::{sync::Notify, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{AttemptRecord, Database, QueueEntry},
    error::DeliveryError,
    settings::PracticeSettings,
};

use super::{
    backoff::RetryPolicy,
    connectivity::ConnectivityMonitor,
    transport::Transport,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    /// Upper bound on a single delivery; exceeding it counts as a failure.
    pub request_timeout: Duration,
    /// Oldest entries are evicted past this size. 0 disables the cap.
    pub max_pending: usize,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_settings(&PracticeSettings::default())
    }
}

impl QueueConfig {
    pub fn from_settings(settings: &PracticeSettings) -> Self {
        Self {
            retry: RetryPolicy::from_settings(settings),
            request_timeout: settings.request_timeout(),
            max_pending: settings.max_pending_records,
            poll_interval: settings.retry_poll_interval(),
        }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Undecodable entries removed while reading the queue.
    pub dropped: usize,
}

/// Running counters since the queue was constructed.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub enqueued: u64,
    /// Full flushes (explicit calls and reconnect flushes).
    pub flushes: u64,
    /// Background passes over entries whose retry time has come.
    pub retry_cycles: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub evicted: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy)]
enum FlushMode {
    All,
    Due,
}

struct QueueInner {
    db: Database,
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityMonitor,
    config: QueueConfig,
    flush_lock: tokio::sync::Mutex<()>,
    kick: Notify,
    stats: Mutex<QueueStats>,
}

/// Durable FIFO of attempt records awaiting delivery to the logging endpoint.
///
/// Records are persisted before any delivery is attempted and are only
/// removed once the endpoint accepts them (or by the size cap), so delivery
/// is at-least-once across restarts.
#[derive(Clone)]
pub struct TelemetryQueue {
    inner: Arc<QueueInner>,
}

impl TelemetryQueue {
    pub fn new(
        db: Database,
        transport: Arc<dyn Transport>,
        connectivity: ConnectivityMonitor,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                db,
                transport,
                connectivity,
                config,
                flush_lock: tokio::sync::Mutex::new(()),
                kick: Notify::new(),
                stats: Mutex::new(QueueStats::default()),
            }),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Persist `record` for delivery. Never blocks and never fails; problems
    /// are logged.
    ///
    /// The insert is handed to the database thread before this returns, so
    /// records keep their enqueue order.
    pub fn enqueue(&self, record: AttemptRecord) {
        let reply = match self
            .inner
            .db
            .submit_pending_record(&record, self.inner.config.max_pending)
        {
            Ok(reply) => reply,
            Err(err) => {
                log_error!("Failed to queue attempt record {}: {err:#}", record.id);
                return;
            }
        };
        self.update_stats(|stats| stats.enqueued += 1);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log_debug!("Queued attempt record {} outside a runtime", record.id);
            return;
        };

        let queue = self.clone();
        let record_id = record.id;
        runtime.spawn(async move {
            match reply.await {
                Ok(Ok(evicted)) => {
                    if evicted > 0 {
                        log_warn!("Pending queue full; evicted {evicted} oldest attempt record(s)");
                        queue.update_stats(|stats| stats.evicted += evicted as u64);
                    }
                    log_debug!("Queued attempt record {record_id}");
                    if queue.inner.connectivity.is_online() {
                        queue.inner.kick.notify_one();
                    }
                }
                Ok(Err(err)) => log_error!("Failed to persist attempt record {record_id}: {err:#}"),
                Err(_) => log_error!("Database thread dropped attempt record {record_id}"),
            }
        });
    }

    /// Attempt every pending entry in FIFO order.
    ///
    /// The pending list is read once when the flush starts; records enqueued
    /// meanwhile wait for the next cycle. A failed entry is rescheduled and
    /// does not hold back the entries behind it.
    pub async fn flush(&self) -> FlushReport {
        self.update_stats(|stats| stats.flushes += 1);
        self.deliver_pending(FlushMode::All).await
    }

    /// Attempt only entries whose backoff has elapsed.
    pub async fn flush_due(&self) -> FlushReport {
        self.update_stats(|stats| stats.retry_cycles += 1);
        self.deliver_pending(FlushMode::Due).await
    }

    pub async fn pending(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.inner.db.list_pending_records(None).await?.entries)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.inner.db.count_pending_records().await
    }

    pub fn stats(&self) -> QueueStats {
        *self
            .inner
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Background delivery loop.
    ///
    /// Flushes everything once for each offline -> online edge and retries due
    /// entries when a record is enqueued or the poll interval elapses. Edges
    /// are counted by the monitor, so a flap that happens while a flush is
    /// running still triggers its own flush afterwards.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut connectivity = self.inner.connectivity.subscribe();
        let mut handled_reconnects = connectivity.borrow_and_update().reconnects;

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log_info!("Telemetry queue worker started");

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connectivity.borrow_and_update();
                    if state.reconnects > handled_reconnects && state.status.is_online() {
                        handled_reconnects = state.reconnects;
                        log_info!("Connectivity restored; flushing pending attempt records");
                        let report = self.flush().await;
                        log_report("reconnect", &report);
                    }
                }
                _ = self.inner.kick.notified() => {
                    if self.inner.connectivity.is_online() {
                        let report = self.flush_due().await;
                        log_report("enqueue", &report);
                    }
                }
                _ = ticker.tick() => {
                    if self.inner.connectivity.is_online() {
                        let report = self.flush_due().await;
                        log_report("poll", &report);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        log_info!("Telemetry queue worker stopped");
    }

    async fn deliver_pending(&self, mode: FlushMode) -> FlushReport {
        let _cycle = self.inner.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let due_at = match mode {
            FlushMode::All => None,
            FlushMode::Due => Some(Utc::now()),
        };

        let snapshot = match self.inner.db.list_pending_records(due_at).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log_error!("Failed to read pending attempt records: {err:#}");
                return report;
            }
        };
        report.dropped = snapshot.dropped;

        for entry in snapshot.entries {
            report.attempted += 1;
            match self.deliver_one(&entry.record).await {
                Ok(()) => {
                    report.delivered += 1;
                    if let Err(err) = self.inner.db.delete_pending_record(entry.seq).await {
                        // Stays queued and will be sent again; the endpoint
                        // dedupes on the record id.
                        log_error!("Delivered record {} but failed to dequeue it: {err:#}", entry.record.id);
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    let attempts_made = entry.attempts_made.saturating_add(1);
                    let delay = self.inner.config.retry.delay_for(attempts_made);
                    let next_retry_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                    log_warn!(
                        "Delivery of record {} failed (attempt {attempts_made}): {err}; retrying after {delay:?}",
                        entry.record.id
                    );

                    if let Err(store_err) = self
                        .inner
                        .db
                        .record_delivery_failure(entry.seq, &err.to_string(), next_retry_at)
                        .await
                    {
                        log_error!("Failed to record delivery failure for {}: {store_err:#}", entry.record.id);
                    }
                }
            }
        }

        self.update_stats(|stats| {
            stats.delivered += report.delivered as u64;
            stats.failed_attempts += report.failed as u64;
            stats.dropped += report.dropped as u64;
        });

        report
    }

    async fn deliver_one(&self, record: &AttemptRecord) -> Result<(), DeliveryError> {
        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, self.inner.transport.deliver(record)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        }
    }

    fn update_stats(&self, apply: impl FnOnce(&mut QueueStats)) {
        let mut guard = self
            .inner
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut guard);
    }
}

fn log_report(trigger: &str, report: &FlushReport) {
    if report.attempted > 0 || report.dropped > 0 {
        log_info!(
            "Flush ({trigger}): {} attempted, {} delivered, {} failed, {} dropped",
            report.attempted,
            report.delivered,
            report.failed,
            report.dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Connectivity;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Records every delivered hypothesis; fails those listed in `failing`.
    #[derive(Default)]
    struct ScriptedTransport {
        failing: Mutex<HashSet<String>>,
        delivered: Mutex<Vec<String>>,
        stall: Option<Duration>,
    }

    impl ScriptedTransport {
        fn failing(texts: &[&str]) -> Self {
            Self {
                failing: Mutex::new(texts.iter().map(|t| t.to_string()).collect()),
                ..Self::default()
            }
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn deliver(&self, record: &AttemptRecord) -> Result<(), DeliveryError> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.failing.lock().unwrap().contains(&record.hypothesis_text) {
                return Err(DeliveryError::Status(503));
            }
            self.delivered
                .lock()
                .unwrap()
                .push(record.hypothesis_text.clone());
            Ok(())
        }
    }

    fn record(text: &str) -> AttemptRecord {
        AttemptRecord::new("나는 오늘도 최고야", text, true, "vs_queue")
    }

    fn config() -> QueueConfig {
        QueueConfig {
            retry: RetryPolicy {
                base: Duration::from_secs(60),
                max: Duration::from_secs(600),
            },
            request_timeout: Duration::from_millis(200),
            max_pending: 0,
            poll_interval: Duration::from_secs(3600),
        }
    }

    fn queue_with(
        transport: Arc<ScriptedTransport>,
        connectivity: ConnectivityMonitor,
    ) -> (tempfile::TempDir, TelemetryQueue) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("telemetry.sqlite3")).unwrap();
        let queue = TelemetryQueue::new(db, transport, connectivity, config());
        (dir, queue)
    }

    #[tokio::test]
    async fn failed_entry_stays_and_is_delivered_later_alone() {
        let transport = Arc::new(ScriptedTransport::failing(&["two"]));
        let (_dir, queue) = queue_with(transport.clone(), ConnectivityMonitor::default());

        for text in ["one", "two", "three"] {
            queue.enqueue(record(text));
        }
        assert_eq!(queue.pending_count().await.unwrap(), 3);

        let report = queue.flush().await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(transport.delivered(), ["one", "three"]);

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.hypothesis_text, "two");
        assert_eq!(pending[0].attempts_made, 1);
        assert!(pending[0].next_retry_at > Utc::now());
        assert!(pending[0].last_error.as_deref().unwrap().contains("503"));

        transport.heal();
        let report = queue.flush().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(transport.delivered(), ["one", "three", "two"]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_due_respects_backoff() {
        let transport = Arc::new(ScriptedTransport::failing(&["late"]));
        let (_dir, queue) = queue_with(transport.clone(), ConnectivityMonitor::default());

        queue.enqueue(record("late"));
        assert_eq!(queue.flush_due().await.failed, 1);

        transport.heal();
        let report = queue.flush_due().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn slow_delivery_times_out_and_is_retained() {
        let transport = Arc::new(ScriptedTransport {
            stall: Some(Duration::from_secs(5)),
            ..ScriptedTransport::default()
        });
        let (_dir, queue) = queue_with(transport.clone(), ConnectivityMonitor::default());

        queue.enqueue(record("slow"));
        let report = queue.flush().await;
        assert_eq!(report.failed, 1);
        assert!(transport.delivered().is_empty());

        let pending = queue.pending().await.unwrap();
        assert!(pending[0].last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn entries_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.sqlite3");
        let transport = Arc::new(ScriptedTransport::default());

        {
            let db = Database::new(path.clone()).unwrap();
            let queue = TelemetryQueue::new(
                db,
                transport.clone(),
                ConnectivityMonitor::new(Connectivity::Offline),
                config(),
            );
            queue.enqueue(record("before restart"));
            assert_eq!(queue.pending_count().await.unwrap(), 1);
        }

        let db = Database::new(path).unwrap();
        let queue = TelemetryQueue::new(db, transport.clone(), ConnectivityMonitor::default(), config());
        assert_eq!(queue.flush().await.delivered, 1);
        assert_eq!(transport.delivered(), ["before restart"]);
    }

    #[tokio::test]
    async fn reconnect_triggers_exactly_one_flush() {
        let transport = Arc::new(ScriptedTransport::default());
        let connectivity = ConnectivityMonitor::new(Connectivity::Online);
        let (_dir, queue) = queue_with(transport.clone(), connectivity.clone());

        let cancel = CancellationToken::new();
        let worker = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.run(cancel).await }
        });

        connectivity.set_online(false);
        queue.enqueue(record("offline"));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.delivered().is_empty());

        connectivity.set_online(true);
        for _ in 0..100 {
            if queue.stats().flushes >= 1 && queue.pending_count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(queue.stats().flushes, 1);
        assert_eq!(transport.delivered(), ["offline"]);

        // Staying online publishes nothing new.
        connectivity.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.stats().flushes, 1);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn flap_during_running_flush_still_flushes_on_reconnect() {
        let transport = Arc::new(ScriptedTransport {
            stall: Some(Duration::from_millis(150)),
            ..ScriptedTransport::default()
        });
        let connectivity = ConnectivityMonitor::new(Connectivity::Online);
        let (_dir, queue) = queue_with(transport.clone(), connectivity.clone());

        let cancel = CancellationToken::new();
        let worker = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.run(cancel).await }
        });

        queue.enqueue(record("slow"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.stats().flushes, 0);

        // Both edges land while the worker is stuck inside the delivery.
        connectivity.set_online(false);
        connectivity.set_online(true);

        for _ in 0..100 {
            if queue.stats().flushes >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(queue.stats().flushes, 1);
        assert_eq!(transport.delivered(), ["slow"]);
        assert_eq!(queue.pending_count().await.unwrap(), 0);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_while_online_is_delivered_by_worker() {
        let transport = Arc::new(ScriptedTransport::default());
        let (_dir, queue) = queue_with(transport.clone(), ConnectivityMonitor::default());

        let cancel = CancellationToken::new();
        let worker = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.run(cancel).await }
        });

        queue.enqueue(record("live"));
        for _ in 0..100 {
            if !transport.delivered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(transport.delivered(), ["live"]);
        assert_eq!(queue.stats().flushes, 0);

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn records_enqueued_during_flush_wait_for_next_cycle() {
        let transport = Arc::new(ScriptedTransport {
            stall: Some(Duration::from_millis(120)),
            ..ScriptedTransport::default()
        });
        let (_dir, queue) = queue_with(transport.clone(), ConnectivityMonitor::default());

        queue.enqueue(record("first"));
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let in_flight = tokio::spawn({
            let queue = queue.clone();
            async move { queue.flush().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(record("second"));

        let report = in_flight.await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        assert_eq!(queue.flush().await.delivered, 1);
        assert_eq!(transport.delivered(), ["first", "second"]);
    }
}
