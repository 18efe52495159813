use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::db::{DbHandle, ResetResult};
use super::models::{LedgerVerification, ResetAudit, StartOutcome};
use super::progress::{
    DEFAULT_LEDGER_POLL_INTERVAL, DEFAULT_STREAM_TIMEOUT, LedgerWatch, ProgressBroadcaster,
    ProgressEvent, ProgressSubscription,
};
use super::strategy::ClearingStrategy;
use crate::errors::ResetError;

pub const DEFAULT_HISTORY_LIMIT: i64 = 20;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Error text recorded for active jobs whose lease ran out.
pub const INTERRUPTED_MESSAGE: &str =
    "Reset interrupted: the process running the job stopped before it finished";

/// Clamp a requested history size into `1..=100`.
pub fn clamp_history_limit(limit: i64) -> u32 {
    limit.clamp(1, MAX_HISTORY_LIMIT) as u32
}

/// Owns the reset lifecycle: starting jobs, running them on background
/// workers, and answering ledger queries.
pub struct ResetOrchestrator {
    db: DbHandle,
    strategy: Arc<dyn ClearingStrategy>,
    progress: ProgressBroadcaster,
    workers: Arc<tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>>,
    stream_timeout: Duration,
    ledger_poll_interval: Duration,
    recover_abandoned: bool,
}

impl ResetOrchestrator {
    pub fn new(db: DbHandle, strategy: Arc<dyn ClearingStrategy>) -> Self {
        Self {
            db,
            strategy,
            progress: ProgressBroadcaster::new(),
            workers: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            ledger_poll_interval: DEFAULT_LEDGER_POLL_INTERVAL,
            recover_abandoned: true,
        }
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_ledger_poll_interval(mut self, every: Duration) -> Self {
        self.ledger_poll_interval = every;
        self
    }

    /// Whether `start` first fails active jobs whose lease has run out.
    pub fn with_abandoned_recovery(mut self, enabled: bool) -> Self {
        self.recover_abandoned = enabled;
        self
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn stream_timeout(&self) -> Duration {
        self.stream_timeout
    }

    /// Record a new job and hand it to a background worker, or report the job
    /// that is already active. Returns as soon as the `STARTED` row commits.
    ///
    /// An active job whose lease has run out no longer blocks the slot: it is
    /// failed first, in the same call, when abandoned-job recovery is on.
    pub async fn start(&self, started_by: &str, ip_address: &str) -> ResetResult<StartOutcome> {
        let job_id = uuid::Uuid::new_v4().to_string();
        // Open before the row is visible so no subscriber can race the worker.
        self.progress.open(&job_id);

        let outcome = {
            let job_id = job_id.clone();
            let started_by = started_by.to_string();
            let ip_address = ip_address.to_string();
            let recover = self.recover_abandoned;
            self.db
                .call(move |db| {
                    if recover {
                        for audit in db.fail_abandoned(INTERRUPTED_MESSAGE)? {
                            tracing::warn!(job_id = %audit.job_id, "marked abandoned reset job as failed");
                        }
                    }
                    db.begin_reset(&job_id, &started_by, &ip_address)
                })
                .await
        };

        match outcome {
            Ok(StartOutcome::Started(audit)) => {
                tracing::info!(
                    job_id = %audit.job_id,
                    started_by = %audit.started_by,
                    ip_address = %audit.ip_address,
                    strategy = self.strategy.name(),
                    "factory reset accepted"
                );
                self.spawn_worker(&audit.job_id).await;
                Ok(StartOutcome::Started(audit))
            }
            Ok(StartOutcome::Conflict(active)) => {
                self.progress.close(&job_id);
                tracing::info!(active_job_id = %active.job_id, "factory reset rejected: job already active");
                Ok(StartOutcome::Conflict(active))
            }
            Err(e) => {
                self.progress.close(&job_id);
                Err(e)
            }
        }
    }

    /// Spawn the worker for `job_id` unless one was already spawned.
    async fn spawn_worker(&self, job_id: &str) {
        let mut workers = self.workers.lock().await;
        workers.retain(|_, handle| !handle.is_finished());
        if workers.contains_key(job_id) {
            tracing::warn!(job_id, "worker already running for job");
            return;
        }

        let span = tracing::info_span!("reset_job", job_id = %job_id);
        let handle = tokio::spawn(
            run_job(
                self.db.clone(),
                Arc::clone(&self.strategy),
                self.progress.clone(),
                job_id.to_string(),
            )
            .instrument(span),
        );
        workers.insert(job_id.to_string(), handle);
    }

    pub async fn get_active_jobs(&self) -> ResetResult<Vec<ResetAudit>> {
        self.db.call(|db| db.active_jobs()).await
    }

    pub async fn get_reset_audit_by_job_id(&self, job_id: &str) -> ResetResult<ResetAudit> {
        let id = job_id.to_string();
        self.db
            .call(move |db| db.get_reset_audit(&id))
            .await?
            .ok_or_else(|| ResetError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Most recent jobs first. `limit` is clamped into `1..=100`.
    pub async fn get_reset_history(&self, limit: i64) -> ResetResult<Vec<ResetAudit>> {
        let limit = clamp_history_limit(limit);
        self.db.call(move |db| db.history(limit)).await
    }

    pub async fn verify_ledger(&self) -> ResetResult<LedgerVerification> {
        self.db.call(|db| db.verify_ledger()).await
    }

    /// Attach to a job's progress.
    ///
    /// Subscribes before reading the ledger: the worker records the terminal
    /// state before publishing it, so either the ledger read sees it or the
    /// receiver does. Jobs without a local channel are followed through the
    /// ledger.
    pub async fn subscribe(&self, job_id: &str) -> ResetResult<ProgressSubscription> {
        let rx = self.progress.subscribe(job_id);
        let audit = self.get_reset_audit_by_job_id(job_id).await?;
        let watch = LedgerWatch::new(self.db.clone(), job_id, self.ledger_poll_interval);
        Ok(match (ProgressEvent::for_terminal(&audit), rx) {
            (Some(terminal), _) => ProgressSubscription::finished(terminal),
            (None, Some(rx)) => ProgressSubscription::live(rx).watch_ledger(watch),
            (None, None) => ProgressSubscription::remote(audit, watch),
        })
    }

    /// Fail every active job whose owner stopped renewing its lease.
    pub async fn recover_abandoned_jobs(&self) -> ResetResult<Vec<ResetAudit>> {
        let recovered = self
            .db
            .call(|db| db.fail_abandoned(INTERRUPTED_MESSAGE))
            .await?;
        for audit in &recovered {
            tracing::warn!(job_id = %audit.job_id, "marked abandoned reset job as failed");
        }
        Ok(recovered)
    }

    /// Wait for the worker of `job_id`, if one is running.
    pub async fn join(&self, job_id: &str) {
        let handle = self.workers.lock().await.remove(job_id);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(job_id, error = %e, "reset worker panicked");
        }
    }

    /// Wait for every running worker. Jobs are never cancelled.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.workers.lock().await.drain().collect();
        for (job_id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %job_id, error = %e, "reset worker panicked");
            }
        }
    }
}

/// Background worker for one job. Holds the job's lease until it finishes.
async fn run_job(
    db: DbHandle,
    strategy: Arc<dyn ClearingStrategy>,
    progress: ProgressBroadcaster,
    job_id: String,
) {
    let every = lease_renewal_interval(db.lease_ttl());
    let heartbeat = tokio::spawn(keep_lease(db.clone(), job_id.clone(), every).in_current_span());
    execute_job(&db, strategy, &progress, &job_id).await;
    heartbeat.abort();
}

/// Renew three times per lease, never faster than every 10ms.
fn lease_renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(10))
}

async fn keep_lease(db: DbHandle, job_id: String, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let id = job_id.clone();
        match db.call(move |db| db.renew_lease(&id)).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("reset job lease no longer held");
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to renew reset job lease"),
        }
    }
}

async fn execute_job(
    db: &DbHandle,
    strategy: Arc<dyn ClearingStrategy>,
    progress: &ProgressBroadcaster,
    job_id: &str,
) {
    let id = job_id.to_string();
    let in_progress = match db.call(move |db| db.mark_in_progress(&id)).await {
        Ok(audit) => audit,
        Err(e) => {
            tracing::error!(error = %e, "failed to mark reset in progress");
            finalize(db, progress, job_id, Err(format!("Failed to start reset: {}", e))).await;
            return;
        }
    };
    progress.publish(job_id, ProgressEvent::Started { audit: in_progress });
    tracing::info!(strategy = strategy.name(), "clearing collections");

    // The strategy holds the connection, so the lease is renewed between
    // collections as well as by the heartbeat.
    let publisher = progress.clone();
    let id = job_id.to_string();
    let result = db
        .call(move |db| {
            strategy.clear(db, &mut |cleared| {
                if let Err(e) = db.renew_lease(&id) {
                    tracing::warn!(job_id = %id, error = %e, "failed to renew reset job lease");
                }
                publisher.publish(&id, ProgressEvent::CollectionCleared(cleared));
            })
        })
        .await;

    let outcome = match result {
        Ok(cleared) => Ok(cleared),
        Err(e) => {
            tracing::warn!(error = %e, "clearing strategy failed");
            Err(e.to_string())
        }
    };
    finalize(db, progress, job_id, outcome).await;
}

/// Record the terminal state, publish it, then close the channel.
async fn finalize(
    db: &DbHandle,
    progress: &ProgressBroadcaster,
    job_id: &str,
    outcome: Result<usize, String>,
) {
    let recorded = match outcome {
        Ok(cleared) => {
            let id = job_id.to_string();
            match db.call(move |db| db.complete(&id, cleared)).await {
                Ok(audit) => Ok(audit),
                Err(e) => {
                    tracing::error!(error = %e, "failed to record completion");
                    record_failure(db, job_id, format!("Failed to record completion: {}", e)).await
                }
            }
        }
        Err(message) => record_failure(db, job_id, message).await,
    };

    match recorded {
        Ok(audit) => {
            tracing::info!(
                status = %audit.status,
                tables_cleared = ?audit.tables_cleared,
                duration_ms = ?audit.duration_ms,
                "factory reset finished"
            );
            if let Some(event) = ProgressEvent::for_terminal(&audit) {
                progress.publish(job_id, event);
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to record terminal reset state"),
    }
    progress.close(job_id);
}

async fn record_failure(db: &DbHandle, job_id: &str, message: String) -> ResetResult<ResetAudit> {
    let id = job_id.to_string();
    db.call(move |db| db.fail(&id, &message)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::db::{ResetDb, ResetResult};
    use crate::reset::models::ResetStatus;
    use crate::reset::strategy::{CollectionCleared, EnumeratedStrategy};
    use futures::StreamExt;

    /// Clears one collection, then fails.
    struct FailingStrategy;

    impl ClearingStrategy for FailingStrategy {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn clear(
            &self,
            db: &ResetDb,
            on_cleared: &mut dyn FnMut(CollectionCleared),
        ) -> ResetResult<usize> {
            let rows = db.conn().execute("DELETE FROM project_skills", [])?;
            on_cleared(CollectionCleared {
                collection: "project_skills".to_string(),
                rows_deleted: rows,
                index: 1,
                total: 2,
            });
            Err(ResetError::Other(anyhow::anyhow!("disk I/O error on projects")))
        }
    }

    /// Reports `steps` collections, sleeping before each one.
    struct SlowStrategy {
        steps: usize,
        pause: Duration,
    }

    impl ClearingStrategy for SlowStrategy {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn clear(
            &self,
            _db: &ResetDb,
            on_cleared: &mut dyn FnMut(CollectionCleared),
        ) -> ResetResult<usize> {
            for index in 1..=self.steps {
                std::thread::sleep(self.pause);
                on_cleared(CollectionCleared {
                    collection: format!("step_{}", index),
                    rows_deleted: 0,
                    index,
                    total: self.steps,
                });
            }
            Ok(self.steps)
        }
    }

    /// Clears nothing.
    struct NoopStrategy;

    impl ClearingStrategy for NoopStrategy {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn clear(&self, _db: &ResetDb, _on: &mut dyn FnMut(CollectionCleared)) -> ResetResult<usize> {
            Ok(0)
        }
    }

    fn seeded_db() -> DbHandle {
        let db = ResetDb::new_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO projects (id, title) VALUES (1, 'folio');
                 INSERT INTO skills (id, name) VALUES (1, 'rust');
                 INSERT INTO project_skills (project_id, skill_id) VALUES (1, 1);
                 INSERT INTO experience (company, role, started_on) VALUES ('acme', 'dev', '2021-01-01');",
            )
            .unwrap();
        DbHandle::new(db)
    }

    fn orchestrator(strategy: Arc<dyn ClearingStrategy>) -> ResetOrchestrator {
        ResetOrchestrator::new(seeded_db(), strategy)
    }

    fn started(outcome: StartOutcome) -> ResetAudit {
        match outcome {
            StartOutcome::Started(audit) => audit,
            StartOutcome::Conflict(active) => panic!("unexpected conflict with {}", active.job_id),
        }
    }

    #[test]
    fn test_clamp_history_limit() {
        assert_eq!(clamp_history_limit(0), 1);
        assert_eq!(clamp_history_limit(-5), 1);
        assert_eq!(clamp_history_limit(20), 20);
        assert_eq!(clamp_history_limit(500), 100);
    }

    #[tokio::test]
    async fn test_start_records_started_row() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let audit = started(orch.start("alice", "10.0.0.1").await.unwrap());
        assert_eq!(audit.status, ResetStatus::Started);
        assert_eq!(audit.started_by, "alice");
        assert_eq!(audit.ip_address, "10.0.0.1");
        orch.join(&audit.job_id).await;
    }

    #[tokio::test]
    async fn test_enumerated_job_completes_with_four_tables() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;

        let audit = orch.get_reset_audit_by_job_id(&job_id).await.unwrap();
        assert_eq!(audit.status, ResetStatus::Completed);
        assert_eq!(audit.tables_cleared, Some(4));
        assert!(audit.duration_ms.unwrap() > 0);
        assert!(audit.finished_at.is_some());
        assert!(audit.error_message.is_none());

        let remaining: i64 = orch
            .db()
            .call(|db| {
                Ok(db.conn().query_row(
                    "SELECT (SELECT COUNT(*) FROM projects) + (SELECT COUNT(*) FROM skills)
                          + (SELECT COUNT(*) FROM project_skills) + (SELECT COUNT(*) FROM experience)",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_strategy_failure_marks_job_failed() {
        let orch = orchestrator(Arc::new(FailingStrategy));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;

        let audit = orch.get_reset_audit_by_job_id(&job_id).await.unwrap();
        assert_eq!(audit.status, ResetStatus::Failed);
        assert!(audit.error_message.unwrap().contains("disk I/O error"));
        assert!(audit.finished_at.is_some());
        assert!(audit.tables_cleared.is_none());
        assert!(orch.get_active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_collections_still_completes() {
        let orch = orchestrator(Arc::new(NoopStrategy));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;

        let audit = orch.get_reset_audit_by_job_id(&job_id).await.unwrap();
        assert_eq!(audit.status, ResetStatus::Completed);
        assert_eq!(audit.tables_cleared, Some(0));
    }

    #[tokio::test]
    async fn test_conflict_returns_active_job_identity() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let active_id = orch
            .db()
            .call(|db| {
                let audit = match db.begin_reset("held", "admin", "127.0.0.1")? {
                    StartOutcome::Started(a) => a,
                    StartOutcome::Conflict(a) => a,
                };
                db.mark_in_progress(&audit.job_id)?;
                Ok(audit.job_id)
            })
            .await
            .unwrap();

        for _ in 0..3 {
            match orch.start("admin", "10.0.0.9").await.unwrap() {
                StartOutcome::Conflict(active) => {
                    assert_eq!(active.job_id, active_id);
                    assert_eq!(active.status, ResetStatus::InProgress);
                }
                StartOutcome::Started(a) => panic!("started {} while a job was active", a.job_id),
            }
        }
        assert_eq!(orch.get_reset_history(100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_never_overlap() {
        let orch = Arc::new(orchestrator(Arc::new(EnumeratedStrategy::with_defaults())));
        let starts = (0..16).map(|i| {
            let orch = Arc::clone(&orch);
            async move { orch.start("admin", &format!("10.0.0.{}", i)).await.unwrap() }
        });
        let outcomes = futures::future::join_all(starts).await;
        orch.shutdown().await;

        let started_ids: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                StartOutcome::Started(a) => Some(a.job_id.clone()),
                StartOutcome::Conflict(_) => None,
            })
            .collect();
        assert!(!started_ids.is_empty());
        for outcome in &outcomes {
            if let StartOutcome::Conflict(active) = outcome {
                assert!(started_ids.contains(&active.job_id));
            }
        }

        let history = orch.get_reset_history(100).await.unwrap();
        assert_eq!(history.len(), started_ids.len());
        // Each job finished before the next one was admitted.
        let mut by_start = history.clone();
        by_start.sort_by_key(|a| a.started_at);
        for pair in by_start.windows(2) {
            assert!(pair[0].finished_at.unwrap() <= pair[1].started_at);
        }
        assert!(orch.get_active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_never_changes() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;
        let first = orch.get_reset_audit_by_job_id(&job_id).await.unwrap();

        let second_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&second_id).await;
        orch.recover_abandoned_jobs().await.unwrap();

        let id = job_id.clone();
        let err = orch.db().call(move |db| db.fail(&id, "late")).await.unwrap_err();
        assert!(matches!(err, ResetError::InvalidTransition { .. }));
        assert_eq!(orch.get_reset_audit_by_job_id(&job_id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_history_bounds() {
        let orch = orchestrator(Arc::new(NoopStrategy));
        for _ in 0..3 {
            let id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
            orch.join(&id).await;
        }
        assert_eq!(orch.get_reset_history(0).await.unwrap().len(), 1);
        let all = orch.get_reset_history(500).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].started_at >= w[1].started_at));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let orch = orchestrator(Arc::new(NoopStrategy));
        let err = orch.get_reset_audit_by_job_id("missing").await.unwrap_err();
        assert!(matches!(err, ResetError::JobNotFound { .. }));
        assert!(matches!(
            orch.subscribe("missing").await,
            Err(ResetError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_event_only() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;

        let events: Vec<_> = orch
            .subscribe(&job_id)
            .await
            .unwrap()
            .into_stream(Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProgressEvent::Completed { audit } => assert_eq!(audit.tables_cleared, Some(4)),
            other => panic!("expected completed event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_stream_ends_with_terminal_event() {
        let orch = orchestrator(Arc::new(EnumeratedStrategy::with_defaults()));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        let subscription = orch.subscribe(&job_id).await.unwrap();

        let events: Vec<_> = subscription
            .into_stream(Duration::from_secs(5))
            .collect()
            .await;
        orch.join(&job_id).await;

        let last = events.last().expect("stream should carry the terminal event");
        assert_eq!(last.event_name(), "completed");
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    /// A handle whose leases expire as soon as they are written, holding one
    /// active job that nobody renews.
    async fn db_with_expired_job() -> DbHandle {
        let db = DbHandle::new(
            ResetDb::new_in_memory()
                .unwrap()
                .with_lease_ttl(Duration::ZERO),
        );
        db.call(|db| db.begin_reset("stale", "admin", "127.0.0.1").map(|_| ()))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_recover_abandoned_jobs_unblocks_new_starts() {
        let orch = ResetOrchestrator::new(db_with_expired_job().await, Arc::new(NoopStrategy));

        let recovered = orch.recover_abandoned_jobs().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;
        assert!(orch.verify_ledger().await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_recover_leaves_jobs_with_live_lease() {
        let orch = orchestrator(Arc::new(NoopStrategy));
        orch.db()
            .call(|db| db.begin_reset("held", "admin", "127.0.0.1").map(|_| ()))
            .await
            .unwrap();
        assert!(orch.recover_abandoned_jobs().await.unwrap().is_empty());
        assert_eq!(orch.get_active_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_reclaims_expired_job() {
        let orch = ResetOrchestrator::new(db_with_expired_job().await, Arc::new(NoopStrategy));
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;
        orch.join(&job_id).await;

        let stale = orch.get_reset_audit_by_job_id("stale").await.unwrap();
        assert_eq!(stale.status, ResetStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[tokio::test]
    async fn test_start_without_recovery_reports_expired_job() {
        let orch = ResetOrchestrator::new(db_with_expired_job().await, Arc::new(NoopStrategy))
            .with_abandoned_recovery(false);
        match orch.start("admin", "127.0.0.1").await.unwrap() {
            StartOutcome::Conflict(active) => assert_eq!(active.job_id, "stale"),
            StartOutcome::Started(a) => panic!("started {} over an active job", a.job_id),
        }
    }

    #[tokio::test]
    async fn test_running_job_keeps_lease_against_other_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.db");
        let db = ResetDb::new(&path)
            .unwrap()
            .with_lease_ttl(Duration::from_millis(300));
        let orch = ResetOrchestrator::new(
            DbHandle::new(db),
            Arc::new(SlowStrategy {
                steps: 6,
                pause: Duration::from_millis(100),
            }),
        );
        let job_id = started(orch.start("admin", "127.0.0.1").await.unwrap()).job_id;

        // Longer than one lease: only renewals keep the job owned.
        tokio::time::sleep(Duration::from_millis(450)).await;
        let other = ResetDb::new(&path).unwrap();
        assert!(other.fail_abandoned(INTERRUPTED_MESSAGE).unwrap().is_empty());
        assert!(matches!(
            other.begin_reset("intruder", "admin", "10.0.0.2").unwrap(),
            StartOutcome::Conflict(_)
        ));

        orch.join(&job_id).await;
        let audit = orch.get_reset_audit_by_job_id(&job_id).await.unwrap();
        assert_eq!(audit.status, ResetStatus::Completed);
        assert_eq!(audit.tables_cleared, Some(6));
    }

    #[tokio::test]
    async fn test_subscriber_to_foreign_job_sees_terminal_event() {
        let orch = orchestrator(Arc::new(NoopStrategy))
            .with_ledger_poll_interval(Duration::from_millis(10));
        orch.db()
            .call(|db| {
                db.begin_reset("foreign", "admin", "10.0.0.3")?;
                db.mark_in_progress("foreign").map(|_| ())
            })
            .await
            .unwrap();

        let subscription = orch.subscribe("foreign").await.unwrap();
        let db = orch.db().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            db.call(|db| db.complete("foreign", 4)).await.unwrap();
        });

        let started = std::time::Instant::now();
        let events: Vec<_> = subscription
            .into_stream(Duration::from_secs(2))
            .collect()
            .await;
        let names: Vec<_> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(names, vec!["snapshot", "completed"]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_lease_renewal_interval() {
        assert_eq!(lease_renewal_interval(Duration::from_secs(30)), Duration::from_secs(10));
        assert_eq!(lease_renewal_interval(Duration::ZERO), Duration::from_millis(10));
    }
}
