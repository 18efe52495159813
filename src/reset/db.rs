use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params};

use super::chain::{ChainEvent, GENESIS_HASH, verify_links};
use super::models::*;
use crate::errors::ResetError;

pub type ResetResult<T> = std::result::Result<T, ResetError>;

/// The audit ledger table.
pub const LEDGER_TABLE: &str = "reset_audit";
/// Hash-chained history of every ledger write.
pub const LEDGER_EVENTS_TABLE: &str = "reset_audit_events";
/// Applied schema migrations.
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

/// Tables no clearing strategy may ever empty.
pub const PROTECTED_TABLES: &[&str] = &[LEDGER_TABLE, LEDGER_EVENTS_TABLE, MIGRATIONS_TABLE];

/// How long an active job stays owned by its process without a renewal.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

pub fn is_protected_table(name: &str) -> bool {
    PROTECTED_TABLES.iter().any(|t| t.eq_ignore_ascii_case(name)) || is_system_table(name)
}

pub fn is_system_table(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with("sqlite_")
}

/// Async-safe handle to the reset database.
///
/// Wraps `ResetDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ResetDb>>,
    lease_ttl: Duration,
}

impl DbHandle {
    pub fn new(db: ResetDb) -> Self {
        let lease_ttl = db.lease_ttl();
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
            lease_ttl,
        }
    }

    /// Lease length the wrapped connection writes for the jobs it owns.
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> ResetResult<R>
    where
        F: FnOnce(&ResetDb) -> ResetResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| ResetError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Ordered, idempotent schema migrations. Each runs once and is recorded in
/// `schema_migrations`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "portfolio_tables",
        "
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            repo_url TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS skills (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL DEFAULT '',
            proficiency INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS project_skills (
            project_id INTEGER NOT NULL REFERENCES projects(id),
            skill_id INTEGER NOT NULL REFERENCES skills(id),
            PRIMARY KEY (project_id, skill_id)
        );

        CREATE TABLE IF NOT EXISTS experience (
            id INTEGER PRIMARY KEY,
            company TEXT NOT NULL,
            role TEXT NOT NULL,
            started_on TEXT NOT NULL,
            ended_on TEXT,
            summary TEXT NOT NULL DEFAULT ''
        );
        ",
    ),
    (
        2,
        "reset_ledger",
        "
        CREATE TABLE IF NOT EXISTS reset_audit (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL
                CHECK (status IN ('STARTED', 'IN_PROGRESS', 'COMPLETED', 'FAILED')),
            started_at TEXT NOT NULL,
            finished_at TEXT,
            duration_ms INTEGER,
            started_by TEXT NOT NULL,
            ip_address TEXT NOT NULL,
            tables_cleared INTEGER,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_reset_audit_started_at
            ON reset_audit(started_at DESC);

        -- At most one active job: every active row maps to the same index key.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reset_audit_single_active
            ON reset_audit((status IN ('STARTED', 'IN_PROGRESS')))
            WHERE status IN ('STARTED', 'IN_PROGRESS');

        CREATE TABLE IF NOT EXISTS reset_audit_events (
            seq INTEGER PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES reset_audit(job_id),
            status TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_reset_audit_events_job
            ON reset_audit_events(job_id, seq);

        CREATE TRIGGER IF NOT EXISTS reset_audit_no_delete
        BEFORE DELETE ON reset_audit
        BEGIN
            SELECT RAISE(ABORT, 'reset_audit rows cannot be deleted');
        END;

        CREATE TRIGGER IF NOT EXISTS reset_audit_terminal_immutable
        BEFORE UPDATE ON reset_audit
        WHEN OLD.status IN ('COMPLETED', 'FAILED')
        BEGIN
            SELECT RAISE(ABORT, 'terminal reset_audit rows are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS reset_audit_forward_only
        BEFORE UPDATE OF status, job_id ON reset_audit
        WHEN NEW.job_id <> OLD.job_id
            OR NOT (
                NEW.status = OLD.status
                OR (OLD.status = 'STARTED' AND NEW.status IN ('IN_PROGRESS', 'FAILED'))
                OR (OLD.status = 'IN_PROGRESS' AND NEW.status IN ('COMPLETED', 'FAILED'))
            )
        BEGIN
            SELECT RAISE(ABORT, 'illegal reset_audit transition');
        END;

        CREATE TRIGGER IF NOT EXISTS reset_audit_events_no_update
        BEFORE UPDATE ON reset_audit_events
        BEGIN
            SELECT RAISE(ABORT, 'reset_audit_events is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS reset_audit_events_no_delete
        BEFORE DELETE ON reset_audit_events
        BEGIN
            SELECT RAISE(ABORT, 'reset_audit_events is append-only');
        END;
        ",
    ),
    (
        3,
        "reset_job_leases",
        "
        ALTER TABLE reset_audit ADD COLUMN owner_id TEXT;
        ALTER TABLE reset_audit ADD COLUMN lease_expires_at TEXT;
        ",
    ),
];

const AUDIT_COLUMNS: &str = "job_id, status, started_at, finished_at, duration_ms, started_by, ip_address, tables_cleared, error_message";

/// One connection to the folio database.
///
/// Each connection has its own owner id. Jobs it starts carry that id and a
/// lease that the owner keeps pushing forward while the job runs; recovery
/// only touches jobs whose lease has run out.
pub struct ResetDb {
    conn: Connection,
    owner_id: String,
    lease_ttl: Duration,
}

impl ResetDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> ResetResult<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .context("Failed to enable WAL journal mode")?;
        let db = Self::with_connection(conn);
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> ResetResult<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self::with_connection(conn);
        db.init()?;
        Ok(db)
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            owner_id: uuid::Uuid::new_v4().to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lease_until(&self) -> String {
        let ttl = TimeDelta::from_std(self.lease_ttl).unwrap_or(TimeDelta::hours(1));
        format_timestamp(&(now() + ttl))
    }

    fn init(&self) -> ResetResult<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> ResetResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
                );",
            )
            .context("Failed to create schema_migrations table")?;

        for (version, name, sql) in MIGRATIONS {
            let applied: Option<i64> = self
                .conn
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![version],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to read schema_migrations")?;
            if applied.is_some() {
                continue;
            }

            let tx = self
                .conn
                .unchecked_transaction()
                .context("Failed to begin migration transaction")?;
            tx.execute_batch(sql)
                .with_context(|| format!("Migration {} ({}) failed", version, name))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                params![version, name],
            )
            .context("Failed to record migration")?;
            tx.commit().context("Failed to commit migration")?;
            tracing::debug!(version, name, "applied migration");
        }
        Ok(())
    }

    /// Raw connection, for clearing strategies.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Ledger writes ─────────────────────────────────────────────────

    /// Record a new `STARTED` job unless one is already active.
    ///
    /// The check and the insert run in one `IMMEDIATE` transaction, so no
    /// other connection can interleave a write between them. The partial
    /// unique index backs this up for writers that skip the check.
    pub fn begin_reset(
        &self,
        job_id: &str,
        started_by: &str,
        ip_address: &str,
    ) -> ResetResult<StartOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin reset transaction")?;

        if let Some(active) = self.latest_active()? {
            return Ok(StartOutcome::Conflict(active));
        }

        let audit = ResetAudit {
            job_id: job_id.to_string(),
            status: ResetStatus::Started,
            started_at: now(),
            finished_at: None,
            duration_ms: None,
            started_by: started_by.to_string(),
            ip_address: ip_address.to_string(),
            tables_cleared: None,
            error_message: None,
        };

        let inserted = self.conn.execute(
            "INSERT INTO reset_audit
                 (job_id, status, started_at, started_by, ip_address, owner_id, lease_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                audit.job_id,
                audit.status.as_str(),
                format_timestamp(&audit.started_at),
                audit.started_by,
                audit.ip_address,
                self.owner_id,
                self.lease_until(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                drop(tx);
                return match self.latest_active()? {
                    Some(active) => Ok(StartOutcome::Conflict(active)),
                    None => Err(ResetError::Other(anyhow!(
                        "reset_audit insert for {} violated a constraint with no active job",
                        job_id
                    ))),
                };
            }
            Err(e) => return Err(e.into()),
        }

        self.append_event(&audit)?;
        tx.commit().context("Failed to commit reset start")?;
        Ok(StartOutcome::Started(audit))
    }

    /// `STARTED → IN_PROGRESS`.
    pub fn mark_in_progress(&self, job_id: &str) -> ResetResult<ResetAudit> {
        self.transition(job_id, ResetStatus::InProgress, |_| {})
    }

    /// `IN_PROGRESS → COMPLETED`, recording how many collections were emptied.
    pub fn complete(&self, job_id: &str, tables_cleared: usize) -> ResetResult<ResetAudit> {
        self.transition(job_id, ResetStatus::Completed, |audit| {
            finish(audit);
            audit.tables_cleared = Some(tables_cleared as i64);
        })
    }

    /// `{STARTED | IN_PROGRESS} → FAILED`, recording the error text.
    pub fn fail(&self, job_id: &str, error_message: &str) -> ResetResult<ResetAudit> {
        self.transition(job_id, ResetStatus::Failed, |audit| {
            finish(audit);
            audit.error_message = Some(error_message.to_string());
        })
    }

    /// Fail every active job whose lease has run out. Jobs whose owner is
    /// still renewing their lease are left alone, whichever process owns them.
    pub fn fail_abandoned(&self, error_message: &str) -> ResetResult<Vec<ResetAudit>> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin recovery transaction")?;

        let sql = format!(
            "SELECT {} FROM reset_audit
             WHERE status IN ('STARTED', 'IN_PROGRESS')
               AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
             ORDER BY started_at ASC, rowid ASC",
            AUDIT_COLUMNS
        );
        let expired = self.query_audits(&sql, params![format_timestamp(&now())])?;

        let mut failed = Vec::with_capacity(expired.len());
        for audit in expired {
            failed.push(self.apply_transition(audit, ResetStatus::Failed, |audit| {
                finish(audit);
                audit.error_message = Some(error_message.to_string());
            })?);
        }
        tx.commit().context("Failed to commit recovery")?;
        Ok(failed)
    }

    /// Push the lease of a job this connection owns forward. Returns `false`
    /// once the job is terminal or belongs to another owner.
    pub fn renew_lease(&self, job_id: &str) -> ResetResult<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE reset_audit SET lease_expires_at = ?1
                 WHERE job_id = ?2 AND owner_id = ?3 AND status IN ('STARTED', 'IN_PROGRESS')",
                params![self.lease_until(), job_id, self.owner_id],
            )
            .context("Failed to renew reset lease")?;
        Ok(changed == 1)
    }

    /// Compare-and-set status update plus chain append, in one transaction.
    fn transition<F>(&self, job_id: &str, to: ResetStatus, apply: F) -> ResetResult<ResetAudit>
    where
        F: FnOnce(&mut ResetAudit),
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin transition transaction")?;

        let audit = self
            .get_reset_audit(job_id)?
            .ok_or_else(|| ResetError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let audit = self.apply_transition(audit, to, apply)?;
        tx.commit().context("Failed to commit transition")?;
        Ok(audit)
    }

    /// Move `audit` to `to` and append the event. Callers hold a write
    /// transaction. Active states renew the lease; terminal states drop it.
    fn apply_transition<F>(&self, mut audit: ResetAudit, to: ResetStatus, apply: F) -> ResetResult<ResetAudit>
    where
        F: FnOnce(&mut ResetAudit),
    {
        let from = audit.status;
        if !is_valid_transition(&from, &to) {
            return Err(ResetError::InvalidTransition {
                job_id: audit.job_id,
                from,
                to,
            });
        }

        audit.status = to;
        apply(&mut audit);
        let lease = to.is_active().then(|| self.lease_until());

        let changed = self
            .conn
            .execute(
                "UPDATE reset_audit
                 SET status = ?1, finished_at = ?2, duration_ms = ?3, tables_cleared = ?4,
                     error_message = ?5, lease_expires_at = ?6
                 WHERE job_id = ?7 AND status = ?8",
                params![
                    audit.status.as_str(),
                    audit.finished_at.as_ref().map(format_timestamp),
                    audit.duration_ms,
                    audit.tables_cleared,
                    audit.error_message,
                    lease,
                    audit.job_id,
                    from.as_str(),
                ],
            )
            .context("Failed to update reset_audit")?;
        if changed != 1 {
            return Err(ResetError::InvalidTransition {
                job_id: audit.job_id,
                from,
                to,
            });
        }

        self.append_event(&audit)?;
        Ok(audit)
    }

    /// Append one hash-chained event. Callers hold a write transaction.
    fn append_event(&self, audit: &ResetAudit) -> ResetResult<()> {
        let head: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT seq, hash FROM reset_audit_events ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read ledger chain head")?;
        let (seq, prev_hash) = match head {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let event = ChainEvent {
            seq,
            job_id: audit.job_id.clone(),
            status: audit.status.as_str().to_string(),
            recorded_at: format_timestamp(&Utc::now()),
            snapshot: serde_json::to_string(audit).context("Failed to serialize ledger snapshot")?,
            prev_hash,
        };
        let hash = event.compute_hash();
        self.conn
            .execute(
                "INSERT INTO reset_audit_events (seq, job_id, status, recorded_at, snapshot, prev_hash, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.seq,
                    event.job_id,
                    event.status,
                    event.recorded_at,
                    event.snapshot,
                    event.prev_hash,
                    hash,
                ],
            )
            .context("Failed to append ledger event")?;
        Ok(())
    }

    // ── Ledger reads ──────────────────────────────────────────────────

    pub fn get_reset_audit(&self, job_id: &str) -> ResetResult<Option<ResetAudit>> {
        let sql = format!("SELECT {} FROM reset_audit WHERE job_id = ?1", AUDIT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![job_id], AuditRow::from_row)
            .optional()
            .context("Failed to query reset_audit")?;
        row.map(AuditRow::into_audit).transpose()
    }

    /// All non-terminal jobs, most recent first.
    pub fn active_jobs(&self) -> ResetResult<Vec<ResetAudit>> {
        let sql = format!(
            "SELECT {} FROM reset_audit WHERE status IN ('STARTED', 'IN_PROGRESS')
             ORDER BY started_at DESC, rowid DESC",
            AUDIT_COLUMNS
        );
        self.query_audits(&sql, [])
    }

    /// The most recent `limit` jobs by `started_at`, newest first.
    pub fn history(&self, limit: u32) -> ResetResult<Vec<ResetAudit>> {
        let sql = format!(
            "SELECT {} FROM reset_audit ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            AUDIT_COLUMNS
        );
        self.query_audits(&sql, params![limit])
    }

    fn latest_active(&self) -> ResetResult<Option<ResetAudit>> {
        Ok(self.active_jobs()?.into_iter().next())
    }

    fn query_audits<P: rusqlite::Params>(&self, sql: &str, params: P) -> ResetResult<Vec<ResetAudit>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare reset_audit query")?;
        let rows = stmt
            .query_map(params, AuditRow::from_row)
            .context("Failed to query reset_audit")?;
        let mut audits = Vec::new();
        for row in rows {
            let row = row.context("Failed to read reset_audit row")?;
            audits.push(row.into_audit()?);
        }
        Ok(audits)
    }

    // ── Verification ──────────────────────────────────────────────────

    /// Recompute the event chain and cross-check it against `reset_audit`.
    pub fn verify_ledger(&self) -> ResetResult<LedgerVerification> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, job_id, status, recorded_at, snapshot, prev_hash, hash
                 FROM reset_audit_events ORDER BY seq ASC",
            )
            .context("Failed to prepare ledger event query")?;
        let events: Vec<(ChainEvent, String)> = stmt
            .query_map([], |row| {
                Ok((
                    ChainEvent {
                        seq: row.get(0)?,
                        job_id: row.get(1)?,
                        status: row.get(2)?,
                        recorded_at: row.get(3)?,
                        snapshot: row.get(4)?,
                        prev_hash: row.get(5)?,
                    },
                    row.get(6)?,
                ))
            })
            .context("Failed to query ledger events")?
            .collect::<Result<_, _>>()
            .context("Failed to read ledger event")?;

        let jobs = self.query_audits(
            &format!("SELECT {} FROM reset_audit ORDER BY rowid ASC", AUDIT_COLUMNS),
            [],
        )?;

        let mut report = LedgerVerification {
            valid: true,
            events_checked: events.len() as u64,
            jobs_checked: jobs.len() as u64,
            head_hash: None,
            broken_at_seq: None,
            reason: None,
        };
        let broken = |mut report: LedgerVerification, seq: Option<i64>, reason: String| {
            report.valid = false;
            report.broken_at_seq = seq;
            report.reason = Some(reason);
            report
        };

        match verify_links(events.iter().map(|(e, h)| (e, h.as_str()))) {
            Ok(head) => report.head_hash = head,
            Err(b) => return Ok(broken(report, Some(b.seq), b.reason)),
        }

        let mut latest: HashMap<&str, &ChainEvent> = HashMap::new();
        for (event, _) in &events {
            latest.insert(event.job_id.as_str(), event);
        }

        for job in &jobs {
            let Some(event) = latest.remove(job.job_id.as_str()) else {
                let reason = format!("job {} has no ledger events", job.job_id);
                return Ok(broken(report, None, reason));
            };
            let snapshot: ResetAudit = match serde_json::from_str(&event.snapshot) {
                Ok(s) => s,
                Err(e) => {
                    let reason = format!("snapshot for job {} is unreadable: {}", job.job_id, e);
                    return Ok(broken(report, Some(event.seq), reason));
                }
            };
            if &snapshot != job {
                let reason = format!("job {} differs from its last ledger event", job.job_id);
                return Ok(broken(report, Some(event.seq), reason));
            }
        }

        if let Some((job_id, event)) = latest.into_iter().min_by_key(|(_, e)| e.seq) {
            let reason = format!("job {} is missing from {}", job_id, LEDGER_TABLE);
            return Ok(broken(report, Some(event.seq), reason));
        }

        Ok(report)
    }
}

/// Current time at the precision the ledger stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn finish(audit: &mut ResetAudit) {
    let finished_at = now();
    audit.duration_ms = Some(duration_ms_between(&audit.started_at, &finished_at));
    audit.finished_at = Some(finished_at);
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for reading `reset_audit` before converting the
/// status and timestamp strings into typed values.
struct AuditRow {
    job_id: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
    started_by: String,
    ip_address: String,
    tables_cleared: Option<i64>,
    error_message: Option<String>,
}

impl AuditRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            status: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            duration_ms: row.get(4)?,
            started_by: row.get(5)?,
            ip_address: row.get(6)?,
            tables_cleared: row.get(7)?,
            error_message: row.get(8)?,
        })
    }

    fn into_audit(self) -> ResetResult<ResetAudit> {
        let status = ResetStatus::from_str(&self.status)
            .map_err(|e| anyhow!(e))
            .context("Failed to parse reset status")?;
        let started_at =
            parse_timestamp(&self.started_at).context("Failed to parse started_at")?;
        let finished_at = self
            .finished_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse finished_at")?;
        Ok(ResetAudit {
            job_id: self.job_id,
            status,
            started_at,
            finished_at,
            duration_ms: self.duration_ms,
            started_by: self.started_by,
            ip_address: self.ip_address,
            tables_cleared: self.tables_cleared,
            error_message: self.error_message,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
