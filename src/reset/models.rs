use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a reset job.
///
/// `STARTED → IN_PROGRESS → {COMPLETED | FAILED}`. Terminal states never
/// transition further.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl ResetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ResetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ResetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid reset status: {}", s)),
        }
    }
}

/// Validate that a reset status transition is allowed.
///
/// `STARTED → FAILED` is permitted for jobs whose worker never got going
/// (startup recovery, or a failure marking the job in progress).
pub fn is_valid_transition(from: &ResetStatus, to: &ResetStatus) -> bool {
    matches!(
        (from, to),
        (ResetStatus::Started, ResetStatus::InProgress)
            | (ResetStatus::Started, ResetStatus::Failed)
            | (ResetStatus::InProgress, ResetStatus::Completed)
            | (ResetStatus::InProgress, ResetStatus::Failed)
    )
}

/// One row of the audit ledger: a single reset attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResetAudit {
    pub job_id: String,
    pub status: ResetStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub started_by: String,
    pub ip_address: String,
    pub tables_cleared: Option<i64>,
    pub error_message: Option<String>,
}

impl ResetAudit {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Result of trying to start a reset job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A fresh job was recorded and handed to a worker.
    Started(ResetAudit),
    /// Another job is already active; nothing was recorded.
    Conflict(ResetAudit),
}

/// Response body for the trigger endpoint (both 202 and 409).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResetTriggerResponse {
    pub job_id: String,
    pub message: String,
    pub stream_url: String,
}

impl ResetTriggerResponse {
    pub fn accepted(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            message: "Factory reset started".to_string(),
            stream_url: stream_url(job_id),
        }
    }

    pub fn conflict(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            message: "A factory reset is already in progress".to_string(),
            stream_url: stream_url(job_id),
        }
    }
}

pub fn stream_url(job_id: &str) -> String {
    format!("/api/admin/reset/{}/stream", job_id)
}

/// Outcome of walking the tamper-evident event chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerVerification {
    pub valid: bool,
    pub events_checked: u64,
    pub jobs_checked: u64,
    pub head_hash: Option<String>,
    pub broken_at_seq: Option<i64>,
    pub reason: Option<String>,
}

/// Storage representation of a timestamp. Fixed width so that lexical order
/// matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Whole milliseconds between two instants, rounded up.
pub fn duration_ms_between(start: &DateTime<Utc>, end: &DateTime<Utc>) -> i64 {
    let micros = (*end - *start).num_microseconds().unwrap_or(i64::MAX).max(0);
    (micros + 999) / 1000
}
