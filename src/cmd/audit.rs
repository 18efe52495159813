//! Audit ledger inspection commands: `folio audit ...`.

use anyhow::{Context, Result, bail};

use folio::config::FolioConfig;
use folio::reset::db::ResetDb;
use folio::reset::models::{ResetAudit, format_timestamp};
use folio::reset::orchestrator::clamp_history_limit;

use super::super::AuditCommands;

pub fn cmd_audit(config: &FolioConfig, command: &AuditCommands) -> Result<()> {
    let path = &config.database.path;
    if !path.exists() {
        bail!(
            "No database found at {}. Run 'folio init-db' first.",
            path.display()
        );
    }
    let db = ResetDb::new(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;

    match command {
        AuditCommands::History { limit } => {
            let history = db.history(clamp_history_limit(*limit))?;
            if history.is_empty() {
                println!("No reset jobs recorded.");
                return Ok(());
            }
            print_table(&history);
        }
        AuditCommands::Show { job_id } => {
            let audit = db
                .get_reset_audit(job_id)?
                .with_context(|| format!("Reset job {} not found", job_id))?;
            println!("{}", serde_json::to_string_pretty(&audit)?);
        }
        AuditCommands::Active => {
            let active = db.active_jobs()?;
            if active.is_empty() {
                println!("No active reset job.");
                return Ok(());
            }
            print_table(&active);
        }
        AuditCommands::Verify => {
            let report = db.verify_ledger()?;
            if !report.valid {
                bail!(
                    "Ledger verification FAILED at seq {}: {}",
                    report
                        .broken_at_seq
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    report.reason.unwrap_or_default()
                );
            }
            println!(
                "Ledger OK: {} events, {} jobs",
                report.events_checked, report.jobs_checked
            );
            if let Some(head) = report.head_hash {
                println!("Head hash: {}", head);
            }
        }
    }
    Ok(())
}

fn print_table(audits: &[ResetAudit]) {
    println!(
        "{:<36} {:<11} {:<27} {:>9} {:>6}  {}",
        "JOB ID", "STATUS", "STARTED AT", "DURATION", "TABLES", "BY"
    );
    for audit in audits {
        let duration = audit
            .duration_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let tables = audit
            .tables_cleared
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36} {:<11} {:<27} {:>9} {:>6}  {}@{}",
            audit.job_id,
            audit.status,
            format_timestamp(&audit.started_at),
            duration,
            tables,
            audit.started_by,
            audit.ip_address
        );
        if let Some(err) = &audit.error_message {
            println!("    error: {}", err);
        }
    }
}
