//! Audit command implementation

use crate::error::Result;
use crate::meta::{AuditCount, AuditRecord, MetaDb};
use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    /// Restrict to one run; defaults to the most recent runs
    pub run_id: Option<String>,
    pub limit: i64,
}

/// Audit entries with a per-kind summary
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub run_id: Option<String>,
    pub summary: Vec<AuditCount>,
    pub entries: Vec<AuditRecord>,
}

/// List audit entries, newest first
pub async fn cmd_audit(db: &MetaDb, options: AuditOptions) -> Result<AuditReport> {
    let entries = db
        .list_audit(options.run_id.as_deref(), options.limit.max(1))
        .await?;
    let summary = match &options.run_id {
        Some(run_id) => db.audit_summary(run_id).await?,
        None => Vec::new(),
    };

    Ok(AuditReport {
        run_id: options.run_id,
        summary,
        entries,
    })
}

/// Print audit report to console
pub fn print_audit(report: &AuditReport) {
    if let Some(run_id) = &report.run_id {
        println!("\n🔎 Audit for run {}\n", run_id);
    } else {
        println!("\n🔎 Recent audit entries\n");
    }

    if !report.summary.is_empty() {
        println!("{:<10} {:<18} {:>6}", "STAGE", "KIND", "COUNT");
        println!("{}", "-".repeat(36));
        for count in &report.summary {
            println!("{:<10} {:<18} {:>6}", count.stage, count.kind, count.count);
        }
        println!();
    }

    if report.entries.is_empty() {
        println!("Nothing recorded.");
        return;
    }

    for entry in &report.entries {
        println!(
            "{} [{}/{}] {}",
            entry.created_at, entry.stage, entry.kind, entry.entity_id
        );
        println!("    {}", entry.detail);
    }
}
