//! Metadata storage using SQLite
//!
//! This module handles all local bookkeeping:
//! - Extraction runs (roots, counters, how the run ended)
//! - Transformation runs (row counts per table)
//! - The audit log of skipped, dropped and flagged entities
//! - Frontiers of interrupted walks, so the next extraction resumes

mod schema;

pub use schema::*;

use crate::audit::AuditEntry;
use crate::config::Config;
use crate::crawl::Frontier;
use crate::error::{Error, Result};
use crate::models::EntityRef;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    /// Stopped on an exhausted request budget; resumable
    Paused,
    /// Stopped by the operator; resumable
    Interrupted,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Interrupted => write!(f, "interrupted"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "paused" => Ok(RunStatus::Paused),
            "interrupted" => Ok(RunStatus::Interrupted),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// Counters of an extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionCounts {
    pub matches_seen: u64,
    pub documents_saved: u64,
    pub documents_skipped: u64,
    pub failures: u64,
    pub requests: u64,
}

/// Counters of a transformation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformCounts {
    pub documents: u64,
    pub parse_failures: u64,
    pub matches: u64,
    pub team_rows: u64,
    pub derived_team_rows: u64,
    pub player_rows: u64,
    pub rejected_rows: u64,
}

/// A recorded extraction run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub id: String,
    pub roots_json: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub matches_seen: i64,
    pub documents_saved: i64,
    pub documents_skipped: i64,
    pub failures: i64,
    pub requests: i64,
    pub abort_reason: Option<String>,
}

/// A recorded transformation run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransformRun {
    pub id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub documents: i64,
    pub parse_failures: i64,
    pub matches: i64,
    pub team_rows: i64,
    pub derived_team_rows: i64,
    pub player_rows: i64,
    pub rejected_rows: i64,
}

/// A stored audit entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub run_id: String,
    pub stage: String,
    pub entity_id: String,
    pub kind: String,
    pub detail: String,
    pub created_at: String,
}

/// Audit entries counted by stage and kind
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditCount {
    pub stage: String,
    pub kind: String,
    pub count: i64,
}

/// A persisted walk frontier
#[derive(Debug, Clone, Serialize)]
pub struct SavedFrontier {
    pub roots_key: String,
    pub updated_at: String,
    pub frontier: Frontier,
}

/// Stable key of a root set, independent of root order
pub fn frontier_key(roots: &[EntityRef]) -> String {
    let mut parts: Vec<String> = roots
        .iter()
        .map(|r| format!("{}:{}", r.kind, r.id))
        .collect();
    parts.sort();
    parts.dedup();
    blake3::hash(parts.join("\n").as_bytes()).to_hex().to_string()
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        let db_path = &config.paths.db_file;

        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='extraction_runs'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    // ===== Extraction Runs =====

    /// Record the start of an extraction run and return its id
    pub async fn start_extraction_run(&self, roots: &[EntityRef]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let roots_json = serde_json::to_string(roots)?;
        sqlx::query(
            r#"
            INSERT INTO extraction_runs (id, roots_json, started_at, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&roots_json)
        .bind(Utc::now().to_rfc3339())
        .bind(RunStatus::Running.to_string())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Record how an extraction run ended
    pub async fn complete_extraction_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: &ExtractionCounts,
        abort_reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE extraction_runs
            SET completed_at = ?, status = ?, matches_seen = ?, documents_saved = ?,
                documents_skipped = ?, failures = ?, requests = ?, abort_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(counts.matches_seen as i64)
        .bind(counts.documents_saved as i64)
        .bind(counts.documents_skipped as i64)
        .bind(counts.failures as i64)
        .bind(counts.requests as i64)
        .bind(abort_reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_extraction_run(&self, id: &str) -> Result<Option<ExtractionRun>> {
        let run = sqlx::query_as::<_, ExtractionRun>("SELECT * FROM extraction_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    pub async fn latest_extraction_run(&self) -> Result<Option<ExtractionRun>> {
        let run = sqlx::query_as::<_, ExtractionRun>(
            "SELECT * FROM extraction_runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Transformation Runs =====

    pub async fn start_transform_run(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO transform_runs (id, started_at, status) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(Utc::now().to_rfc3339())
            .bind(RunStatus::Running.to_string())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn complete_transform_run(
        &self,
        id: &str,
        status: RunStatus,
        counts: &TransformCounts,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transform_runs
            SET completed_at = ?, status = ?, documents = ?, parse_failures = ?, matches = ?,
                team_rows = ?, derived_team_rows = ?, player_rows = ?, rejected_rows = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(counts.documents as i64)
        .bind(counts.parse_failures as i64)
        .bind(counts.matches as i64)
        .bind(counts.team_rows as i64)
        .bind(counts.derived_team_rows as i64)
        .bind(counts.player_rows as i64)
        .bind(counts.rejected_rows as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_transform_run(&self) -> Result<Option<TransformRun>> {
        let run = sqlx::query_as::<_, TransformRun>(
            "SELECT * FROM transform_runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Audit Log =====

    /// Append audit entries for a run
    pub async fn record_audit(&self, run_id: &str, entries: &[AuditEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO audit_log (run_id, stage, entity_id, kind, detail, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(entry.stage.as_str())
            .bind(&entry.entity_id)
            .bind(entry.kind.as_str())
            .bind(&entry.detail)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Recorded {} audit entries for run {}", entries.len(), run_id);
        Ok(())
    }

    /// Most recent audit entries, optionally restricted to one run
    pub async fn list_audit(&self, run_id: Option<&str>, limit: i64) -> Result<Vec<AuditRecord>> {
        let records = match run_id {
            Some(run_id) => {
                sqlx::query_as::<_, AuditRecord>(
                    "SELECT * FROM audit_log WHERE run_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(run_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AuditRecord>("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    /// Audit entries of one run, counted by stage and kind
    pub async fn audit_summary(&self, run_id: &str) -> Result<Vec<AuditCount>> {
        let counts = sqlx::query_as::<_, AuditCount>(
            r#"
            SELECT stage, kind, COUNT(*) AS count
            FROM audit_log
            WHERE run_id = ?
            GROUP BY stage, kind
            ORDER BY stage, kind
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    // ===== Frontier =====

    /// Persist the frontier of a walk
    pub async fn save_frontier(&self, roots_key: &str, frontier: &Frontier) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO frontier (roots_key, frontier_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(roots_key) DO UPDATE SET
                frontier_json = excluded.frontier_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(roots_key)
        .bind(serde_json::to_string(frontier)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_frontier(&self, roots_key: &str) -> Result<Option<Frontier>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT frontier_json FROM frontier WHERE roots_key = ?")
                .bind(roots_key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_frontier(&self, roots_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM frontier WHERE roots_key = ?")
            .bind(roots_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every saved frontier, most recently updated first
    pub async fn list_frontiers(&self) -> Result<Vec<SavedFrontier>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT roots_key, frontier_json, updated_at FROM frontier ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(roots_key, json, updated_at)| {
                Ok(SavedFrontier {
                    roots_key,
                    updated_at,
                    frontier: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditKind, AuditStage};
    use crate::models::EntityKind;
    use tempfile::TempDir;

    async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (db, tmp)
    }

    #[tokio::test]
    async fn test_extraction_run_lifecycle() {
        let (db, _tmp) = setup_test_db().await;
        assert!(db.is_initialized().await.unwrap());

        let roots = vec![EntityRef::root(EntityKind::Season, "sr:season:1")];
        let id = db.start_extraction_run(&roots).await.unwrap();
        let run = db.get_extraction_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, "running");

        let counts = ExtractionCounts {
            matches_seen: 3,
            documents_saved: 2,
            documents_skipped: 1,
            failures: 0,
            requests: 5,
        };
        db.complete_extraction_run(&id, RunStatus::Paused, &counts, Some("quota"))
            .await
            .unwrap();

        let run = db.latest_extraction_run().await.unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.status.parse::<RunStatus>().unwrap(), RunStatus::Paused);
        assert_eq!(run.documents_saved, 2);
        assert_eq!(run.abort_reason.as_deref(), Some("quota"));
    }

    #[tokio::test]
    async fn test_audit_log() {
        let (db, _tmp) = setup_test_db().await;
        let run = db.start_transform_run().await.unwrap();

        let entries = vec![
            AuditEntry::new(AuditStage::Parse, "m1", AuditKind::ParseFailure, "bad"),
            AuditEntry::new(AuditStage::Reconcile, "m2", AuditKind::NoStatistics, "none"),
            AuditEntry::new(AuditStage::Reconcile, "m3", AuditKind::NoStatistics, "none"),
        ];
        db.record_audit(&run, &entries).await.unwrap();
        db.record_audit("other", &entries[..1]).await.unwrap();

        let all = db.list_audit(None, 10).await.unwrap();
        assert_eq!(all.len(), 4);
        let mine = db.list_audit(Some(&run), 2).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].entity_id, "m3");

        let summary = db.audit_summary(&run).await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[1].kind, "no_statistics");
        assert_eq!(summary[1].count, 2);
    }

    #[tokio::test]
    async fn test_frontier_persistence() {
        let (db, _tmp) = setup_test_db().await;
        let roots = vec![
            EntityRef::root(EntityKind::Season, "b"),
            EntityRef::root(EntityKind::Season, "a"),
        ];
        let key = frontier_key(&roots);
        let reversed: Vec<EntityRef> = roots.iter().rev().cloned().collect();
        assert_eq!(key, frontier_key(&reversed));

        assert!(db.load_frontier(&key).await.unwrap().is_none());

        let frontier = Frontier::from_roots(&roots);
        db.save_frontier(&key, &frontier).await.unwrap();
        db.save_frontier(&key, &frontier).await.unwrap();
        assert_eq!(db.load_frontier(&key).await.unwrap(), Some(frontier));
        assert_eq!(db.list_frontiers().await.unwrap().len(), 1);

        db.clear_frontier(&key).await.unwrap();
        assert!(db.load_frontier(&key).await.unwrap().is_none());
    }
}
