//! Transform command implementation
//!
//! Rebuilds the three tables from every stored document. Documents are
//! parsed and reconciled on blocking tasks, a bounded number at a time, and
//! merged in store order into a single [`TableBuilder`].

use crate::audit::{AuditEntry, AuditKind, AuditStage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{MetaDb, RunStatus, TransformCounts};
use crate::models::{MatchRecord, PlayerStatRecord, TeamStatRecord};
use crate::parse::parse_match;
use crate::progress::{advance_progress, finish_progress, start_progress_bar};
use crate::reconcile::{reconcile, Finding};
use crate::store::DocumentStore;
use crate::table::{write_tables, TableBuilder, TableFile, Tables};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Tables and audit trail produced from the store
#[derive(Debug)]
pub struct TransformOutput {
    pub tables: Tables,
    pub audit: Vec<AuditEntry>,
    pub counts: TransformCounts,
}

/// Outcome of a transform run
#[derive(Debug, Clone, Serialize)]
pub struct TransformStats {
    pub run_id: String,
    #[serde(flatten)]
    pub counts: TransformCounts,
    pub audit_entries: usize,
    pub files: Vec<TableFile>,
}

/// What one document turned into
#[derive(Debug)]
pub enum DocumentOutcome {
    Parsed {
        record: MatchRecord,
        teams: Vec<TeamStatRecord>,
        players: Vec<PlayerStatRecord>,
        audit: Vec<AuditEntry>,
    },
    Skipped(AuditEntry),
}

/// Rebuild the tables from the store and write them out
pub async fn cmd_transform(config: &Config, db: &MetaDb) -> Result<TransformStats> {
    let store = DocumentStore::open(config.documents_dir())?;
    let run_id = db.start_transform_run().await?;

    let built = match transform_store(&store, config.transform.workers).await {
        Ok(output) => write_tables(&config.tables_dir(), &output.tables, config.transform.write_csv)
            .map(|files| (output, files)),
        Err(e) => Err(e),
    };

    let (output, files) = match built {
        Ok(built) => built,
        Err(e) => {
            db.complete_transform_run(&run_id, RunStatus::Failed, &TransformCounts::default())
                .await?;
            return Err(e);
        }
    };

    db.record_audit(&run_id, &output.audit).await?;
    db.complete_transform_run(&run_id, RunStatus::Completed, &output.counts)
        .await?;

    info!(
        "Transform complete: {} matches, {} team rows ({} derived), {} player rows",
        output.counts.matches,
        output.counts.team_rows,
        output.counts.derived_team_rows,
        output.counts.player_rows
    );

    Ok(TransformStats {
        run_id,
        counts: output.counts,
        audit_entries: output.audit.len(),
        files,
    })
}

/// Parse and reconcile every stored document
pub async fn transform_store(store: &DocumentStore, workers: usize) -> Result<TransformOutput> {
    let ids = store.list()?;
    info!("Transforming {} stored document(s)", ids.len());

    let progress = start_progress_bar(ids.len(), "Parsing documents");
    let mut outcomes = stream::iter(ids.iter().cloned())
        .map(|id| {
            let store = store.clone();
            tokio::task::spawn_blocking(move || load_document(&store, &id))
        })
        .buffered(workers.max(1));

    let mut counts = TransformCounts {
        documents: ids.len() as u64,
        ..TransformCounts::default()
    };
    let mut builder = TableBuilder::new();
    let mut audit = Vec::new();

    while let Some(joined) = outcomes.next().await {
        let outcome = joined.map_err(|e| Error::Other(format!("Parse worker failed: {}", e)))?;
        advance_progress(&progress);
        match outcome {
            DocumentOutcome::Parsed {
                record,
                teams,
                players,
                audit: entries,
            } => {
                audit.extend(entries);
                builder.add(record, teams, players);
            }
            DocumentOutcome::Skipped(entry) => {
                counts.parse_failures += 1;
                audit.push(entry);
            }
        }
    }
    finish_progress(progress, "Documents parsed");

    let (tables, rejected) = builder.finish();
    counts.matches = tables.matches.len() as u64;
    counts.team_rows = tables.team_stats.len() as u64;
    counts.derived_team_rows = tables.derived_team_rows() as u64;
    counts.player_rows = tables.player_stats.len() as u64;
    counts.rejected_rows = rejected.len() as u64;
    audit.extend(rejected);

    Ok(TransformOutput {
        tables,
        audit,
        counts,
    })
}

fn load_document(store: &DocumentStore, match_id: &str) -> DocumentOutcome {
    match store.get(match_id) {
        Ok(Some(document)) => transform_document(match_id, &document.bytes),
        Ok(None) => {
            warn!("Document {} is stored under another id", match_id);
            DocumentOutcome::Skipped(AuditEntry::new(
                AuditStage::Parse,
                match_id,
                AuditKind::IdMismatch,
                "stored key belongs to another match",
            ))
        }
        Err(e) => {
            warn!("Skipping {}: {}", match_id, e);
            DocumentOutcome::Skipped(AuditEntry::new(
                AuditStage::Parse,
                match_id,
                AuditKind::CorruptDocument,
                e.to_string(),
            ))
        }
    }
}

/// Turn one raw document into table rows and audit entries
pub fn transform_document(match_id: &str, bytes: &[u8]) -> DocumentOutcome {
    let mut parsed = match parse_match(bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Cannot parse {}: {}", match_id, e);
            return DocumentOutcome::Skipped(AuditEntry::new(
                AuditStage::Parse,
                match_id,
                AuditKind::ParseFailure,
                e.to_string(),
            ));
        }
    };

    if parsed.record.match_id != match_id {
        warn!(
            "Document stored as {} describes {}",
            match_id, parsed.record.match_id
        );
        return DocumentOutcome::Skipped(AuditEntry::new(
            AuditStage::Parse,
            match_id,
            AuditKind::IdMismatch,
            format!("document describes {}", parsed.record.match_id),
        ));
    }

    let mut audit: Vec<AuditEntry> = parsed
        .warnings
        .iter()
        .map(|w| AuditEntry::new(AuditStage::Parse, match_id, AuditKind::Malformed, w.as_str()))
        .collect();

    // Derived totals must sum exactly the player rows that reach the table
    for dropped in parsed.coverage.dedup_players() {
        audit.push(AuditEntry::new(
            AuditStage::Parse,
            match_id,
            AuditKind::Duplicate,
            format!("player {} listed twice for team {}", dropped.player_id, dropped.team_id),
        ));
    }

    let reconciled = reconcile(&parsed.record, &parsed.coverage);
    for finding in &reconciled.findings {
        let kind = match finding {
            Finding::NoStatistics => AuditKind::NoStatistics,
            Finding::TotalsMismatch { .. } => AuditKind::TotalsMismatch,
            Finding::UnknownTeam { .. } => AuditKind::UnknownTeam,
        };
        audit.push(AuditEntry::new(
            AuditStage::Reconcile,
            match_id,
            kind,
            finding.describe(),
        ));
    }
    debug!(
        "{}: {} team record(s), {} derived",
        match_id,
        reconciled.teams.len(),
        reconciled.derived()
    );

    DocumentOutcome::Parsed {
        players: parsed.coverage.players().to_vec(),
        record: parsed.record,
        teams: reconciled.teams,
        audit,
    }
}

/// Print transform stats to console
pub fn print_transform_stats(stats: &TransformStats) {
    println!("\n📊 Transform complete\n");
    println!("Run: {}", stats.run_id);
    println!("Documents read: {}", stats.counts.documents);
    println!("  Parse failures: {}", stats.counts.parse_failures);
    println!("Matches: {}", stats.counts.matches);
    println!(
        "Team rows: {} ({} derived from players)",
        stats.counts.team_rows, stats.counts.derived_team_rows
    );
    println!("Player rows: {}", stats.counts.player_rows);
    println!("Rejected rows: {}", stats.counts.rejected_rows);
    println!("Audit entries: {}", stats.audit_entries);

    if !stats.files.is_empty() {
        println!("\nFiles:");
        for file in &stats.files {
            println!("  {} ({} rows)", file.path.display(), file.rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metric, StatOrigin};
    use crate::parse::fixtures::{competitor, document, header, player};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    /// M1 carries team totals for A and B; M2 only player rows for C and D
    fn seed(store: &DocumentStore) {
        let m1 = document(
            &header("M1", ("A", "Alpha"), ("B", "Beta")),
            Some((2, 1)),
            &[
                competitor(
                    "A",
                    "home",
                    Some(r#"shots_total="14" ball_possession="55""#),
                    &[player("a1", r#"shots_total="9""#), player("a2", r#"shots_total="5""#)],
                ),
                competitor(
                    "B",
                    "away",
                    Some(r#"shots_total="7" ball_possession="45""#),
                    &[player("b1", r#"shots_total="7""#)],
                ),
            ],
        );

        let squad = |prefix: &str| -> Vec<String> {
            (1..=11)
                .map(|n| player(&format!("{}{}", prefix, n), &format!(r#"shots_total="{}""#, n % 3)))
                .collect()
        };
        let m2 = document(
            &header("M2", ("C", "Gamma"), ("D", "Delta")),
            Some((0, 0)),
            &[
                competitor("C", "home", None, &squad("c")),
                competitor("D", "away", None, &squad("d")),
            ],
        );

        store.put("M1", m1.as_bytes()).unwrap();
        store.put("M2", m2.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_mixed_coverage_yields_four_team_rows() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        seed(&store);

        let output = transform_store(&store, 2).await.unwrap();
        let teams = &output.tables.team_stats;
        assert_eq!(teams.len(), 4);

        let ids: Vec<&str> = teams.iter().map(|t| t.team_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(teams[0].origin, StatOrigin::Observed);
        assert_eq!(teams[1].origin, StatOrigin::Observed);
        assert_eq!(teams[2].origin, StatOrigin::Derived);
        assert_eq!(teams[3].origin, StatOrigin::Derived);

        // 1..=11 mod 3 is 1,2,0,1,2,0,1,2,0,1,2
        assert_eq!(teams[2].metrics.get(Metric::ShotsTotal), Some(12.0));
        assert_eq!(teams[3].metrics.get(Metric::ShotsTotal), Some(12.0));
        assert!(teams[2].metrics.is_missing(Metric::BallPossession));
        assert_eq!(teams[0].metrics.get(Metric::BallPossession), Some(55.0));

        assert_eq!(output.tables.player_stats.len(), 25);
        assert_eq!(output.counts.matches, 2);
        assert_eq!(output.counts.derived_team_rows, 2);
        assert_eq!(output.counts.rejected_rows, 0);
        assert!(output.audit.is_empty());
    }

    #[tokio::test]
    async fn test_bad_documents_are_skipped_and_audited() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        seed(&store);
        store.put("broken", b"<sport_event_summary><sport_event").unwrap();
        let m1_again = document(&header("M1", ("A", "Alpha"), ("B", "Beta")), None, &[]);
        store.put("M9", m1_again.as_bytes()).unwrap();

        let output = transform_store(&store, 3).await.unwrap();
        assert_eq!(output.counts.documents, 4);
        assert_eq!(output.counts.parse_failures, 2);
        assert_eq!(output.counts.matches, 2);

        let kinds: Vec<(&str, AuditKind)> = output
            .audit
            .iter()
            .map(|e| (e.entity_id.as_str(), e.kind))
            .collect();
        assert!(kinds.contains(&("broken", AuditKind::ParseFailure)));
        assert!(kinds.contains(&("M9", AuditKind::IdMismatch)));
    }

    #[test]
    fn test_unplayed_match_keeps_row_without_stats() {
        let doc = document(&header("M3", ("A", "Alpha"), ("B", "Beta")), None, &[]);
        match transform_document("M3", doc.as_bytes()) {
            DocumentOutcome::Parsed {
                record,
                teams,
                players,
                audit,
            } => {
                assert_eq!(record.match_id, "M3");
                assert!(teams.is_empty());
                assert!(players.is_empty());
                assert_eq!(audit.len(), 1);
                assert_eq!(audit[0].kind, AuditKind::NoStatistics);
            }
            DocumentOutcome::Skipped(entry) => panic!("unexpected skip: {:?}", entry),
        }
    }

    #[tokio::test]
    async fn test_repeated_player_counts_once_in_derived_totals() {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(tmp.path()).unwrap();
        let doc = document(
            &header("M2", ("C", "Gamma"), ("D", "Delta")),
            Some((0, 0)),
            &[
                competitor(
                    "C",
                    "home",
                    None,
                    &[player("c1", r#"shots_total="3""#), player("c1", r#"shots_total="5""#)],
                ),
                competitor("D", "away", None, &[player("d1", r#"shots_total="1""#)]),
            ],
        );
        store.put("M2", doc.as_bytes()).unwrap();

        let output = transform_store(&store, 1).await.unwrap();
        let home = &output.tables.team_stats[0];
        assert_eq!(home.team_id, "C");
        assert_eq!(home.origin, StatOrigin::Derived);

        let player_sum: f64 = output
            .tables
            .player_stats
            .iter()
            .filter(|p| p.team_id == "C")
            .filter_map(|p| p.metrics.get(Metric::ShotsTotal))
            .sum();
        assert_eq!(player_sum, 3.0);
        assert_eq!(home.metrics.get(Metric::ShotsTotal), Some(player_sum));

        assert_eq!(output.counts.rejected_rows, 0);
        let duplicates: Vec<&AuditEntry> = output
            .audit
            .iter()
            .filter(|e| e.kind == AuditKind::Duplicate)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].stage, AuditStage::Parse);
    }

    #[tokio::test]
    async fn test_cmd_transform_writes_tables() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.transform.write_csv = false;

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        seed(&DocumentStore::open(config.documents_dir()).unwrap());

        let stats = cmd_transform(&config, &db).await.unwrap();
        assert_eq!(stats.files.len(), 3);
        assert_eq!(stats.counts.team_rows, 4);

        let file = std::fs::File::open(config.tables_dir().join("team_stats.parquet")).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 4);

        let run = db.latest_transform_run().await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.derived_team_rows, 2);
    }
}
