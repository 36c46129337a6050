//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::{ExtractionRun, MetaDb, TransformRun};
use crate::store::DocumentStore;
use serde::Serialize;
use tracing::info;

/// A saved walk waiting to be resumed
#[derive(Debug, Clone, Serialize)]
pub struct PendingWalk {
    pub roots_key: String,
    pub updated_at: String,
    pub pending_entities: usize,
    pub matches_reached: usize,
}

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub documents_dir: String,
    pub tables_dir: String,
    pub base_url: String,
    pub key_env: String,
    pub credentials_present: bool,
    pub roots: Vec<String>,
    pub documents_stored: usize,
    pub last_extraction: Option<ExtractionRun>,
    pub last_transform: Option<TransformRun>,
    pub pending_walks: Vec<PendingWalk>,
}

/// Get system status
pub async fn cmd_status(config: &Config, db: &MetaDb) -> Result<StatusInfo> {
    info!("Getting status");

    let store = DocumentStore::open(config.documents_dir())?;
    let pending_walks = db
        .list_frontiers()
        .await?
        .into_iter()
        .map(|saved| PendingWalk {
            pending_entities: saved.frontier.pending(),
            matches_reached: saved.frontier.emitted(),
            roots_key: saved.roots_key,
            updated_at: saved.updated_at,
        })
        .collect();

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        documents_dir: config.documents_dir().display().to_string(),
        tables_dir: config.tables_dir().display().to_string(),
        base_url: config.api.base_url.clone(),
        key_env: config.api.key_env.clone(),
        credentials_present: config.api_key().is_ok(),
        roots: config
            .root_entities()
            .iter()
            .map(|r| format!("{}:{}", r.kind, r.id))
            .collect(),
        documents_stored: store.count()?,
        last_extraction: db.latest_extraction_run().await?,
        last_transform: db.latest_transform_run().await?,
        pending_walks,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 matchstats Status\n");

    println!("Configuration:");
    println!("  Config: {}", status.config_path);
    println!("  Database: {}", status.db_path);
    println!("  Documents: {}", status.documents_dir);
    println!("  Tables: {}", status.tables_dir);
    println!();

    println!("Upstream:");
    println!("  Base URL: {}", status.base_url);
    if status.credentials_present {
        println!("  Credentials: ✓ {} is set", status.key_env);
    } else {
        println!("  Credentials: ✗ {} is not set", status.key_env);
    }
    if status.roots.is_empty() {
        println!("  Roots: none configured");
    } else {
        println!("  Roots: {}", status.roots.join(", "));
    }
    println!();

    println!("Stored documents: {}", status.documents_stored);
    println!();

    match &status.last_extraction {
        Some(run) => {
            println!("Last extraction ({}):", run.status);
            println!("  Started: {}", run.started_at);
            println!(
                "  Saved: {}  Already stored: {}  Failed: {}  Requests: {}",
                run.documents_saved, run.documents_skipped, run.failures, run.requests
            );
            if let Some(reason) = &run.abort_reason {
                println!("  Stopped: {}", reason);
            }
        }
        None => println!("No extraction has run yet."),
    }

    match &status.last_transform {
        Some(run) => {
            println!("Last transform ({}):", run.status);
            println!("  Started: {}", run.started_at);
            println!(
                "  Matches: {}  Team rows: {} ({} derived)  Player rows: {}",
                run.matches, run.team_rows, run.derived_team_rows, run.player_rows
            );
            println!(
                "  Parse failures: {}  Rejected rows: {}",
                run.parse_failures, run.rejected_rows
            );
        }
        None => println!("No transform has run yet."),
    }

    if !status.pending_walks.is_empty() {
        println!("\nResumable walks:");
        for walk in &status.pending_walks {
            println!(
                "  {}  {} pending, {} matches reached (saved {})",
                &walk.roots_key[..walk.roots_key.len().min(12)],
                walk.pending_entities,
                walk.matches_reached,
                walk.updated_at
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::Frontier;
    use crate::meta::frontier_key;
    use crate::models::{EntityKind, EntityRef};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_reports_store_and_frontiers() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.api.key_env = "MATCHSTATS_TEST_STATUS_UNSET".to_string();

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();

        let store = DocumentStore::open(config.documents_dir()).unwrap();
        store.put("m1", b"<a/>").unwrap();

        let roots = vec![EntityRef::root(EntityKind::Season, "s1")];
        db.save_frontier(&frontier_key(&roots), &Frontier::from_roots(&roots))
            .await
            .unwrap();

        let status = cmd_status(&config, &db).await.unwrap();
        assert_eq!(status.documents_stored, 1);
        assert!(!status.credentials_present);
        assert!(status.last_extraction.is_none());
        assert_eq!(status.pending_walks.len(), 1);
        assert_eq!(status.pending_walks[0].pending_entities, 1);
    }
}
