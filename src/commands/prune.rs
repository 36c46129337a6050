//! Forget and clean commands: remove raw documents so they are fetched again

use crate::config::Config;
use crate::error::Result;
use crate::store::DocumentStore;
use serde::Serialize;
use tracing::info;

/// Result of removing stored documents
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneStats {
    pub removed: Vec<String>,
    /// Requested ids that were not stored
    pub missing: Vec<String>,
}

/// Delete specific match documents
pub fn cmd_forget(config: &Config, match_ids: &[String]) -> Result<PruneStats> {
    let store = DocumentStore::open(config.documents_dir())?;
    let mut stats = PruneStats::default();

    for id in match_ids {
        if store.delete(id)? {
            stats.removed.push(id.clone());
        } else {
            stats.missing.push(id.clone());
        }
    }

    info!(
        "Forgot {} document(s), {} not stored",
        stats.removed.len(),
        stats.missing.len()
    );
    Ok(stats)
}

/// Delete every stored document. Returns how many were removed.
pub fn cmd_clean(config: &Config) -> Result<usize> {
    let store = DocumentStore::open(config.documents_dir())?;
    let removed = store.purge()?;
    info!("Purged {} stored document(s)", removed);
    Ok(removed)
}

/// Print forget result to console
pub fn print_prune_stats(stats: &PruneStats) {
    println!("✓ Forgot {} document(s)", stats.removed.len());
    for id in &stats.missing {
        println!("  not stored: {}", id);
    }
    if !stats.removed.is_empty() {
        println!("The next extraction will fetch them again.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config
    }

    #[test]
    fn test_forget_reports_missing_ids() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);
        let store = DocumentStore::open(config.documents_dir()).unwrap();
        store.put("sr:sport_event:1", b"<a/>").unwrap();

        let stats = cmd_forget(
            &config,
            &["sr:sport_event:1".to_string(), "sr:sport_event:2".to_string()],
        )
        .unwrap();
        assert_eq!(stats.removed, vec!["sr:sport_event:1"]);
        assert_eq!(stats.missing, vec!["sr:sport_event:2"]);
        assert!(!store.has("sr:sport_event:1"));
    }

    #[test]
    fn test_clean_empties_store() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);
        let store = DocumentStore::open(config.documents_dir()).unwrap();
        store.put("a", b"<a/>").unwrap();
        store.put("b", b"<b/>").unwrap();

        assert_eq!(cmd_clean(&config).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }
}
