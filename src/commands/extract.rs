//! Extract command implementation
//!
//! Walks the configured roots, fetching every match document that is not
//! already stored. Documents are committed one by one; the frontier is
//! checkpointed in the metadata database every few matches and whenever the
//! walk stops. A run that stops early (quota exhausted, Ctrl-C) resumes where
//! it left off on the next call.

use crate::audit::{AuditEntry, AuditKind, AuditStage};
use crate::config::Config;
use crate::crawl::{Endpoints, FetchError, Fetcher, HierarchyWalker, RateLimitedClient};
use crate::error::{Error, Result};
use crate::meta::{frontier_key, ExtractionCounts, MetaDb, RunStatus};
use crate::models::{EntityKind, EntityRef};
use crate::progress::start_spinner;
use crate::store::DocumentStore;
use indicatif::ProgressBar;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Matches reached between two frontier checkpoints
const CHECKPOINT_EVERY: u64 = 32;

/// Exit code when a second Ctrl-C abandons the run
const EXIT_ABANDONED: i32 = 130;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Roots to walk instead of the configured ones
    pub roots: Vec<EntityRef>,
    /// Ignore any saved frontier and start from the roots
    pub fresh: bool,
}

/// Outcome of an extraction run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractStats {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: ExtractionCounts,
    pub subtrees_skipped: u64,
    pub indexes_expanded: u64,
    pub pending_entities: usize,
    pub resumed: bool,
    pub abort_reason: Option<String>,
}

impl ExtractStats {
    /// Whether another run is needed to finish the walk
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, RunStatus::Paused | RunStatus::Interrupted)
    }
}

/// Stop request shared between the signal listener and the walk
#[derive(Debug)]
pub struct Interrupt {
    tx: watch::Sender<bool>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while awaited
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Everything a walk needs besides the walker itself
struct Session<'a> {
    fetcher: &'a dyn Fetcher,
    endpoints: &'a Endpoints,
    store: &'a DocumentStore,
    db: &'a MetaDb,
    key: String,
    interrupt: &'a Interrupt,
}

/// Fetch every match document reachable from the roots
pub async fn cmd_extract(config: &Config, db: &MetaDb, options: ExtractOptions) -> Result<ExtractStats> {
    let roots = if options.roots.is_empty() {
        config.root_entities()
    } else {
        options.roots
    };
    if roots.is_empty() {
        return Err(Error::Config(
            "No roots to walk: add [[roots]] to the config or pass --root kind:id".to_string(),
        ));
    }

    // Fail before any request when credentials are missing
    let key = config.api_key()?;
    let client = RateLimitedClient::new(&config.api, &config.rate_limit)?;
    let endpoints = Endpoints::new(&config.api, Some(key));
    let store = DocumentStore::open(config.documents_dir())?;

    let interrupt = Arc::new(Interrupt::new());
    let listener = {
        let interrupt = Arc::clone(&interrupt);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupt received, saving progress (Ctrl-C again to exit now)");
            interrupt.trigger();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Second interrupt, exiting without saving progress");
                std::process::exit(EXIT_ABANDONED);
            }
        })
    };

    let result = extract_with(&client, &endpoints, &store, db, &roots, options.fresh, &interrupt).await;
    listener.abort();

    let mut stats = result?;
    stats.counts.requests = client.requests_issued();
    db.complete_extraction_run(
        &stats.run_id,
        stats.status,
        &stats.counts,
        stats.abort_reason.as_deref(),
    )
    .await?;
    Ok(stats)
}

/// Drive a walk with an explicit fetcher.
///
/// The run is recorded as started here; on success its completion is left
/// to the caller, which knows the final request count.
pub async fn extract_with(
    fetcher: &dyn Fetcher,
    endpoints: &Endpoints,
    store: &DocumentStore,
    db: &MetaDb,
    roots: &[EntityRef],
    fresh: bool,
    interrupt: &Interrupt,
) -> Result<ExtractStats> {
    let session = Session {
        fetcher,
        endpoints,
        store,
        db,
        key: frontier_key(roots),
        interrupt,
    };
    let run_id = db.start_extraction_run(roots).await?;

    let saved = if fresh {
        db.clear_frontier(&session.key).await?;
        None
    } else {
        db.load_frontier(&session.key).await?
    };
    let resumed = saved.is_some();
    let mut walker = match saved {
        Some(frontier) => {
            info!(
                "Resuming walk with {} pending entities ({} matches already reached)",
                frontier.pending(),
                frontier.emitted()
            );
            HierarchyWalker::resume(fetcher, endpoints, frontier)
        }
        None => HierarchyWalker::new(fetcher, endpoints, roots),
    };

    let mut stats = ExtractStats {
        run_id: run_id.clone(),
        status: RunStatus::Running,
        counts: ExtractionCounts::default(),
        subtrees_skipped: 0,
        indexes_expanded: 0,
        pending_entities: 0,
        resumed,
        abort_reason: None,
    };

    let spinner = start_spinner("Walking hierarchy");
    let outcome = walk(&session, &mut walker, &mut stats, &spinner).await;
    spinner.finish_and_clear();

    let skipped = walker.take_skipped();
    stats.subtrees_skipped += skipped.len() as u64;
    stats.indexes_expanded = walker.indexes_expanded();
    db.record_audit(&run_id, &skipped).await?;

    let frontier = walker.into_frontier();
    stats.pending_entities = frontier.pending();

    match outcome {
        Ok(status) => {
            stats.status = status;
            if status == RunStatus::Completed {
                db.clear_frontier(&session.key).await?;
            } else {
                db.save_frontier(&session.key, &frontier).await?;
            }
            info!(
                "Extraction {}: {} saved, {} already stored, {} failed",
                status,
                stats.counts.documents_saved,
                stats.counts.documents_skipped,
                stats.counts.failures
            );
            Ok(stats)
        }
        Err(e) => {
            db.save_frontier(&session.key, &frontier).await?;
            db.complete_extraction_run(&run_id, RunStatus::Failed, &stats.counts, Some(&e.to_string()))
                .await?;
            Err(e)
        }
    }
}

async fn walk(
    session: &Session<'_>,
    walker: &mut HierarchyWalker<'_>,
    stats: &mut ExtractStats,
    spinner: &ProgressBar,
) -> Result<RunStatus> {
    let mut since_checkpoint = 0u64;
    loop {
        if session.interrupt.is_triggered() {
            return Ok(interrupted(stats));
        }

        // Cancelling next_match is safe: a node leaves the frontier only once its fetch settles
        let next = tokio::select! {
            biased;
            _ = session.interrupt.triggered() => return Ok(interrupted(stats)),
            next = walker.next_match() => next,
        };

        let skipped = walker.take_skipped();
        if !skipped.is_empty() {
            stats.subtrees_skipped += skipped.len() as u64;
            session.db.record_audit(&stats.run_id, &skipped).await?;
        }

        let entity = match next {
            Ok(Some(entity)) => entity,
            Ok(None) => return Ok(RunStatus::Completed),
            Err(e) => return halt(session, stats, None, e).await,
        };

        stats.counts.matches_seen += 1;
        spinner.inc(1);

        if session.store.has(&entity.id) {
            debug!("{} already stored", entity.id);
            stats.counts.documents_skipped += 1;
        } else {
            let fetched = tokio::select! {
                biased;
                _ = session.interrupt.triggered() => None,
                fetched = fetch_document(session, &entity) => Some(fetched),
            };
            let Some(fetched) = fetched else {
                walker.requeue(entity);
                return Ok(interrupted(stats));
            };

            match fetched {
                Ok(body) => match session.store.put(&entity.id, &body) {
                    Ok(_) => {
                        stats.counts.documents_saved += 1;
                        spinner.set_message(format!("saved {}", entity.id));
                        info!("Saved {}", entity.id);
                    }
                    Err(Error::DocumentExists(_)) => {
                        warn!("Skipping {}: its key is held by another document", entity.path());
                        stats.counts.failures += 1;
                        let entry = AuditEntry::new(
                            AuditStage::Extract,
                            entity.path(),
                            AuditKind::Duplicate,
                            "document key already holds another match",
                        );
                        session.db.record_audit(&stats.run_id, &[entry]).await?;
                    }
                    Err(e) => {
                        walker.requeue(entity);
                        return Err(e);
                    }
                },
                Err(e) if e.is_fatal() => {
                    walker.requeue(entity.clone());
                    return halt(session, stats, Some(&entity), e).await;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", entity.path(), e);
                    stats.counts.failures += 1;
                    let entry = AuditEntry::new(
                        AuditStage::Extract,
                        entity.path(),
                        e.audit_kind(),
                        e.to_string(),
                    );
                    session.db.record_audit(&stats.run_id, &[entry]).await?;
                }
            }
        }

        since_checkpoint += 1;
        if since_checkpoint >= CHECKPOINT_EVERY {
            session.db.save_frontier(&session.key, walker.frontier()).await?;
            since_checkpoint = 0;
        }
    }
}

fn interrupted(stats: &mut ExtractStats) -> RunStatus {
    stats.abort_reason = Some("interrupted".to_string());
    RunStatus::Interrupted
}

async fn fetch_document(
    session: &Session<'_>,
    entity: &EntityRef,
) -> std::result::Result<Vec<u8>, FetchError> {
    let url = match session.endpoints.url_for(EntityKind::Match, &entity.id) {
        Ok(Some(url)) => url,
        Ok(None) => {
            return Err(FetchError::Malformed {
                url: entity.id.clone(),
                reason: "no match endpoint configured".to_string(),
            })
        }
        Err(e) => {
            return Err(FetchError::Malformed {
                url: entity.id.clone(),
                reason: format!("cannot build URL: {}", e),
            })
        }
    };
    session.fetcher.fetch(&url).await
}

/// Stop the walk on a fatal fetch error.
///
/// An exhausted quota pauses the run; rejected credentials fail it.
async fn halt(
    session: &Session<'_>,
    stats: &mut ExtractStats,
    entity: Option<&EntityRef>,
    error: FetchError,
) -> Result<RunStatus> {
    let entity_id = entity.map(EntityRef::path).unwrap_or_else(|| "walk".to_string());
    let entry = AuditEntry::new(
        AuditStage::Extract,
        entity_id,
        error.audit_kind(),
        error.to_string(),
    );
    session.db.record_audit(&stats.run_id, &[entry]).await?;

    match error {
        FetchError::RateLimitExceeded { .. } => {
            warn!("Request budget exhausted, pausing: {}", error);
            stats.abort_reason = Some(error.to_string());
            Ok(RunStatus::Paused)
        }
        other => Err(Error::Fetch(other)),
    }
}

/// Print extraction stats to console
pub fn print_extract_stats(stats: &ExtractStats) {
    println!("\n📥 Extraction {}\n", stats.status);
    println!("Run: {}", stats.run_id);
    if stats.resumed {
        println!("Resumed from a saved frontier");
    }
    println!("Matches reached: {}", stats.counts.matches_seen);
    println!("  Saved: {}", stats.counts.documents_saved);
    println!("  Already stored: {}", stats.counts.documents_skipped);
    println!("  Failed: {}", stats.counts.failures);
    println!("Indexes expanded: {}", stats.indexes_expanded);
    println!("Subtrees skipped: {}", stats.subtrees_skipped);
    println!("Requests issued: {}", stats.counts.requests);

    if let Some(reason) = &stats.abort_reason {
        println!("\nStopped early: {}", reason);
    }
    if stats.is_resumable() {
        println!(
            "{} entities still pending. Run 'matchstats extract' again to resume.",
            stats.pending_entities
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::parse::fixtures::{competitor, document, header, player};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_ENV: &str = "MATCHSTATS_TEST_EXTRACT_KEY";

    struct Harness {
        _tmp: TempDir,
        config: Config,
        db: MetaDb,
    }

    async fn harness(server: &MockServer) -> Harness {
        std::env::set_var(KEY_ENV, "test-key");
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.api.base_url = server.uri();
        config.api.key_env = KEY_ENV.to_string();
        config.rate_limit = RateLimitConfig {
            requests_per_window: 1000,
            window_secs: 1,
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        };
        config.roots = vec![crate::config::RootEntity {
            kind: EntityKind::Season,
            id: "s1".to_string(),
        }];

        let db = MetaDb::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        Harness {
            _tmp: tmp,
            config,
            db,
        }
    }

    fn schedule(ids: &[&str]) -> String {
        let events: String = ids
            .iter()
            .map(|id| format!(r#"<schedule><sport_event id="{}"/></schedule>"#, id))
            .collect();
        format!("<schedules>{}</schedules>", events)
    }

    fn match_doc(id: &str) -> String {
        document(
            &header(id, ("A", "Alpha"), ("B", "Beta")),
            Some((1, 0)),
            &[
                competitor("A", "home", None, &[player("a1", r#"shots_total="2""#)]),
                competitor("B", "away", None, &[player("b1", r#"shots_total="1""#)]),
            ],
        )
    }

    async fn mount_schedule(server: &MockServer, ids: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/seasons/s1/schedules.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(schedule(ids)))
            .mount(server)
            .await;
    }

    async fn mount_match(server: &MockServer, id: &str, expected: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/sport_events/{}/summary.xml", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(match_doc(id)))
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_extract_is_idempotent() {
        let server = MockServer::start().await;
        mount_schedule(&server, &["m1", "m2"]).await;
        mount_match(&server, "m1", 1).await;
        mount_match(&server, "m2", 1).await;
        let h = harness(&server).await;

        let first = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(first.counts.documents_saved, 2);
        assert_eq!(first.counts.requests, 3);

        let second = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.counts.documents_saved, 0);
        assert_eq!(second.counts.documents_skipped, 2);
        // Only the season index is fetched again
        assert_eq!(second.counts.requests, 1);

        let store = DocumentStore::open(h.config.documents_dir()).unwrap();
        assert_eq!(store.list().unwrap(), vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_missing_match_is_skipped_and_audited() {
        let server = MockServer::start().await;
        mount_schedule(&server, &["m1", "gone"]).await;
        mount_match(&server, "m1", 1).await;
        Mock::given(method("GET"))
            .and(path("/sport_events/gone/summary.xml"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server).await;

        let stats = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.status, RunStatus::Completed);
        assert_eq!(stats.counts.documents_saved, 1);
        assert_eq!(stats.counts.failures, 1);

        let audit = h.db.list_audit(Some(&stats.run_id), 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].kind, "not_found");
        assert_eq!(audit[0].entity_id, "season:s1/match:gone");
    }

    #[tokio::test]
    async fn test_quota_exhaustion_pauses_then_resumes() {
        let server = MockServer::start().await;
        mount_schedule(&server, &["m1", "m2"]).await;
        mount_match(&server, "m1", 1).await;
        Mock::given(method("GET"))
            .and(path("/sport_events/m2/summary.xml"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let h = harness(&server).await;

        let paused = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(paused.status, RunStatus::Paused);
        assert!(paused.is_resumable());
        assert_eq!(paused.counts.documents_saved, 1);
        assert_eq!(paused.pending_entities, 1);

        server.reset().await;
        mount_match(&server, "m2", 1).await;

        let resumed = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert!(resumed.resumed);
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.counts.documents_saved, 1);
        // The season index is not fetched again
        assert_eq!(resumed.counts.requests, 1);

        let key = frontier_key(&h.config.root_entities());
        assert!(h.db.load_frontier(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server).await;

        let err = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(FetchError::Unauthorized { .. })));

        let run = h.db.latest_extraction_run().await.unwrap().unwrap();
        assert_eq!(run.status, "failed");
    }

    #[tokio::test]
    async fn test_missing_key_issues_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let mut h = harness(&server).await;
        h.config.api.key_env = "MATCHSTATS_TEST_UNSET_KEY".to_string();

        let err = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_key_conflict_is_skipped_not_fatal() {
        let server = MockServer::start().await;
        mount_schedule(&server, &["m1", "m2"]).await;
        mount_match(&server, "m1", 1).await;
        mount_match(&server, "m2", 1).await;
        let h = harness(&server).await;

        // m1's file is claimed by a sidecar naming another match
        let store = DocumentStore::open(h.config.documents_dir()).unwrap();
        store.put("m1", b"<sport_event_summary/>").unwrap();
        let sidecar = h.config.documents_dir().join("m1.meta.json");
        let claimed = std::fs::read_to_string(&sidecar)
            .unwrap()
            .replace("\"m1\"", "\"m0\"");
        std::fs::write(&sidecar, claimed).unwrap();
        assert!(!store.has("m1"));

        let stats = cmd_extract(&h.config, &h.db, ExtractOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.status, RunStatus::Completed);
        assert_eq!(stats.counts.documents_saved, 1);
        assert_eq!(stats.counts.failures, 1);
        assert!(store.has("m2"));

        let audit = h.db.list_audit(Some(&stats.run_id), 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].kind, "duplicate");
        assert_eq!(audit[0].entity_id, "season:s1/match:m1");
    }

    /// Serves the season index and the `served` matches, hangs on any other request
    struct StallOnMatches {
        schedule: String,
        served: Vec<String>,
    }

    #[async_trait]
    impl Fetcher for StallOnMatches {
        async fn fetch(&self, url: &Url) -> std::result::Result<Vec<u8>, FetchError> {
            let path = url.path();
            if path.ends_with("schedules.xml") {
                return Ok(self.schedule.clone().into_bytes());
            }
            if let Some(id) = self
                .served
                .iter()
                .find(|id| path == format!("/sport_events/{}/summary.xml", id))
            {
                return Ok(match_doc(id).into_bytes());
            }
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_interrupt_cancels_in_flight_request() {
        let server = MockServer::start().await;
        let h = harness(&server).await;
        let fetcher = StallOnMatches {
            schedule: schedule(&["m1", "m2"]),
            served: Vec::new(),
        };
        let endpoints = Endpoints::new(&h.config.api, None);
        let store = DocumentStore::open(h.config.documents_dir()).unwrap();
        let roots = h.config.root_entities();
        let interrupt = Interrupt::new();

        let (result, ()) = tokio::join!(
            extract_with(&fetcher, &endpoints, &store, &h.db, &roots, false, &interrupt),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                interrupt.trigger();
            }
        );
        let stats = result.unwrap();
        assert_eq!(stats.status, RunStatus::Interrupted);
        assert!(stats.is_resumable());
        assert_eq!(stats.counts.documents_saved, 0);

        // The cancelled match is back on the frontier
        let frontier = h.db.load_frontier(&frontier_key(&roots)).await.unwrap().unwrap();
        assert_eq!(frontier.pending(), 2);
        assert_eq!(frontier.emitted(), 0);
    }

    #[tokio::test]
    async fn test_frontier_checkpoint_survives_abandoned_walk() {
        let server = MockServer::start().await;
        let h = harness(&server).await;
        let ids: Vec<String> = (1..=CHECKPOINT_EVERY + 1).map(|n| format!("m{}", n)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let fetcher = StallOnMatches {
            schedule: schedule(&id_refs),
            served: ids[..CHECKPOINT_EVERY as usize].to_vec(),
        };
        let endpoints = Endpoints::new(&h.config.api, None);
        let store = DocumentStore::open(h.config.documents_dir()).unwrap();
        let roots = h.config.root_entities();
        let interrupt = Interrupt::new();

        // Dropping the walk skips its final save, leaving only the checkpoint
        let abandoned = tokio::time::timeout(
            Duration::from_secs(2),
            extract_with(&fetcher, &endpoints, &store, &h.db, &roots, false, &interrupt),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(store.count().unwrap(), CHECKPOINT_EVERY as usize);

        let frontier = h.db.load_frontier(&frontier_key(&roots)).await.unwrap().unwrap();
        assert_eq!(frontier.emitted(), CHECKPOINT_EVERY as usize);
        assert_eq!(frontier.pending(), 1);
    }
}
