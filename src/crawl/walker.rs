//! Depth-first walk over the entity hierarchy

use super::{parse_children, redact, Endpoints, FetchError, Fetcher};
use crate::audit::{AuditEntry, AuditKind, AuditStage};
use crate::models::EntityRef;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Pending work of a walk. Serializable so an interrupted walk can resume.
///
/// `pending` is a stack: the last element is expanded next. Children are
/// pushed in reverse so they come off in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontier {
    pending: Vec<EntityRef>,
    emitted: BTreeSet<String>,
}

impl Frontier {
    pub fn from_roots(roots: &[EntityRef]) -> Self {
        Self {
            pending: roots.iter().rev().cloned().collect(),
            emitted: BTreeSet::new(),
        }
    }

    fn peek(&self) -> Option<&EntityRef> {
        self.pending.last()
    }

    fn pop(&mut self) -> Option<EntityRef> {
        self.pending.pop()
    }

    fn push(&mut self, entity: EntityRef) {
        self.pending.push(entity);
    }

    fn push_children(&mut self, children: Vec<EntityRef>) {
        self.pending.extend(children.into_iter().rev());
    }

    /// Record a match id; false if it was already emitted
    fn mark_emitted(&mut self, id: &str) -> bool {
        self.emitted.insert(id.to_string())
    }

    fn unmark_emitted(&mut self, id: &str) {
        self.emitted.remove(id);
    }

    /// Entities still to be visited
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Matches handed out so far
    pub fn emitted(&self) -> usize {
        self.emitted.len()
    }
}

/// Walks from a set of roots down to match references.
///
/// Index documents are fetched one at a time through the shared
/// [`Fetcher`]. A failed subtree is skipped and recorded; a fatal error
/// (quota exhausted, credentials rejected) stops the walk with the failing
/// node still on the frontier, so resuming retries it first.
pub struct HierarchyWalker<'a> {
    fetcher: &'a dyn Fetcher,
    endpoints: &'a Endpoints,
    frontier: Frontier,
    skipped: Vec<AuditEntry>,
    indexes_expanded: u64,
}

impl<'a> HierarchyWalker<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, endpoints: &'a Endpoints, roots: &[EntityRef]) -> Self {
        Self::resume(fetcher, endpoints, Frontier::from_roots(roots))
    }

    /// Continue a walk from a saved frontier
    pub fn resume(fetcher: &'a dyn Fetcher, endpoints: &'a Endpoints, frontier: Frontier) -> Self {
        Self {
            fetcher,
            endpoints,
            frontier,
            skipped: Vec::new(),
            indexes_expanded: 0,
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn into_frontier(self) -> Frontier {
        self.frontier
    }

    pub fn indexes_expanded(&self) -> u64 {
        self.indexes_expanded
    }

    /// Skipped subtrees recorded since the last call
    pub fn take_skipped(&mut self) -> Vec<AuditEntry> {
        std::mem::take(&mut self.skipped)
    }

    /// Put a match back on the frontier so the next walk yields it again
    pub fn requeue(&mut self, entity: EntityRef) {
        self.frontier.unmark_emitted(&entity.id);
        self.frontier.push(entity);
    }

    /// Next match reference in depth-first order, or `None` when the walk is complete.
    ///
    /// Cancel safe: an index node stays on the frontier until its fetch
    /// settles, so dropping the future mid-request loses no work.
    pub async fn next_match(&mut self) -> Result<Option<EntityRef>, FetchError> {
        while let Some(node) = self.frontier.peek().cloned() {
            if node.kind.is_leaf() {
                self.frontier.pop();
                if self.frontier.mark_emitted(&node.id) {
                    return Ok(Some(node));
                }
                debug!("Match {} already reached through another index", node.id);
                continue;
            }

            let url = match self.endpoints.url_for(node.kind, &node.id) {
                Ok(Some(url)) => url,
                Ok(None) => {
                    warn!("No endpoint configured for {} entities, skipping {}", node.kind, node.id);
                    self.frontier.pop();
                    self.skip(&node, AuditKind::NoEndpoint, format!("no {} endpoint", node.kind));
                    continue;
                }
                Err(e) => {
                    warn!("Cannot build URL for {}: {}", node.path(), e);
                    self.frontier.pop();
                    self.skip(&node, AuditKind::Rejected, format!("invalid URL: {}", e));
                    continue;
                }
            };

            let fetched = match self.fetcher.fetch(&url).await {
                // Still on the frontier, so a resumed walk retries it first
                Err(e) if e.is_fatal() => return Err(e),
                other => other,
            };
            self.frontier.pop();

            match fetched {
                Ok(body) => match parse_children(&node, &body) {
                    Ok(children) => {
                        self.indexes_expanded += 1;
                        info!(
                            "{} {}: {} child(ren) discovered",
                            node.kind,
                            node.id,
                            children.len()
                        );
                        self.frontier.push_children(children);
                    }
                    Err(reason) => {
                        warn!("Unreadable index for {}: {}", node.path(), reason);
                        self.skip(
                            &node,
                            AuditKind::Malformed,
                            format!("{}: {}", redact(&url), reason),
                        );
                    }
                },
                Err(e) => {
                    warn!("Skipping subtree {}: {}", node.path(), e);
                    self.skip(&node, e.audit_kind(), e.to_string());
                }
            }
        }

        Ok(None)
    }

    fn skip(&mut self, node: &EntityRef, kind: AuditKind, detail: String) {
        self.skipped
            .push(AuditEntry::new(AuditStage::Extract, node.path(), kind, detail));
    }

    /// Lazy sequence of match references
    pub fn into_stream(self) -> impl Stream<Item = Result<EntityRef, FetchError>> + 'a {
        stream::try_unfold(self, |mut walker| async move {
            Ok(walker.next_match().await?.map(|m| (m, walker)))
        })
    }
}

/// Enumerate every match reachable from `root`
pub fn discover<'a>(
    fetcher: &'a dyn Fetcher,
    endpoints: &'a Endpoints,
    root: EntityRef,
) -> impl Stream<Item = Result<EntityRef, FetchError>> + 'a {
    HierarchyWalker::new(fetcher, endpoints, &[root]).into_stream()
}
