//! Audit entries for everything skipped, dropped or flagged during a run

use serde::{Deserialize, Serialize};

/// Pipeline stage that produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStage {
    Extract,
    Parse,
    Reconcile,
    Table,
}

impl AuditStage {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStage::Extract => "extract",
            AuditStage::Parse => "parse",
            AuditStage::Reconcile => "reconcile",
            AuditStage::Table => "table",
        }
    }
}

impl std::fmt::Display for AuditStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    NotFound,
    Transient,
    Malformed,
    Rejected,
    RateLimited,
    Unauthorized,
    NoEndpoint,
    ParseFailure,
    CorruptDocument,
    IdMismatch,
    NoStatistics,
    TotalsMismatch,
    UnknownTeam,
    SchemaViolation,
    Duplicate,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditKind::NotFound => "not_found",
            AuditKind::Transient => "transient",
            AuditKind::Malformed => "malformed",
            AuditKind::Rejected => "rejected",
            AuditKind::RateLimited => "rate_limited",
            AuditKind::Unauthorized => "unauthorized",
            AuditKind::NoEndpoint => "no_endpoint",
            AuditKind::ParseFailure => "parse_failure",
            AuditKind::CorruptDocument => "corrupt_document",
            AuditKind::IdMismatch => "id_mismatch",
            AuditKind::NoStatistics => "no_statistics",
            AuditKind::TotalsMismatch => "totals_mismatch",
            AuditKind::UnknownTeam => "unknown_team",
            AuditKind::SchemaViolation => "schema_violation",
            AuditKind::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record, not yet attached to a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: AuditStage,
    /// Entity path for extraction entries, match id otherwise
    pub entity_id: String,
    pub kind: AuditKind,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        stage: AuditStage,
        entity_id: impl Into<String>,
        kind: AuditKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            entity_id: entity_id.into(),
            kind,
            detail: detail.into(),
        }
    }
}
