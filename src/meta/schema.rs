//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Extraction runs: one per extract invocation
CREATE TABLE IF NOT EXISTS extraction_runs (
    id TEXT PRIMARY KEY,
    roots_json TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    matches_seen INTEGER NOT NULL DEFAULT 0,
    documents_saved INTEGER NOT NULL DEFAULT 0,
    documents_skipped INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    requests INTEGER NOT NULL DEFAULT 0,
    abort_reason TEXT
);

-- Transformation runs: one per transform invocation
CREATE TABLE IF NOT EXISTS transform_runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    documents INTEGER NOT NULL DEFAULT 0,
    parse_failures INTEGER NOT NULL DEFAULT 0,
    matches INTEGER NOT NULL DEFAULT 0,
    team_rows INTEGER NOT NULL DEFAULT 0,
    derived_team_rows INTEGER NOT NULL DEFAULT 0,
    player_rows INTEGER NOT NULL DEFAULT 0,
    rejected_rows INTEGER NOT NULL DEFAULT 0
);

-- Audit log: everything skipped, dropped or flagged
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Frontier of an interrupted walk, keyed by its root set
CREATE TABLE IF NOT EXISTS frontier (
    roots_key TEXT PRIMARY KEY,
    frontier_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_log(run_id);
CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_log(kind);
CREATE INDEX IF NOT EXISTS idx_extraction_started ON extraction_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_transform_started ON transform_runs(started_at);
"#;
