//! Table assembly
//!
//! Rows from every parsed document are merged into three tables. The
//! builder keeps one row per key (match; match and team; match and player),
//! audits duplicates, and on `finish` drops stat rows that violate
//! referential rules: every stat row must point at a known match, and its
//! team must be a side of that match.

mod writer;

pub use writer::*;

use crate::audit::{AuditEntry, AuditKind, AuditStage};
use crate::models::{MatchRecord, PlayerStatRecord, TeamStatRecord};
use std::collections::BTreeMap;
use tracing::debug;

/// The three output tables, each sorted by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub matches: Vec<MatchRecord>,
    pub team_stats: Vec<TeamStatRecord>,
    pub player_stats: Vec<PlayerStatRecord>,
}

impl Tables {
    /// Team rows that were derived from player rows
    pub fn derived_team_rows(&self) -> usize {
        self.team_stats
            .iter()
            .filter(|t| t.origin == crate::models::StatOrigin::Derived)
            .count()
    }
}

/// Accumulates rows and enforces table invariants
#[derive(Debug, Default)]
pub struct TableBuilder {
    matches: BTreeMap<String, MatchRecord>,
    team_stats: BTreeMap<(String, String), TeamStatRecord>,
    player_stats: BTreeMap<(String, String), PlayerStatRecord>,
    audit: Vec<AuditEntry>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a match with its statistics. When the match is already present
    /// the whole group is dropped, so the first document stays authoritative.
    pub fn add(
        &mut self,
        record: MatchRecord,
        teams: Vec<TeamStatRecord>,
        players: Vec<PlayerStatRecord>,
    ) -> bool {
        if !self.add_match(record) {
            return false;
        }
        for team in teams {
            self.add_team_stat(team);
        }
        for player in players {
            self.add_player_stat(player);
        }
        true
    }

    pub fn add_match(&mut self, record: MatchRecord) -> bool {
        if self.matches.contains_key(&record.match_id) {
            self.reject(&record.match_id, AuditKind::Duplicate, "match already present".to_string());
            return false;
        }
        self.matches.insert(record.match_id.clone(), record);
        true
    }

    pub fn add_team_stat(&mut self, row: TeamStatRecord) -> bool {
        let key = (row.match_id.clone(), row.team_id.clone());
        if self.team_stats.contains_key(&key) {
            self.reject(
                &row.match_id,
                AuditKind::Duplicate,
                format!("team {} listed twice", row.team_id),
            );
            return false;
        }
        self.team_stats.insert(key, row);
        true
    }

    pub fn add_player_stat(&mut self, row: PlayerStatRecord) -> bool {
        let key = (row.match_id.clone(), row.player_id.clone());
        if self.player_stats.contains_key(&key) {
            self.reject(
                &row.match_id,
                AuditKind::Duplicate,
                format!("player {} listed twice", row.player_id),
            );
            return false;
        }
        self.player_stats.insert(key, row);
        true
    }

    fn reject(&mut self, match_id: &str, kind: AuditKind, detail: String) {
        debug!("Rejecting row of {}: {}", match_id, detail);
        self.audit
            .push(AuditEntry::new(AuditStage::Table, match_id, kind, detail));
    }

    /// Validate references and emit the tables with the audit trail
    pub fn finish(mut self) -> (Tables, Vec<AuditEntry>) {
        let matches = std::mem::take(&mut self.matches);

        let mut team_stats = Vec::with_capacity(self.team_stats.len());
        for (_, row) in std::mem::take(&mut self.team_stats) {
            let Some(record) = matches.get(&row.match_id) else {
                self.reject(
                    &row.match_id,
                    AuditKind::SchemaViolation,
                    format!("team row for {} references no known match", row.team_id),
                );
                continue;
            };
            if record.side_of(&row.team_id) != Some(row.role) {
                self.reject(
                    &row.match_id,
                    AuditKind::UnknownTeam,
                    format!("team {} is not the {} side", row.team_id, row.role.as_str()),
                );
                continue;
            }
            team_stats.push(row);
        }

        let mut player_stats = Vec::with_capacity(self.player_stats.len());
        for (_, row) in std::mem::take(&mut self.player_stats) {
            let Some(record) = matches.get(&row.match_id) else {
                self.reject(
                    &row.match_id,
                    AuditKind::SchemaViolation,
                    format!("player row for {} references no known match", row.player_id),
                );
                continue;
            };
            if record.side_of(&row.team_id).is_none() {
                self.reject(
                    &row.match_id,
                    AuditKind::UnknownTeam,
                    format!(
                        "player {} belongs to team {} which did not play",
                        row.player_id, row.team_id
                    ),
                );
                continue;
            }
            player_stats.push(row);
        }

        let tables = Tables {
            matches: matches.into_values().collect(),
            team_stats,
            player_stats,
        };
        (tables, self.audit)
    }
}
