//! Team statistics reconciliation
//!
//! Some match documents carry team-level totals, others only per-player
//! rows. Reconciliation produces one team record per side that has any
//! statistics: observed records pass through untouched, missing ones are
//! derived by summing the additive metrics of the team's players.

use crate::models::{
    MatchRecord, Metric, MetricSet, PlayerStatRecord, Side, StatCoverage, StatOrigin,
    TeamStatRecord,
};
use std::collections::BTreeMap;
use tracing::debug;

const TOLERANCE: f64 = 1e-6;

/// Something worth recording about a match while reconciling it
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    /// The document carried neither team nor player statistics
    NoStatistics,
    /// Observed team totals disagree with the sum of the team's players
    TotalsMismatch {
        team_id: String,
        metrics: Vec<(Metric, f64, f64)>,
    },
    /// Player rows reference a team that is not a side of the match
    UnknownTeam { team_id: String, players: usize },
}

impl Finding {
    pub fn describe(&self) -> String {
        match self {
            Finding::NoStatistics => "no team or player statistics".to_string(),
            Finding::TotalsMismatch { team_id, metrics } => {
                let parts: Vec<String> = metrics
                    .iter()
                    .map(|(m, observed, summed)| format!("{}: {} vs {}", m, observed, summed))
                    .collect();
                format!(
                    "team {} totals differ from player sums ({})",
                    team_id,
                    parts.join(", ")
                )
            }
            Finding::UnknownTeam { team_id, players } => format!(
                "{} player row(s) for team {} which did not play this match",
                players, team_id
            ),
        }
    }
}

/// Final team records for one match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Home first, then away
    pub teams: Vec<TeamStatRecord>,
    pub findings: Vec<Finding>,
}

impl Reconciled {
    pub fn derived(&self) -> usize {
        self.teams
            .iter()
            .filter(|t| t.origin == StatOrigin::Derived)
            .count()
    }
}

/// Produce the final team records for a parsed match
pub fn reconcile(record: &MatchRecord, coverage: &StatCoverage) -> Reconciled {
    match coverage {
        StatCoverage::TeamStats { teams, players } => reconcile_rows(record, teams, players),
        StatCoverage::PlayersOnly { players } => reconcile_rows(record, &[], players),
        StatCoverage::Neither => Reconciled {
            teams: Vec::new(),
            findings: vec![Finding::NoStatistics],
        },
    }
}

/// Reconcile explicit team and player rows of one match
pub fn reconcile_rows(
    record: &MatchRecord,
    observed: &[TeamStatRecord],
    players: &[PlayerStatRecord],
) -> Reconciled {
    let mut by_team: BTreeMap<&str, Vec<&PlayerStatRecord>> = BTreeMap::new();
    for player in players {
        by_team.entry(player.team_id.as_str()).or_default().push(player);
    }

    let mut result = Reconciled::default();

    for (team_id, rows) in &by_team {
        if record.side_of(team_id).is_none() {
            debug!(
                "Match {}: {} player rows for unknown team {}",
                record.match_id,
                rows.len(),
                team_id
            );
            result.findings.push(Finding::UnknownTeam {
                team_id: team_id.to_string(),
                players: rows.len(),
            });
        }
    }

    for side in [Side::Home, Side::Away] {
        let team_id = match side {
            Side::Home => record.home_team_id.as_str(),
            Side::Away => record.away_team_id.as_str(),
        };
        let team_players = by_team.get(team_id).map(Vec::as_slice).unwrap_or(&[]);

        if let Some(team) = observed.iter().find(|t| t.team_id == team_id) {
            let mismatches = compare_totals(&team.metrics, team_players);
            if !mismatches.is_empty() {
                result.findings.push(Finding::TotalsMismatch {
                    team_id: team_id.to_string(),
                    metrics: mismatches,
                });
            }
            result.teams.push(team.clone());
        } else if let Some(derived) = derive_team(record, side, team_players) {
            result.teams.push(derived);
        }
    }

    result
}

/// Sum the additive metrics of a team's players.
///
/// Returns `None` when the team has no player rows. A metric missing on
/// every player stays missing; otherwise missing player values count as 0.
pub fn derive_team(
    record: &MatchRecord,
    side: Side,
    players: &[&PlayerStatRecord],
) -> Option<TeamStatRecord> {
    let first = players.first()?;

    let metrics: MetricSet = Metric::ALL
        .iter()
        .copied()
        .filter(|m| m.is_additive())
        .filter_map(|m| sum_metric(m, players).map(|v| (m, v)))
        .collect();

    Some(TeamStatRecord {
        match_id: record.match_id.clone(),
        team_id: first.team_id.clone(),
        team_name: players
            .iter()
            .find_map(|p| p.team_name.clone())
            .or_else(|| match side {
                Side::Home => record.home_team_name.clone(),
                Side::Away => record.away_team_name.clone(),
            }),
        role: side,
        score: record.score_for(side),
        metrics,
        origin: StatOrigin::Derived,
    })
}

fn sum_metric(metric: Metric, players: &[&PlayerStatRecord]) -> Option<f64> {
    let values: Vec<f64> = players
        .iter()
        .filter_map(|p| p.metrics.get(metric))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}

/// Additive metrics where observed totals and player sums disagree
fn compare_totals(observed: &MetricSet, players: &[&PlayerStatRecord]) -> Vec<(Metric, f64, f64)> {
    if players.is_empty() {
        return Vec::new();
    }
    observed
        .iter()
        .filter(|(m, _)| m.is_additive())
        .filter_map(|(m, value)| {
            let summed = sum_metric(m, players)?;
            ((value - summed).abs() > TOLERANCE).then_some((m, value, summed))
        })
        .collect()
}
