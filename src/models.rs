//! Entity and record types shared by extraction and transformation.
//!
//! The metric vocabulary lives here too: every statistic the tables carry is
//! a [`Metric`], and whether it may be summed across players is decided by
//! [`Metric::is_additive`], not inferred from the data.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Level of a node in the upstream hierarchy, shallowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Competition,
    Season,
    Stage,
    Round,
    Match,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Competition,
        EntityKind::Season,
        EntityKind::Stage,
        EntityKind::Round,
        EntityKind::Match,
    ];

    /// Map an XML element local name to the entity kind it describes
    pub fn from_element(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"competition" => Some(EntityKind::Competition),
            b"season" => Some(EntityKind::Season),
            b"stage" => Some(EntityKind::Stage),
            b"round" => Some(EntityKind::Round),
            b"sport_event" => Some(EntityKind::Match),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        self == EntityKind::Match
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Competition => "competition",
            EntityKind::Season => "season",
            EntityKind::Stage => "stage",
            EntityKind::Round => "round",
            EntityKind::Match => "match",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "competition" => Ok(EntityKind::Competition),
            "season" => Ok(EntityKind::Season),
            "stage" => Ok(EntityKind::Stage),
            "round" => Ok(EntityKind::Round),
            "match" | "sport_event" => Ok(EntityKind::Match),
            _ => Err(Error::InvalidEntity(format!("Unknown entity kind: {}", s))),
        }
    }
}

/// A node of the upstream hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<EntityRef>>,
}

impl EntityRef {
    /// A root reference (no parent)
    pub fn root(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            parent: None,
        }
    }

    /// A child reference discovered through this node's index
    pub fn child(&self, kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Path from the root down to this node, e.g. `season:sr:season:1/match:sr:sport_event:2`
    pub fn path(&self) -> String {
        let mut parts = vec![format!("{}:{}", self.kind, self.id)];
        let mut current = self.parent.as_deref();
        while let Some(node) = current {
            parts.push(format!("{}:{}", node.kind, node.id));
            current = node.parent.as_deref();
        }
        parts.reverse();
        parts.join("/")
    }
}

impl FromStr for EntityRef {
    type Err = Error;

    /// Parse `kind:id`, where the id itself may contain colons (`season:sr:season:1`)
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidEntity(format!("Expected kind:id, got '{}'", s)))?;
        if id.trim().is_empty() {
            return Err(Error::InvalidEntity(format!("Empty id in '{}'", s)));
        }
        Ok(EntityRef::root(kind.parse()?, id.trim()))
    }
}

/// Which side of the fixture a team played
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn from_qualifier(qualifier: &str) -> Option<Self> {
        match qualifier {
            "home" => Some(Side::Home),
            "away" => Some(Side::Away),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

/// Whether a team record was read from the document or summed from its players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatOrigin {
    Observed,
    Derived,
}

impl StatOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            StatOrigin::Observed => "observed",
            StatOrigin::Derived => "derived",
        }
    }
}

/// Fixed statistics vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Goals,
    Assists,
    OwnGoals,
    ShotsTotal,
    ShotsOnTarget,
    ShotsOffTarget,
    ShotsBlocked,
    PassesTotal,
    PassesSuccessful,
    PassesUnsuccessful,
    LongPassesTotal,
    LongPassesSuccessful,
    CrossesTotal,
    CrossesSuccessful,
    ChancesCreated,
    DribblesCompleted,
    TacklesTotal,
    TacklesSuccessful,
    Interceptions,
    Clearances,
    DefensiveBlocks,
    Fouls,
    WasFouled,
    Offsides,
    CornerKicks,
    YellowCards,
    YellowRedCards,
    RedCards,
    LossOfPossession,
    DivingSaves,
    FreeKicks,
    ThrowIns,
    GoalKicks,
    Substitutions,
    BallPossession,
}

impl Metric {
    /// Column order of the metric columns in every stats table
    pub const ALL: [Metric; 35] = [
        Metric::Goals,
        Metric::Assists,
        Metric::OwnGoals,
        Metric::ShotsTotal,
        Metric::ShotsOnTarget,
        Metric::ShotsOffTarget,
        Metric::ShotsBlocked,
        Metric::PassesTotal,
        Metric::PassesSuccessful,
        Metric::PassesUnsuccessful,
        Metric::LongPassesTotal,
        Metric::LongPassesSuccessful,
        Metric::CrossesTotal,
        Metric::CrossesSuccessful,
        Metric::ChancesCreated,
        Metric::DribblesCompleted,
        Metric::TacklesTotal,
        Metric::TacklesSuccessful,
        Metric::Interceptions,
        Metric::Clearances,
        Metric::DefensiveBlocks,
        Metric::Fouls,
        Metric::WasFouled,
        Metric::Offsides,
        Metric::CornerKicks,
        Metric::YellowCards,
        Metric::YellowRedCards,
        Metric::RedCards,
        Metric::LossOfPossession,
        Metric::DivingSaves,
        Metric::FreeKicks,
        Metric::ThrowIns,
        Metric::GoalKicks,
        Metric::Substitutions,
        Metric::BallPossession,
    ];

    /// Column name of the metric
    pub fn name(self) -> &'static str {
        match self {
            Metric::Goals => "goals",
            Metric::Assists => "assists",
            Metric::OwnGoals => "own_goals",
            Metric::ShotsTotal => "shots_total",
            Metric::ShotsOnTarget => "shots_on_target",
            Metric::ShotsOffTarget => "shots_off_target",
            Metric::ShotsBlocked => "shots_blocked",
            Metric::PassesTotal => "passes_total",
            Metric::PassesSuccessful => "passes_successful",
            Metric::PassesUnsuccessful => "passes_unsuccessful",
            Metric::LongPassesTotal => "long_passes_total",
            Metric::LongPassesSuccessful => "long_passes_successful",
            Metric::CrossesTotal => "crosses_total",
            Metric::CrossesSuccessful => "crosses_successful",
            Metric::ChancesCreated => "chances_created",
            Metric::DribblesCompleted => "dribbles_completed",
            Metric::TacklesTotal => "tackles_total",
            Metric::TacklesSuccessful => "tackles_successful",
            Metric::Interceptions => "interceptions",
            Metric::Clearances => "clearances",
            Metric::DefensiveBlocks => "defensive_blocks",
            Metric::Fouls => "fouls",
            Metric::WasFouled => "was_fouled",
            Metric::Offsides => "offsides",
            Metric::CornerKicks => "corner_kicks",
            Metric::YellowCards => "yellow_cards",
            Metric::YellowRedCards => "yellow_red_cards",
            Metric::RedCards => "red_cards",
            Metric::LossOfPossession => "loss_of_possession",
            Metric::DivingSaves => "diving_saves",
            Metric::FreeKicks => "free_kicks",
            Metric::ThrowIns => "throw_ins",
            Metric::GoalKicks => "goal_kicks",
            Metric::Substitutions => "substitutions",
            Metric::BallPossession => "ball_possession",
        }
    }

    /// Whether the team value equals the sum of the player values.
    ///
    /// Percentages and rates are not additive: averaging player shares does
    /// not give the team share, so derived team records leave them unset.
    pub fn is_additive(self) -> bool {
        !matches!(self, Metric::BallPossession)
    }

    /// Map a source attribute name to the vocabulary
    pub fn from_source(attribute: &str) -> Option<Self> {
        match attribute {
            "goals_scored" | "goals" => Some(Metric::Goals),
            "fouls_committed" | "fouls" => Some(Metric::Fouls),
            other => Metric::ALL.iter().copied().find(|m| m.name() == other),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Observed metric values. A metric absent from the set is missing, which is
/// not the same thing as a recorded zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet(BTreeMap<Metric, f64>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.0.insert(metric, value);
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn is_missing(&self, metric: Metric) -> bool {
        !self.0.contains_key(&metric)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }
}

impl FromIterator<(Metric, f64)> for MetricSet {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Final score of a played match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home: u32,
    pub away: u32,
}

/// One row of the matches table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub competition_id: String,
    pub season_id: String,
    pub date: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub final_score: Option<FinalScore>,
    pub competition_name: Option<String>,
    pub season_name: Option<String>,
    pub round_number: Option<u32>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub venue_name: Option<String>,
    pub venue_city: Option<String>,
    pub venue_capacity: Option<u32>,
    pub attendance: Option<u32>,
    pub status: Option<String>,
    pub match_status: Option<String>,
    /// Which statistics the source document carried
    pub coverage: CoverageKind,
}

impl MatchRecord {
    /// Side played by a team, if it took part in this match
    pub fn side_of(&self, team_id: &str) -> Option<Side> {
        if team_id == self.home_team_id {
            Some(Side::Home)
        } else if team_id == self.away_team_id {
            Some(Side::Away)
        } else {
            None
        }
    }

    /// Goals scored by one side, when the match has a result
    pub fn score_for(&self, side: Side) -> Option<u32> {
        self.final_score.map(|s| match side {
            Side::Home => s.home,
            Side::Away => s.away,
        })
    }
}

/// One row of the team_stats table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStatRecord {
    pub match_id: String,
    pub team_id: String,
    pub team_name: Option<String>,
    pub role: Side,
    pub score: Option<u32>,
    pub metrics: MetricSet,
    pub origin: StatOrigin,
}

/// One row of the player_stats table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatRecord {
    pub match_id: String,
    pub team_id: String,
    pub team_name: Option<String>,
    pub player_id: String,
    pub player_name: Option<String>,
    pub starter: Option<bool>,
    pub minutes_played: Option<u32>,
    pub metrics: MetricSet,
}

/// Statistics carried by one match document
#[derive(Debug, Clone, PartialEq)]
pub enum StatCoverage {
    /// Team-level records were present (player rows may still be empty)
    TeamStats {
        teams: Vec<TeamStatRecord>,
        players: Vec<PlayerStatRecord>,
    },
    /// Only per-player rows; team records must be derived
    PlayersOnly { players: Vec<PlayerStatRecord> },
    /// No statistics at all (typically a match not yet played)
    Neither,
}

impl StatCoverage {
    /// Build the variant that matches what was found
    pub fn from_parts(teams: Vec<TeamStatRecord>, players: Vec<PlayerStatRecord>) -> Self {
        match (teams.is_empty(), players.is_empty()) {
            (false, _) => StatCoverage::TeamStats { teams, players },
            (true, false) => StatCoverage::PlayersOnly { players },
            (true, true) => StatCoverage::Neither,
        }
    }

    pub fn kind(&self) -> CoverageKind {
        match self {
            StatCoverage::TeamStats { .. } => CoverageKind::TeamStats,
            StatCoverage::PlayersOnly { .. } => CoverageKind::PlayersOnly,
            StatCoverage::Neither => CoverageKind::Neither,
        }
    }

    pub fn players(&self) -> &[PlayerStatRecord] {
        match self {
            StatCoverage::TeamStats { players, .. } | StatCoverage::PlayersOnly { players } => {
                players
            }
            StatCoverage::Neither => &[],
        }
    }

    /// Keep the first row of each player and return the ones dropped
    pub fn dedup_players(&mut self) -> Vec<PlayerStatRecord> {
        let players = match self {
            StatCoverage::TeamStats { players, .. } | StatCoverage::PlayersOnly { players } => {
                players
            }
            StatCoverage::Neither => return Vec::new(),
        };

        let mut seen = HashSet::new();
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(players)
            .into_iter()
            .partition(|p| seen.insert(p.player_id.clone()));
        *players = kept;
        dropped
    }
}

/// Tag of [`StatCoverage`] stored on the match row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageKind {
    TeamStats,
    PlayersOnly,
    Neither,
}

impl CoverageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CoverageKind::TeamStats => "team_stats",
            CoverageKind::PlayersOnly => "players_only",
            CoverageKind::Neither => "neither",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ref_parse() {
        let root: EntityRef = "season:sr:season:106501".parse().unwrap();
        assert_eq!(root.kind, EntityKind::Season);
        assert_eq!(root.id, "sr:season:106501");
        assert!(root.parent.is_none());

        assert!("sr:season:1".parse::<EntityRef>().is_err());
        assert!("season:".parse::<EntityRef>().is_err());
        assert!("season".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_entity_path() {
        let season = EntityRef::root(EntityKind::Season, "s1");
        let m = season.child(EntityKind::Match, "m1");
        assert_eq!(m.path(), "season:s1/match:m1");
    }

    #[test]
    fn test_metric_source_aliases() {
        assert_eq!(Metric::from_source("goals_scored"), Some(Metric::Goals));
        assert_eq!(Metric::from_source("fouls_committed"), Some(Metric::Fouls));
        assert_eq!(Metric::from_source("fouls"), Some(Metric::Fouls));
        assert_eq!(Metric::from_source("shots_total"), Some(Metric::ShotsTotal));
        assert_eq!(Metric::from_source("minutes_played"), None);
        assert_eq!(Metric::from_source("expected_goals_on_target"), None);
    }

    #[test]
    fn test_only_possession_is_non_additive() {
        let non_additive: Vec<Metric> = Metric::ALL
            .iter()
            .copied()
            .filter(|m| !m.is_additive())
            .collect();
        assert_eq!(non_additive, vec![Metric::BallPossession]);
    }

    #[test]
    fn test_metric_set_missing_vs_zero() {
        let mut set = MetricSet::new();
        set.insert(Metric::RedCards, 0.0);
        assert_eq!(set.get(Metric::RedCards), Some(0.0));
        assert!(!set.is_missing(Metric::RedCards));
        assert!(set.is_missing(Metric::YellowCards));
        assert_eq!(set.get(Metric::YellowCards), None);
    }

    #[test]
    fn test_coverage_from_parts() {
        assert_eq!(
            StatCoverage::from_parts(Vec::new(), Vec::new()).kind(),
            CoverageKind::Neither
        );
    }
}
