//! Match document parsing
//!
//! A match document is read in a single streaming pass. The header
//! (identifiers, date, sides, venue, result) becomes a [`MatchRecord`];
//! the `statistics/totals` section becomes team and player records.
//! Which of those were present decides the [`StatCoverage`] variant.

mod stats;
mod xml;

pub(crate) use stats::parse_count;
pub(crate) use xml::{attribute, attributes, local_name};

use crate::models::{
    CoverageKind, FinalScore, MatchRecord, PlayerStatRecord, Side, StatCoverage, StatOrigin,
    TeamStatRecord,
};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use stats::read_statistics;
use thiserror::Error;

/// Why a document could not be turned into a match record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("malformed XML at byte {position}: {reason}")]
    Malformed { position: u64, reason: String },

    #[error("missing required field {0}")]
    MissingRequiredField(&'static str),

    #[error("invalid value '{value}' for {field}")]
    InvalidField { field: &'static str, value: String },
}

/// Result of parsing one match document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMatch {
    pub record: MatchRecord,
    pub coverage: StatCoverage,
    /// Non-fatal oddities (unusable optional values, statistics for unknown sides)
    pub warnings: Vec<String>,
}

/// Parse a raw match document
pub fn parse_match(bytes: &[u8]) -> Result<ParsedMatch, ParseFailure> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut draft = MatchDraft::default();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                saw_root = true;
                draft.open(&e, &stack);
                stack.push(local_name(&e));
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                draft.open(&e, &stack);
                draft.close(e.local_name().as_ref(), &stack);
            }
            Ok(Event::End(e)) => {
                stack.pop();
                draft.close(e.local_name().as_ref(), &stack);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseFailure::Malformed {
                    position: reader.buffer_position() as u64,
                    reason: e.to_string(),
                })
            }
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseFailure::Malformed {
            position: 0,
            reason: "no root element".to_string(),
        });
    }
    if !stack.is_empty() {
        return Err(ParseFailure::Malformed {
            position: reader.buffer_position() as u64,
            reason: format!("document truncated with {} unclosed element(s)", stack.len()),
        });
    }

    draft.finish()
}

#[derive(Debug, Default)]
struct Competitor {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default)]
struct TeamDraft {
    id: Option<String>,
    name: Option<String>,
    metrics: Option<crate::models::MetricSet>,
    players: Vec<PlayerDraft>,
}

#[derive(Debug, Default)]
struct PlayerDraft {
    id: Option<String>,
    name: Option<String>,
    starter: Option<bool>,
    minutes_played: Option<u32>,
    metrics: crate::models::MetricSet,
}

#[derive(Debug, Default)]
struct MatchDraft {
    id: Option<String>,
    start_time: Option<String>,
    competition_id: Option<String>,
    competition_name: Option<String>,
    season_id: Option<String>,
    season_name: Option<String>,
    round_number: Option<String>,
    home: Competitor,
    away: Competitor,
    venue_name: Option<String>,
    venue_city: Option<String>,
    venue_capacity: Option<String>,
    attendance: Option<String>,
    seen_status: bool,
    status: Option<String>,
    match_status: Option<String>,
    home_score: Option<String>,
    away_score: Option<String>,
    teams: Vec<TeamDraft>,
    team: Option<TeamDraft>,
    player: Option<PlayerDraft>,
    warnings: Vec<String>,
}

fn within(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.iter().any(|n| n.as_slice() == name)
}

fn parent_is(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.last().is_some_and(|n| n.as_slice() == name)
}

impl MatchDraft {
    fn open(&mut self, e: &BytesStart<'_>, stack: &[Vec<u8>]) {
        let in_totals = within(stack, b"totals");
        let in_stats = within(stack, b"statistics");
        let in_context = within(stack, b"sport_event_context");

        match e.local_name().as_ref() {
            b"sport_event" if !in_stats && self.id.is_none() => {
                self.id = attribute(e, b"id");
                self.start_time = attribute(e, b"start_time");
            }
            b"competition" if in_context && self.competition_id.is_none() => {
                self.competition_id = attribute(e, b"id");
                self.competition_name = attribute(e, b"name");
            }
            b"season" if in_context && self.season_id.is_none() => {
                self.season_id = attribute(e, b"id");
                self.season_name = attribute(e, b"name");
            }
            b"round" if in_context && self.round_number.is_none() => {
                self.round_number = attribute(e, b"number");
            }
            b"competitor" if in_totals && parent_is(stack, b"competitors") => {
                self.team = Some(TeamDraft {
                    id: attribute(e, b"id"),
                    name: attribute(e, b"name"),
                    ..TeamDraft::default()
                });
            }
            b"competitor"
                if !in_stats
                    && within(stack, b"sport_event")
                    && parent_is(stack, b"competitors") =>
            {
                let side = attribute(e, b"qualifier")
                    .as_deref()
                    .and_then(Side::from_qualifier);
                let slot = match side {
                    Some(Side::Home) => &mut self.home,
                    Some(Side::Away) => &mut self.away,
                    None => return,
                };
                if slot.id.is_none() {
                    slot.id = attribute(e, b"id");
                    slot.name = attribute(e, b"name");
                }
            }
            b"venue" if !in_stats && within(stack, b"sport_event") && self.venue_name.is_none() => {
                self.venue_name = attribute(e, b"name");
                self.venue_city = attribute(e, b"city_name");
                self.venue_capacity = attribute(e, b"capacity");
            }
            b"attendance" if within(stack, b"sport_event_conditions") => {
                self.attendance = attribute(e, b"count");
            }
            b"sport_event_status" if !in_stats && !self.seen_status => {
                self.seen_status = true;
                self.status = attribute(e, b"status");
                self.match_status = attribute(e, b"match_status");
                self.home_score = attribute(e, b"home_score");
                self.away_score = attribute(e, b"away_score");
            }
            b"player" if in_totals && parent_is(stack, b"players") && self.team.is_some() => {
                self.player = Some(PlayerDraft {
                    id: attribute(e, b"id"),
                    name: attribute(e, b"name"),
                    starter: attribute(e, b"starter").and_then(|s| match s.as_str() {
                        "true" | "1" => Some(true),
                        "false" | "0" => Some(false),
                        _ => None,
                    }),
                    ..PlayerDraft::default()
                });
            }
            b"statistics" if in_totals && parent_is(stack, b"player") => {
                let reading = read_statistics(attributes(e));
                self.note_invalid("player statistics", &reading.invalid);
                if let Some(player) = self.player.as_mut() {
                    player.metrics = reading.metrics;
                    player.minutes_played = reading.minutes_played;
                }
            }
            b"statistics" if in_totals && parent_is(stack, b"competitor") => {
                let pairs = attributes(e);
                if pairs.is_empty() {
                    return;
                }
                let reading = read_statistics(pairs);
                self.note_invalid("team statistics", &reading.invalid);
                if let Some(team) = self.team.as_mut() {
                    team.metrics = Some(reading.metrics);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8], stack: &[Vec<u8>]) {
        if !within(stack, b"totals") {
            return;
        }
        match name {
            b"player" => {
                if let (Some(player), Some(team)) = (self.player.take(), self.team.as_mut()) {
                    team.players.push(player);
                }
            }
            b"competitor" => {
                if let Some(team) = self.team.take() {
                    self.teams.push(team);
                }
            }
            _ => {}
        }
    }

    fn note_invalid(&mut self, context: &str, invalid: &[(String, String)]) {
        for (key, value) in invalid {
            self.warnings
                .push(format!("{}: unusable value '{}' for {}", context, value, key));
        }
    }

    fn optional_count(&mut self, field: &str, value: Option<String>) -> Option<u32> {
        let value = value?;
        let parsed = parse_count(&value);
        if parsed.is_none() {
            self.warnings
                .push(format!("unusable value '{}' for {}", value, field));
        }
        parsed
    }

    fn finish(mut self) -> Result<ParsedMatch, ParseFailure> {
        let match_id = self
            .id
            .take()
            .ok_or(ParseFailure::MissingRequiredField("sport_event.id"))?;
        let raw_start = self
            .start_time
            .take()
            .ok_or(ParseFailure::MissingRequiredField("sport_event.start_time"))?;
        let date = DateTime::parse_from_rfc3339(&raw_start)
            .map_err(|_| ParseFailure::InvalidField {
                field: "sport_event.start_time",
                value: raw_start.clone(),
            })?
            .with_timezone(&Utc);
        let competition_id = self
            .competition_id
            .take()
            .ok_or(ParseFailure::MissingRequiredField("competition.id"))?;
        let season_id = self
            .season_id
            .take()
            .ok_or(ParseFailure::MissingRequiredField("season.id"))?;
        let home_team_id = self
            .home
            .id
            .take()
            .ok_or(ParseFailure::MissingRequiredField("competitor[home].id"))?;
        let away_team_id = self
            .away
            .id
            .take()
            .ok_or(ParseFailure::MissingRequiredField("competitor[away].id"))?;

        let final_score = match (self.home_score.take(), self.away_score.take()) {
            (Some(h), Some(a)) => match (parse_count(&h), parse_count(&a)) {
                (Some(home), Some(away)) => Some(FinalScore { home, away }),
                _ => {
                    self.warnings
                        .push(format!("unusable score '{}'-'{}'", h, a));
                    None
                }
            },
            _ => None,
        };

        let round = self.round_number.take();
        let capacity = self.venue_capacity.take();
        let attendance = self.attendance.take();

        let mut record = MatchRecord {
            match_id,
            competition_id,
            season_id,
            date,
            home_team_id,
            away_team_id,
            final_score,
            competition_name: self.competition_name.take(),
            season_name: self.season_name.take(),
            round_number: self.optional_count("round.number", round),
            home_team_name: self.home.name.take(),
            away_team_name: self.away.name.take(),
            venue_name: self.venue_name.take(),
            venue_city: self.venue_city.take(),
            venue_capacity: self.optional_count("venue.capacity", capacity),
            attendance: self.optional_count("attendance.count", attendance),
            status: self.status.take(),
            match_status: self.match_status.take(),
            coverage: CoverageKind::Neither,
        };

        let mut teams = Vec::new();
        let mut players = Vec::new();

        for draft in std::mem::take(&mut self.teams) {
            let Some(team_id) = draft.id else {
                self.warnings
                    .push("statistics for a competitor without id".to_string());
                continue;
            };

            match (record.side_of(&team_id), draft.metrics) {
                (Some(role), Some(metrics)) => {
                    teams.push(TeamStatRecord {
                        match_id: record.match_id.clone(),
                        team_id: team_id.clone(),
                        team_name: draft.name.clone(),
                        role,
                        score: record.score_for(role),
                        metrics,
                        origin: StatOrigin::Observed,
                    });
                }
                (_, Some(_)) => self.warnings.push(format!(
                    "team statistics for {} which is not a side of the match",
                    team_id
                )),
                _ => {}
            }

            for player in draft.players {
                let Some(player_id) = player.id else {
                    self.warnings
                        .push(format!("player without id in team {}", team_id));
                    continue;
                };
                players.push(PlayerStatRecord {
                    match_id: record.match_id.clone(),
                    team_id: team_id.clone(),
                    team_name: draft.name.clone(),
                    player_id,
                    player_name: player.name,
                    starter: player.starter,
                    minutes_played: player.minutes_played,
                    metrics: player.metrics,
                });
            }
        }

        teams.sort_by_key(|t| t.role);
        let coverage = StatCoverage::from_parts(teams, players);
        record.coverage = coverage.kind();

        Ok(ParsedMatch {
            record,
            coverage,
            warnings: self.warnings,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::models::Metric;

    #[test]
    fn test_parse_full_document() {
        let xml = document(
            &header("sr:sport_event:1", ("sr:competitor:A", "Athletic"), ("sr:competitor:B", "Getafe")),
            Some((1, 0)),
            &[
                competitor(
                    "sr:competitor:A",
                    "home",
                    Some(r#"ball_possession="61" shots_total="14" red_cards="0""#),
                    &[player("p1", r#"goals_scored="1" shots_total="3""#)],
                ),
                competitor(
                    "sr:competitor:B",
                    "away",
                    Some(r#"ball_possession="39" shots_total="6""#),
                    &[player("p2", r#"shots_total="2""#)],
                ),
            ],
        );

        let parsed = parse_match(xml.as_bytes()).unwrap();
        let record = &parsed.record;
        assert_eq!(record.match_id, "sr:sport_event:1");
        assert_eq!(record.competition_id, "sr:competition:8");
        assert_eq!(record.competition_name.as_deref(), Some("LaLiga"));
        assert_eq!(record.season_id, "sr:season:118691");
        assert_eq!(record.round_number, Some(1));
        assert_eq!(record.home_team_id, "sr:competitor:A");
        assert_eq!(record.away_team_name.as_deref(), Some("Getafe"));
        assert_eq!(record.final_score, Some(FinalScore { home: 1, away: 0 }));
        assert_eq!(record.venue_capacity, Some(48000));
        assert_eq!(record.attendance, Some(45000));
        assert_eq!(record.status.as_deref(), Some("closed"));
        assert_eq!(record.coverage, CoverageKind::TeamStats);
        assert_eq!(record.date.to_rfc3339(), "2024-08-16T19:00:00+00:00");

        let StatCoverage::TeamStats { teams, players } = &parsed.coverage else {
            panic!("expected team statistics");
        };
        assert_eq!(teams.len(), 2);
        assert_eq!(teams[0].role, Side::Home);
        assert_eq!(teams[0].score, Some(1));
        assert_eq!(teams[0].origin, StatOrigin::Observed);
        assert_eq!(teams[0].metrics.get(Metric::ShotsTotal), Some(14.0));
        assert_eq!(teams[0].metrics.get(Metric::RedCards), Some(0.0));
        assert!(teams[0].metrics.is_missing(Metric::YellowCards));
        assert_eq!(teams[1].score, Some(0));

        assert_eq!(players.len(), 2);
        assert_eq!(players[0].team_id, "sr:competitor:A");
        assert_eq!(players[0].metrics.get(Metric::Goals), Some(1.0));
        assert_eq!(players[0].minutes_played, Some(90));
        assert_eq!(players[0].starter, Some(true));
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_parse_players_only() {
        let xml = document(
            &header("m2", ("C", "Celta"), ("D", "Deportivo")),
            Some((2, 2)),
            &[
                competitor("C", "home", None, &[player("c1", r#"shots_total="3""#)]),
                competitor("D", "away", None, &[player("d1", r#"shots_total="1""#)]),
            ],
        );

        let parsed = parse_match(xml.as_bytes()).unwrap();
        assert_eq!(parsed.record.coverage, CoverageKind::PlayersOnly);
        assert_eq!(parsed.coverage.players().len(), 2);
    }

    #[test]
    fn test_parse_not_started_has_no_statistics() {
        let xml = document(&header("m3", ("A", "a"), ("B", "b")), None, &[]);

        let parsed = parse_match(xml.as_bytes()).unwrap();
        assert_eq!(parsed.coverage, StatCoverage::Neither);
        assert_eq!(parsed.record.final_score, None);
        assert_eq!(parsed.record.match_status.as_deref(), Some("not_started"));
    }

    #[test]
    fn test_missing_required_fields() {
        let xml = document(&header("m4", ("A", "a"), ("B", "b")), None, &[])
            .replace(r#"<competition id="sr:competition:8" name="LaLiga"/>"#, "");
        assert_eq!(
            parse_match(xml.as_bytes()).unwrap_err(),
            ParseFailure::MissingRequiredField("competition.id")
        );

        let xml = document(&header("m4", ("A", "a"), ("B", "b")), None, &[])
            .replace(r#"qualifier="away""#, "");
        assert_eq!(
            parse_match(xml.as_bytes()).unwrap_err(),
            ParseFailure::MissingRequiredField("competitor[away].id")
        );
    }

    #[test]
    fn test_invalid_start_time() {
        let xml = document(&header("m5", ("A", "a"), ("B", "b")), None, &[])
            .replace("2024-08-16T19:00:00+00:00", "yesterday");
        assert!(matches!(
            parse_match(xml.as_bytes()).unwrap_err(),
            ParseFailure::InvalidField { field: "sport_event.start_time", .. }
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            parse_match(b"<sport_event_summary><sport_event id='x'>").unwrap_err(),
            ParseFailure::Malformed { .. }
        ));
        assert!(matches!(
            parse_match(b"").unwrap_err(),
            ParseFailure::Malformed { .. }
        ));
    }

    #[test]
    fn test_statistics_for_foreign_team_are_flagged() {
        let xml = document(
            &header("m6", ("A", "a"), ("B", "b")),
            Some((0, 0)),
            &[
                competitor("A", "home", Some(r#"shots_total="1""#), &[]),
                competitor("Z", "visitor", Some(r#"shots_total="2""#), &[]),
            ],
        );

        let parsed = parse_match(xml.as_bytes()).unwrap();
        let StatCoverage::TeamStats { teams, .. } = &parsed.coverage else {
            panic!("expected team statistics");
        };
        assert_eq!(teams.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
    }
}
