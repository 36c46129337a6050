//! Statistics attribute normalization

use crate::models::{Metric, MetricSet};
use tracing::debug;

/// Metrics read from one `<statistics>` element
#[derive(Debug, Default)]
pub(crate) struct StatReading {
    pub metrics: MetricSet,
    pub minutes_played: Option<u32>,
    /// Attributes with a known name but an unusable value
    pub invalid: Vec<(String, String)>,
}

/// Map source attributes onto the metric vocabulary.
///
/// Unknown attributes are ignored. An attribute that is present with a
/// numeric value is recorded even when the value is zero.
pub(crate) fn read_statistics(pairs: Vec<(String, String)>) -> StatReading {
    let mut reading = StatReading::default();

    for (key, value) in pairs {
        if key == "minutes_played" {
            match parse_count(&value) {
                Some(minutes) => reading.minutes_played = Some(minutes),
                None => reading.invalid.push((key, value)),
            }
            continue;
        }

        let Some(metric) = Metric::from_source(&key) else {
            debug!("Ignoring statistic attribute {}", key);
            continue;
        };

        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => reading.metrics.insert(metric, v),
            _ => reading.invalid.push((key, value)),
        }
    }

    reading
}

/// Non-negative whole number, tolerating a trailing `.0`
pub(crate) fn parse_count(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<u32>() {
        return Some(n);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => {
            Some(v as u32)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_read_statistics() {
        let reading = read_statistics(pairs(&[
            ("goals_scored", "1"),
            ("red_cards", "0"),
            ("minutes_played", "90"),
            ("ball_possession", "54.5"),
            ("shots_total", "n/a"),
            ("something_new", "3"),
        ]));

        assert_eq!(reading.metrics.get(Metric::Goals), Some(1.0));
        assert_eq!(reading.metrics.get(Metric::RedCards), Some(0.0));
        assert_eq!(reading.metrics.get(Metric::BallPossession), Some(54.5));
        assert!(reading.metrics.is_missing(Metric::ShotsTotal));
        assert!(reading.metrics.is_missing(Metric::YellowCards));
        assert_eq!(reading.minutes_played, Some(90));
        assert_eq!(reading.invalid.len(), 1);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("12"), Some(12));
        assert_eq!(parse_count(" 7.0 "), Some(7));
        assert_eq!(parse_count("7.5"), None);
        assert_eq!(parse_count("-1"), None);
        assert_eq!(parse_count(""), None);
    }
}
