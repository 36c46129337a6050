//! Child discovery inside index documents

use crate::models::{EntityKind, EntityRef};
use crate::parse::attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;

/// List the children of `parent` found in its index document, in document order.
///
/// A child is any element naming a strictly deeper entity kind that carries
/// an `id`. Its subtree is not searched further, so a `sport_event` that
/// repeats its own season in a nested context does not yield that season
/// again. Repeated ids keep their first position.
pub fn parse_children(parent: &EntityRef, bytes: &[u8]) -> Result<Vec<EntityRef>, String> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut children = Vec::new();
    let mut seen = HashSet::new();
    // Depth inside an already-collected child; 0 when not inside one
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if skip_depth > 0 {
                    skip_depth += 1;
                } else if let Some(child) = child_of(parent, &e) {
                    if seen.insert((child.kind, child.id.clone())) {
                        children.push(child);
                    }
                    skip_depth = 1;
                }
            }
            Ok(Event::Empty(e)) => {
                if skip_depth == 0 {
                    if let Some(child) = child_of(parent, &e) {
                        if seen.insert((child.kind, child.id.clone())) {
                            children.push(child);
                        }
                    }
                }
            }
            Ok(Event::End(_)) => skip_depth = skip_depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "invalid XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
        buf.clear();
    }

    Ok(children)
}

fn child_of(parent: &EntityRef, element: &BytesStart<'_>) -> Option<EntityRef> {
    let kind = EntityKind::from_element(element.local_name().as_ref())?;
    if kind <= parent.kind {
        return None;
    }
    let id = attribute(element, b"id")?;
    if id.trim().is_empty() {
        return None;
    }
    Some(parent.child(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_schedule_lists_matches() {
        let xml = r#"<?xml version="1.0"?>
<schedules xmlns="http://schemas.sportradar.com/sportsapi/soccer-extended/v4">
  <schedule>
    <sport_event id="sr:sport_event:1" start_time="2024-08-15T17:00:00+00:00">
      <sport_event_context>
        <competition id="sr:competition:8" name="LaLiga"/>
        <season id="sr:season:118691" name="LaLiga 24/25"/>
        <round number="1"/>
      </sport_event_context>
    </sport_event>
  </schedule>
  <schedule>
    <sport_event id="sr:sport_event:2"/>
  </schedule>
  <schedule>
    <sport_event id="sr:sport_event:1"/>
  </schedule>
</schedules>"#;

        let season = EntityRef::root(EntityKind::Season, "sr:season:118691");
        let children = parse_children(&season, xml.as_bytes()).unwrap();

        let ids: Vec<&str> = children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["sr:sport_event:1", "sr:sport_event:2"]);
        assert!(children.iter().all(|c| c.kind == EntityKind::Match));
        assert_eq!(
            children[0].path(),
            "season:sr:season:118691/match:sr:sport_event:1"
        );
    }

    #[test]
    fn test_competition_index_skips_own_level() {
        let xml = r#"<competition_seasons>
  <competition id="sr:competition:8" name="LaLiga"/>
  <seasons>
    <season id="sr:season:106501" name="22/23" competition_id="sr:competition:8"/>
    <season id="sr:season:118691" name="24/25" competition_id="sr:competition:8"/>
    <season name="no id"/>
  </seasons>
</competition_seasons>"#;

        let competition = EntityRef::root(EntityKind::Competition, "sr:competition:8");
        let children = parse_children(&competition, xml.as_bytes()).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].kind, EntityKind::Season);
        assert_eq!(children[1].id, "sr:season:118691");
    }

    #[test]
    fn test_invalid_index() {
        let season = EntityRef::root(EntityKind::Season, "s");
        assert!(parse_children(&season, b"<schedules><a></b></schedules>").is_err());
    }
}
