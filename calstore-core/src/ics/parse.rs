//! ICS parsing using the icalendar crate's parser.

use icalendar::parser::{self, read_calendar, unfold};

use crate::component::{Component, Property};
use crate::error::{CalError, CalResult};

/// Parse a single component.
///
/// Bare components (`BEGIN:VEVENT ... END:VEVENT`) come back as themselves; a
/// full `VCALENDAR` comes back as the calendar component with its children.
pub fn parse_component(text: &str) -> CalResult<Component> {
    let (wrapped, calendar) = read(text)?;
    if !wrapped {
        return Ok(calendar);
    }

    let mut components = calendar.components;
    if components.len() != 1 || !calendar.properties.is_empty() {
        return Err(CalError::InvalidObject(format!(
            "expected exactly one component, found {}",
            components.len()
        )));
    }
    Ok(components.remove(0))
}

/// Parse text into a `VCALENDAR`, wrapping a bare component if needed.
///
/// The flag is true when the input was a bare component.
pub fn parse_container(text: &str) -> CalResult<(bool, Component)> {
    read(text)
}

fn read(text: &str) -> CalResult<(bool, Component)> {
    let trimmed = text.trim_start_matches(['\u{feff}', ' ', '\t', '\r', '\n']);
    if trimmed.trim().is_empty() {
        return Err(CalError::InvalidObject("empty calendar data".to_string()));
    }

    let is_calendar = trimmed
        .get(..15)
        .map(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
        .unwrap_or(false);

    let source = if is_calendar {
        trimmed.to_string()
    } else {
        if !trimmed
            .get(..6)
            .map(|head| head.eq_ignore_ascii_case("BEGIN:"))
            .unwrap_or(false)
        {
            return Err(CalError::InvalidObject(
                "calendar data must start with BEGIN:".to_string(),
            ));
        }
        format!("BEGIN:VCALENDAR\r\n{}\r\nEND:VCALENDAR\r\n", trimmed.trim_end())
    };

    let unfolded = unfold(&source);
    let calendar = read_calendar(&unfolded).map_err(|e| CalError::InvalidObject(e.to_string()))?;

    let mut root = Component::new("VCALENDAR");
    root.properties = calendar.properties.iter().map(to_property).collect();
    root.components = calendar.components.iter().map(to_component).collect();

    if !is_calendar && root.components.is_empty() {
        return Err(CalError::InvalidObject("no component found".to_string()));
    }

    Ok((!is_calendar, root))
}

fn to_component(comp: &parser::Component) -> Component {
    let mut out = Component::new(comp.name.to_string());
    out.properties = comp.properties.iter().map(to_property).collect();
    out.components = comp.components.iter().map(to_component).collect();
    out
}

fn to_property(prop: &parser::Property) -> Property {
    let mut out = Property::new(prop.name.to_string(), prop.val.to_string());
    out.params = prop
        .params
        .iter()
        .map(|p| {
            (
                p.key.to_string().to_ascii_uppercase(),
                p.val.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            )
        })
        .collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::serialize_component;
    use crate::time::EventTime;

    const RECURRING_OVERRIDE: &str = "BEGIN:VEVENT\r\n\
UID:weekly-1\r\n\
RECURRENCE-ID;TZID=Europe/Berlin:20240108T100000\r\n\
DTSTART;TZID=Europe/Berlin:20240108T110000\r\n\
DTEND;TZID=Europe/Berlin:20240108T120000\r\n\
SEQUENCE:3\r\n\
CREATED:20231201T080000Z\r\n\
LAST-MODIFIED:20231202T080000Z\r\n\
SUMMARY:Moved standup\r\n\
X-CUSTOM-THING;X-PARAM=1:keep me\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
TRIGGER:-PT15M\r\n\
END:VALARM\r\n\
END:VEVENT\r\n";

    #[test]
    fn test_parse_bare_component() {
        let comp = parse_component(RECURRING_OVERRIDE).expect("Should parse");

        assert_eq!(comp.name, "VEVENT");
        assert_eq!(comp.uid(), Some("weekly-1"));
        assert_eq!(comp.rid().as_deref(), Some("20240108T100000"));
        assert_eq!(comp.sequence(), Some(3));
        assert!(comp.has_alarms(), "VALARM should be kept as a subcomponent");
        assert!(matches!(comp.dtstart(), Some(EventTime::DateTimeZoned { .. })));
    }

    #[test]
    fn test_understood_fields_round_trip() {
        let comp = parse_component(RECURRING_OVERRIDE).unwrap();
        let reparsed = parse_component(&serialize_component(&comp)).unwrap();

        assert_eq!(reparsed.uid(), comp.uid());
        assert_eq!(reparsed.recurrence_id(), comp.recurrence_id());
        assert_eq!(reparsed.dtstart(), comp.dtstart());
        assert_eq!(reparsed.dtend(), comp.dtend());
        assert_eq!(reparsed.sequence(), comp.sequence());
        assert_eq!(reparsed.created(), comp.created());
        assert_eq!(reparsed.last_modified(), comp.last_modified());
        assert_eq!(
            reparsed.find_prop("X-CUSTOM-THING").map(|p| p.value.as_str()),
            Some("keep me"),
            "Unknown properties must survive"
        );
        assert_eq!(
            reparsed.find_prop("X-CUSTOM-THING").and_then(|p| p.param("X-PARAM")),
            Some("1")
        );
    }

    #[test]
    fn test_parse_container_wraps_bare_components() {
        let (wrapped, cal) = parse_container(RECURRING_OVERRIDE).unwrap();
        assert!(wrapped);
        assert_eq!(cal.name, "VCALENDAR");
        assert_eq!(cal.components.len(), 1);
    }

    #[test]
    fn test_parse_full_calendar_keeps_calendar_properties() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
METHOD:REQUEST\r\n\
BEGIN:VEVENT\r\n\
UID:a\r\n\
DTSTART:20240101T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:b\r\n\
DTSTART:20240102T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let (wrapped, cal) = parse_container(ics).unwrap();
        assert!(!wrapped);
        assert_eq!(cal.find_prop("METHOD").map(|p| p.value.as_str()), Some("REQUEST"));
        assert_eq!(cal.components.len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_component(""), Err(CalError::InvalidObject(_))));
        assert!(matches!(
            parse_component("this is not a calendar"),
            Err(CalError::InvalidObject(_))
        ));
    }
}
