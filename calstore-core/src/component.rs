//! Calendar components as stored by the backend.
//!
//! A [`Component`] keeps every property and subcomponent it was parsed with, in
//! order, so that anything the store does not understand survives a round trip.
//! Typed accessors exist only for the fields the store acts on.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{EventTime, format_utc, parse_ics_duration};

/// A single content line: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Property {
            name: name.into().to_ascii_uppercase(),
            params: Vec::new(),
            value: value.into(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_uppercase();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
    }

    pub fn remove_param(&mut self, key: &str) {
        self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }
}

/// The component types a store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    #[default]
    Event,
    Todo,
    Journal,
}

impl ComponentKind {
    pub fn ics_name(&self) -> &'static str {
        match self {
            ComponentKind::Event => "VEVENT",
            ComponentKind::Todo => "VTODO",
            ComponentKind::Journal => "VJOURNAL",
        }
    }

    pub fn from_ics_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "VEVENT" => Some(ComponentKind::Event),
            "VTODO" => Some(ComponentKind::Todo),
            "VJOURNAL" => Some(ComponentKind::Journal),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Event => "event",
            ComponentKind::Todo => "todo",
            ComponentKind::Journal => "journal",
        };
        write!(f, "{name}")
    }
}

/// Identity of a stored component: its UID plus the recurrence ID for
/// detached instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    pub uid: String,
    pub rid: Option<String>,
}

impl ComponentId {
    pub fn new(uid: impl Into<String>, rid: Option<String>) -> Self {
        ComponentId {
            uid: uid.into(),
            rid: rid.filter(|r| !r.is_empty()),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rid {
            Some(rid) => write!(f, "{} ({})", self.uid, rid),
            None => write!(f, "{}", self.uid),
        }
    }
}

/// A calendar component (VEVENT, VTODO, VJOURNAL, VTIMEZONE, VALARM, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub properties: Vec<Property>,
    pub components: Vec<Component>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Component {
            name: name.into().to_ascii_uppercase(),
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_ics_name(&self.name)
    }

    // ========================================================================
    // Generic property access
    // ========================================================================

    pub fn find_prop(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_props<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// Replace all properties called `prop.name` with `prop`, keeping the
    /// position of the first one.
    pub fn set_prop(&mut self, prop: Property) {
        match self
            .properties
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(&prop.name))
        {
            Some(pos) => {
                let name = prop.name.clone();
                self.properties[pos] = prop;
                let mut index = 0;
                self.properties.retain(|p| {
                    let keep = index <= pos || !p.name.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.properties.push(prop),
        }
    }

    pub fn push_prop(&mut self, prop: Property) {
        self.properties.push(prop);
    }

    pub fn remove_props(&mut self, name: &str) {
        self.properties.retain(|p| !p.name.eq_ignore_ascii_case(name));
    }

    fn prop_value(&self, name: &str) -> Option<&str> {
        self.find_prop(name).map(|p| p.value.as_str())
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn uid(&self) -> Option<&str> {
        self.prop_value("UID").filter(|uid| !uid.is_empty())
    }

    pub fn set_uid(&mut self, uid: &str) {
        self.set_prop(Property::new("UID", uid));
    }

    pub fn recurrence_id(&self) -> Option<EventTime> {
        self.find_prop("RECURRENCE-ID").and_then(EventTime::from_property)
    }

    /// String form of the RECURRENCE-ID, used as the override key.
    pub fn rid(&self) -> Option<String> {
        self.recurrence_id().map(|rid| rid.to_ics_string())
    }

    pub fn set_recurrence_id(&mut self, rid: Option<&EventTime>) {
        match rid {
            Some(rid) => self.set_prop(rid.to_property("RECURRENCE-ID")),
            None => self.remove_props("RECURRENCE-ID"),
        }
    }

    pub fn id(&self) -> Option<ComponentId> {
        self.uid().map(|uid| ComponentId::new(uid, self.rid()))
    }

    // ========================================================================
    // Times
    // ========================================================================

    pub fn dtstart(&self) -> Option<EventTime> {
        self.find_prop("DTSTART").and_then(EventTime::from_property)
    }

    pub fn set_dtstart(&mut self, time: &EventTime) {
        self.set_prop(time.to_property("DTSTART"));
    }

    pub fn dtend(&self) -> Option<EventTime> {
        self.find_prop("DTEND").and_then(EventTime::from_property)
    }

    pub fn set_dtend(&mut self, time: &EventTime) {
        self.set_prop(time.to_property("DTEND"));
    }

    pub fn due(&self) -> Option<EventTime> {
        self.find_prop("DUE").and_then(EventTime::from_property)
    }

    pub fn set_due(&mut self, time: &EventTime) {
        self.set_prop(time.to_property("DUE"));
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.prop_value("DURATION").and_then(parse_ics_duration)
    }

    pub fn sequence(&self) -> Option<i64> {
        self.prop_value("SEQUENCE").and_then(|v| v.trim().parse().ok())
    }

    pub fn set_sequence(&mut self, sequence: i64) {
        self.set_prop(Property::new("SEQUENCE", sequence.to_string()));
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.prop_value("CREATED").and_then(parse_utc_stamp)
    }

    pub fn set_created(&mut self, at: DateTime<Utc>) {
        self.set_prop(Property::new("CREATED", format_utc(&at)));
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.prop_value("LAST-MODIFIED").and_then(parse_utc_stamp)
    }

    pub fn set_last_modified(&mut self, at: DateTime<Utc>) {
        self.set_prop(Property::new("LAST-MODIFIED", format_utc(&at)));
    }

    // ========================================================================
    // Recurrence
    // ========================================================================

    pub fn rrule(&self) -> Option<&str> {
        self.prop_value("RRULE")
    }

    pub fn has_recurrences(&self) -> bool {
        self.find_prop("RRULE").is_some() || self.find_prop("RDATE").is_some()
    }

    pub fn exdates(&self) -> Vec<EventTime> {
        self.find_props("EXDATE")
            .flat_map(EventTime::list_from_property)
            .collect()
    }

    pub fn rdates(&self) -> Vec<EventTime> {
        self.find_props("RDATE")
            .filter(|p| p.param("VALUE").map(|v| !v.eq_ignore_ascii_case("PERIOD")).unwrap_or(true))
            .flat_map(EventTime::list_from_property)
            .collect()
    }

    pub fn add_exdate(&mut self, time: &EventTime) {
        self.push_prop(time.to_property("EXDATE"));
    }

    // ========================================================================
    // Descriptive fields
    // ========================================================================

    pub fn summary(&self) -> Option<&str> {
        self.prop_value("SUMMARY")
    }

    pub fn location(&self) -> Option<&str> {
        self.prop_value("LOCATION")
    }

    pub fn description(&self) -> Option<&str> {
        self.prop_value("DESCRIPTION")
    }

    pub fn is_transparent(&self) -> bool {
        self.prop_value("TRANSP")
            .map(|v| v.eq_ignore_ascii_case("TRANSPARENT"))
            .unwrap_or(false)
    }

    pub fn has_alarms(&self) -> bool {
        self.components.iter().any(|c| c.name == "VALARM")
    }

    /// ATTACH values that reference a URI rather than inline data.
    pub fn attachment_uris(&self) -> Vec<String> {
        self.find_props("ATTACH")
            .filter(|p| {
                p.param("VALUE").map(|v| !v.eq_ignore_ascii_case("BINARY")).unwrap_or(true)
                    && p.param("ENCODING").is_none()
            })
            .map(|p| p.value.clone())
            .collect()
    }

    /// PARTSTAT of the attendee with the given address, if present.
    pub fn attendee_partstat(&self, address: &str) -> Option<&str> {
        self.find_props("ATTENDEE")
            .find(|p| crate::freebusy::same_address(&p.value, address))
            .and_then(|p| p.param("PARTSTAT"))
    }

    /// TZIDs referenced by any property of this component or its children.
    pub fn referenced_tzids(&self) -> Vec<String> {
        let mut tzids: Vec<String> = self
            .properties
            .iter()
            .filter_map(|p| p.param("TZID").map(str::to_string))
            .collect();
        for child in &self.components {
            tzids.extend(child.referenced_tzids());
        }
        tzids.sort();
        tzids.dedup();
        tzids
    }
}

fn parse_utc_stamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let naive = value.strip_suffix('Z').unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::ics::serialize_component(self))
    }
}
