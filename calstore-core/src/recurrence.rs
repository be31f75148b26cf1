//! Recurrence handling: occurrence expansion, occurrence bounds, and the
//! rule rewrites used when a series is truncated or split.
//!
//! RRULE expansion goes through the rrule crate. RDATE and EXDATE are applied
//! here so that all-day and zoned exceptions compare the same way everywhere.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rrule::RRuleSet;

use crate::component::{Component, Property};
use crate::time::{EventTime, format_utc};
use crate::timezone::Resolver;

/// Upper bound on instances produced by one expansion.
const EXPANSION_LIMIT: u16 = u16::MAX;

/// One expanded instance of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Recurrence ID of this instance, in the flavour of the master's DTSTART.
    pub rid: EventTime,
}

/// Which side of a split point is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Future,
    Prior,
}

/// Outcome of truncating a master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// The master still has instances.
    Kept,
    /// Every instance was removed; the master should be dropped.
    Emptied,
}

// ============================================================================
// RRULE value editing
// ============================================================================

/// An RRULE value as an ordered list of `KEY=VALUE` parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    parts: Vec<(String, String)>,
}

impl RecurrenceRule {
    pub fn parse(value: &str) -> Self {
        let parts = value
            .split(';')
            .filter_map(|part| {
                let (key, val) = part.split_once('=')?;
                Some((key.trim().to_ascii_uppercase(), val.trim().to_string()))
            })
            .collect();
        RecurrenceRule { parts }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.parts.iter_mut().find(|(k, _)| k == key) {
            Some(part) => part.1 = value,
            None => self.parts.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.parts.retain(|(k, _)| k != key);
    }

    pub fn count(&self) -> Option<i64> {
        self.get("COUNT").and_then(|c| c.parse().ok())
    }

    pub fn is_bounded(&self) -> bool {
        self.get("COUNT").is_some() || self.get("UNTIL").is_some()
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.parts.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", joined.join(";"))
    }
}

// ============================================================================
// Expansion
// ============================================================================

enum Excluded {
    Instant(DateTime<Utc>),
    Day(NaiveDate),
}

struct Expansion {
    start: DateTime<Utc>,
    rule: Option<RRuleSet>,
    bounded: bool,
    rdates: Vec<DateTime<Utc>>,
    exdates: Vec<Excluded>,
}

impl Expansion {
    /// None when the component does not recur or has no DTSTART.
    /// `with_exceptions` controls whether RDATE and EXDATE are applied.
    fn new(comp: &Component, resolver: &Resolver<'_>, with_exceptions: bool) -> Option<Self> {
        if !comp.has_recurrences() {
            return None;
        }
        let dtstart = comp.dtstart()?;
        let start = dtstart.to_utc(resolver);

        let (rule, bounded) = match comp.rrule() {
            Some(value) => {
                let parsed = RecurrenceRule::parse(value);
                let bounded = parsed.is_bounded();
                match build_rrule_string(&dtstart, &parsed, resolver).parse::<RRuleSet>() {
                    Ok(set) => (Some(set), bounded),
                    Err(e) => {
                        tracing::warn!(
                            uid = comp.uid().unwrap_or_default(),
                            "Ignoring unparseable RRULE: {}",
                            e
                        );
                        (None, true)
                    }
                }
            }
            None => (None, true),
        };

        let (rdates, exdates) = if with_exceptions {
            let rdates = comp.rdates().iter().map(|t| t.to_utc(resolver)).collect();
            let exdates = comp
                .exdates()
                .iter()
                .map(|t| match t {
                    EventTime::Date(d) => Excluded::Day(*d),
                    other => Excluded::Instant(other.to_utc(resolver)),
                })
                .collect();
            (rdates, exdates)
        } else {
            (Vec::new(), Vec::new())
        };

        Some(Expansion {
            start,
            rule,
            bounded,
            rdates,
            exdates,
        })
    }

    fn is_excluded(&self, at: &DateTime<Utc>) -> bool {
        self.exdates.iter().any(|ex| match ex {
            Excluded::Instant(t) => t == at,
            Excluded::Day(d) => at.date_naive() == *d,
        })
    }

    fn finish(&self, mut dates: Vec<DateTime<Utc>>) -> Vec<DateTime<Utc>> {
        dates.sort();
        dates.dedup();
        dates.retain(|d| !self.is_excluded(d));
        dates
    }

    fn rule_dates(&self, rule: &RRuleSet, after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> Vec<DateTime<Utc>> {
        let tz: rrule::Tz = Utc.into();
        let mut set = rule.clone();
        // both bounds are inclusive
        if let Some(after) = after {
            set = set.after(after.with_timezone(&tz));
        }
        if let Some(before) = before {
            set = set.before(before.with_timezone(&tz));
        }
        set.all(EXPANSION_LIMIT)
            .dates
            .iter()
            .map(|d| d.with_timezone(&Utc))
            .filter(|d| after.is_none_or(|a| *d >= a) && before.is_none_or(|b| *d <= b))
            .collect()
    }

    /// Instants in `[from, to]`.
    fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut dates: Vec<DateTime<Utc>> = match &self.rule {
            Some(rule) => self.rule_dates(rule, Some(from), Some(to)),
            None => vec![self.start].into_iter().filter(|d| *d >= from && *d <= to).collect(),
        };
        dates.extend(self.rdates.iter().filter(|d| **d >= from && **d <= to));
        self.finish(dates)
    }

    /// Every instant, or None when the rule never ends.
    fn all(&self) -> Option<Vec<DateTime<Utc>>> {
        if !self.bounded {
            return None;
        }
        let mut dates = match &self.rule {
            Some(rule) => self.rule_dates(rule, None, None),
            None => vec![self.start],
        };
        dates.extend(self.rdates.iter().copied());
        Some(self.finish(dates))
    }

    fn first(&self) -> Option<DateTime<Utc>> {
        let mut candidates: Vec<DateTime<Utc>> = match &self.rule {
            Some(rule) => {
                let tz: rrule::Tz = Utc.into();
                rule.clone()
                    .after(self.start.with_timezone(&tz))
                    .all(64)
                    .dates
                    .iter()
                    .map(|d| d.with_timezone(&Utc))
                    .collect()
            }
            None => vec![self.start],
        };
        candidates.extend(self.rdates.iter().copied());
        self.finish(candidates).into_iter().next()
    }

    /// First instant strictly after `at`.
    fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidates: Vec<DateTime<Utc>> = match &self.rule {
            Some(rule) => {
                let tz: rrule::Tz = Utc.into();
                rule.clone()
                    .after(at.with_timezone(&tz))
                    .all(64)
                    .dates
                    .iter()
                    .map(|d| d.with_timezone(&Utc))
                    .collect()
            }
            None => Vec::new(),
        };
        candidates.extend(self.rdates.iter().copied());
        self.finish(candidates).into_iter().find(|d| *d > at)
    }
}

/// Build an iCalendar-format DTSTART + RRULE block for the rrule crate parser.
///
/// Zones with an IANA name are passed through so that DST is honoured; all
/// other starts are converted to UTC. UNTIL is normalized to UTC.
fn build_rrule_string(dtstart: &EventTime, rule: &RecurrenceRule, resolver: &Resolver<'_>) -> String {
    let iana = dtstart
        .tzid()
        .and_then(|tzid| resolver.resolve(tzid))
        .and_then(|tz| tz.iana());

    let start_line = match (dtstart, iana) {
        (EventTime::DateTimeZoned { datetime, .. }, Some(tz)) => format!(
            "DTSTART;TZID={}:{}",
            tz.name(),
            datetime.format("%Y%m%dT%H%M%S")
        ),
        _ => format!("DTSTART:{}", format_utc(&dtstart.to_utc(resolver))),
    };

    let mut rule = rule.clone();
    if let Some(until) = rule.get("UNTIL").and_then(|v| EventTime::parse(v, None, false)) {
        let until_utc = match until {
            EventTime::Date(d) => d.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc()),
            EventTime::DateTimeUtc(dt) => Some(dt),
            EventTime::DateTimeFloating(naive) => Some(match iana {
                Some(tz) => tz
                    .from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|| naive.and_utc()),
                None => naive.and_utc(),
            }),
            EventTime::DateTimeZoned { datetime, .. } => Some(datetime.and_utc()),
        };
        if let Some(until_utc) = until_utc {
            rule.set("UNTIL", format_utc(&until_utc));
        }
    }

    format!("{}\nRRULE:{}", start_line, rule)
}

// ============================================================================
// Queries over a component
// ============================================================================

/// DTEND/DUE minus DTSTART, else DURATION, else one day for all-day items,
/// else zero. Negative when the end precedes the start.
fn signed_duration(comp: &Component, resolver: &Resolver<'_>) -> Duration {
    let start = comp.dtstart();
    let end = comp.dtend().or_else(|| comp.due());
    match (&start, end) {
        (Some(start), Some(end)) => end.to_utc(resolver) - start.to_utc(resolver),
        _ => match comp.duration() {
            Some(d) => d,
            None if start.as_ref().map(EventTime::is_date).unwrap_or(false) => Duration::days(1),
            None => Duration::zero(),
        },
    }
}

/// Length of one instance, never negative.
pub fn component_duration(comp: &Component, resolver: &Resolver<'_>) -> Duration {
    signed_duration(comp, resolver).max(Duration::zero())
}

/// Outer bound `[start, end]` in unix seconds covering every instance.
/// `None` as end means the series never ends. A component ending before it
/// starts gets an end before its start, which the index rejects.
pub fn occurrence_bounds(comp: &Component, resolver: &Resolver<'_>) -> (i64, Option<i64>) {
    let Some(anchor) = comp.dtstart().or_else(|| comp.due()) else {
        return (i64::MIN, None);
    };
    let start = anchor.to_utc(resolver);
    let duration = signed_duration(comp, resolver);
    if duration < Duration::zero() {
        return (start.timestamp(), Some((start + duration).timestamp()));
    }

    let Some(expansion) = Expansion::new(comp, resolver, true) else {
        return (start.timestamp(), Some((start + duration).timestamp()));
    };

    match expansion.all() {
        Some(dates) => {
            let first = dates.first().copied().unwrap_or(start).min(start);
            let last = dates.last().copied().unwrap_or(start).max(start);
            (first.timestamp(), Some((last + duration).timestamp()))
        }
        None => (start.timestamp(), None),
    }
}

/// Instances overlapping `[from, to]`.
pub fn occurrences(
    comp: &Component,
    resolver: &Resolver<'_>,
    from: DateTime<chrono::Utc>,
    to: DateTime<chrono::Utc>,
) -> Vec<Occurrence> {
    let Some(dtstart) = comp.dtstart().or_else(|| comp.due()) else {
        return Vec::new();
    };
    let duration = component_duration(comp, resolver);

    let starts = match Expansion::new(comp, resolver, true) {
        Some(expansion) => expansion.between(from - duration, to),
        None => vec![dtstart.to_utc(resolver)],
    };

    starts
        .into_iter()
        .filter(|start| *start <= to && *start + duration >= from)
        .map(|start| Occurrence {
            start,
            end: start + duration,
            rid: dtstart.same_kind_at(start, resolver),
        })
        .collect()
}

pub fn occurs_in_range(
    comp: &Component,
    resolver: &Resolver<'_>,
    from: DateTime<chrono::Utc>,
    to: DateTime<chrono::Utc>,
) -> bool {
    !occurrences(comp, resolver, from, to).is_empty()
}

fn first_instance(master: &Component, resolver: &Resolver<'_>) -> Option<DateTime<chrono::Utc>> {
    match Expansion::new(master, resolver, true) {
        Some(expansion) => expansion.first(),
        None => master.dtstart().map(|t| t.to_utc(resolver)),
    }
}

pub fn is_first_instance(master: &Component, rid: &EventTime, resolver: &Resolver<'_>) -> bool {
    first_instance(master, resolver) == Some(rid.to_utc(resolver))
}

pub fn has_instance(master: &Component, rid: &EventTime, resolver: &Resolver<'_>) -> bool {
    let at = rid.to_utc(resolver);
    match Expansion::new(master, resolver, true) {
        Some(expansion) => expansion.between(at, at).contains(&at),
        None => master.dtstart().map(|t| t.to_utc(resolver)) == Some(at),
    }
}

/// Build the detached instance at `rid` from the master.
pub fn construct_instance(master: &Component, rid: &str, resolver: &Resolver<'_>) -> Option<Component> {
    let dtstart = master.dtstart()?;
    let rid = EventTime::parse_rid(rid, Some(&dtstart))?;
    if !has_instance(master, &rid, resolver) {
        return None;
    }

    let start = rid.to_utc(resolver);
    let duration = component_duration(master, resolver);

    let mut instance = master.clone();
    for name in ["RRULE", "RDATE", "EXRULE", "EXDATE"] {
        instance.remove_props(name);
    }
    instance.set_recurrence_id(Some(&dtstart.same_kind_at(start, resolver)));
    instance.set_dtstart(&dtstart.same_kind_at(start, resolver));
    if let Some(end) = master.dtend() {
        instance.set_dtend(&end.same_kind_at(start + duration, resolver));
    }
    if let Some(due) = master.due() {
        instance.set_due(&due.same_kind_at(start + duration, resolver));
    }
    Some(instance)
}

// ============================================================================
// Rewrites
// ============================================================================

/// Exclude the single instance at `rid` with an EXDATE.
pub fn exclude_instance(master: &mut Component, rid: &EventTime) {
    master.add_exdate(rid);
}

/// Keep only the RDATE/EXDATE values for which `keep` holds.
fn retain_dates(comp: &mut Component, name: &str, resolver: &Resolver<'_>, keep: impl Fn(DateTime<chrono::Utc>) -> bool) {
    let mut rewritten = Vec::with_capacity(comp.properties.len());
    for prop in comp.properties.drain(..) {
        if !prop.name.eq_ignore_ascii_case(name) {
            rewritten.push(prop);
            continue;
        }
        let kept: Vec<String> = EventTime::list_from_property(&prop)
            .into_iter()
            .filter(|t| keep(t.to_utc(resolver)))
            .map(|t| t.to_ics_string())
            .collect();
        if !kept.is_empty() {
            rewritten.push(Property {
                value: kept.join(","),
                ..prop
            });
        }
    }
    comp.properties = rewritten;
}

/// Number of rule-generated instances strictly before `at`, ignoring
/// RDATE/EXDATE (which do not count towards COUNT).
fn raw_instances_before(comp: &Component, at: DateTime<chrono::Utc>, resolver: &Resolver<'_>) -> i64 {
    match Expansion::new(comp, resolver, false) {
        Some(expansion) if at > expansion.start => {
            expansion.between(expansion.start, at - Duration::seconds(1)).len() as i64
        }
        _ => 0,
    }
}

/// Drop every instance of `master` on `side` of `rid` (inclusive).
pub fn remove_instances(master: &mut Component, rid: &EventTime, side: Side, resolver: &Resolver<'_>) -> Truncation {
    let Some(dtstart) = master.dtstart() else {
        return Truncation::Kept;
    };
    let split = rid.to_utc(resolver);

    match side {
        Side::Future => {
            let first = first_instance(master, resolver).unwrap_or_else(|| dtstart.to_utc(resolver));
            if split <= first {
                return Truncation::Emptied;
            }

            if let Some(value) = master.rrule() {
                let mut rule = RecurrenceRule::parse(value);
                rule.remove("COUNT");
                let until = match &dtstart {
                    EventTime::Date(_) => EventTime::Date(split.date_naive() - Duration::days(1)),
                    EventTime::DateTimeFloating(_) => {
                        EventTime::DateTimeFloating(rid.naive() - Duration::seconds(1))
                    }
                    _ => EventTime::DateTimeUtc(split - Duration::seconds(1)),
                };
                rule.set("UNTIL", until.to_ics_string());
                master.set_prop(Property::new("RRULE", rule.to_string()));
            }
            retain_dates(master, "RDATE", resolver, |t| t < split);
            retain_dates(master, "EXDATE", resolver, |t| t < split);
        }
        Side::Prior => {
            let next = Expansion::new(master, resolver, true).and_then(|e| e.next_after(split));
            let Some(next) = next else {
                return Truncation::Emptied;
            };

            if let Some(value) = master.rrule() {
                let mut rule = RecurrenceRule::parse(value);
                if let Some(count) = rule.count() {
                    let remaining = count - raw_instances_before(master, next, resolver);
                    if remaining <= 0 {
                        return Truncation::Emptied;
                    }
                    rule.set("COUNT", remaining.to_string());
                    master.set_prop(Property::new("RRULE", rule.to_string()));
                }
            }

            let new_start = dtstart.same_kind_at(next, resolver);
            let wall_delta = new_start.naive() - dtstart.naive();
            master.set_dtstart(&new_start);
            if let Some(end) = master.dtend() {
                master.set_dtend(&end.shifted(wall_delta));
            }
            if let Some(due) = master.due() {
                master.set_due(&due.shifted(wall_delta));
            }
            retain_dates(master, "RDATE", resolver, |t| t > split);
            retain_dates(master, "EXDATE", resolver, |t| t > split);
        }
    }

    Truncation::Kept
}

/// Build the new series that takes over the instances on `side` of `rid`,
/// seeded from the submitted component. The caller assigns a fresh UID.
///
/// Returns None when there is nothing left to own (no recurrence, or COUNT
/// already exhausted at the split point).
pub fn split_at_instance(
    submitted: &Component,
    master: &Component,
    rid: &EventTime,
    side: Side,
    resolver: &Resolver<'_>,
) -> Option<Component> {
    let mut series = submitted.clone();
    series.set_recurrence_id(None);

    if !series.has_recurrences() {
        for name in ["RRULE", "RDATE", "EXDATE"] {
            for prop in master.find_props(name) {
                series.push_prop(prop.clone());
            }
        }
    }
    if !series.has_recurrences() {
        return None;
    }

    let split = rid.to_utc(resolver);
    let master_start = master.dtstart()?;

    match side {
        Side::Future => {
            if let Some(value) = series.rrule() {
                let mut rule = RecurrenceRule::parse(value);
                if let Some(count) = rule.count() {
                    let remaining = count - raw_instances_before(master, split, resolver);
                    if remaining <= 0 {
                        return None;
                    }
                    rule.set("COUNT", remaining.to_string());
                    series.set_prop(Property::new("RRULE", rule.to_string()));
                }
            }
            retain_dates(&mut series, "RDATE", resolver, |t| t >= split);
            retain_dates(&mut series, "EXDATE", resolver, |t| t >= split);
        }
        Side::Prior => {
            let submitted_start = series.dtstart()?;
            let submitted_utc = submitted_start.to_utc(resolver);
            let offset = submitted_utc - split;
            let duration = component_duration(submitted, resolver);
            let new_start_utc = master_start.to_utc(resolver) + offset;

            series.set_dtstart(&submitted_start.same_kind_at(new_start_utc, resolver));
            if let Some(end) = series.dtend() {
                series.set_dtend(&end.same_kind_at(new_start_utc + duration, resolver));
            }

            if let Some(value) = series.rrule() {
                let mut rule = RecurrenceRule::parse(value);
                rule.remove("COUNT");
                let until = match submitted_start {
                    EventTime::Date(_) => EventTime::Date(submitted_utc.date_naive()),
                    EventTime::DateTimeFloating(naive) => EventTime::DateTimeFloating(naive),
                    _ => EventTime::DateTimeUtc(submitted_utc),
                };
                rule.set("UNTIL", until.to_ics_string());
                series.set_prop(Property::new("RRULE", rule.to_string()));
            }
            retain_dates(&mut series, "RDATE", resolver, |t| t <= split);
            retain_dates(&mut series, "EXDATE", resolver, |t| t <= split);
        }
    }

    Some(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_component;
    use crate::timezone::TimezoneSet;
    use chrono::TimeZone;

    fn weekly(extra: &str) -> Component {
        let ics = format!(
            "BEGIN:VEVENT\r\n\
UID:weekly\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
RRULE:FREQ=WEEKLY{extra}\r\n\
END:VEVENT\r\n"
        );
        parse_component(&ics).expect("Should parse")
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn rid(s: &str) -> EventTime {
        EventTime::parse(s, None, false).unwrap()
    }

    #[test]
    fn rule_parts_round_trip() {
        let mut rule = RecurrenceRule::parse("FREQ=DAILY;COUNT=5;BYHOUR=9");
        assert_eq!(rule.count(), Some(5));
        rule.remove("COUNT");
        rule.set("UNTIL", "20240110T000000Z");
        assert_eq!(rule.to_string(), "FREQ=DAILY;BYHOUR=9;UNTIL=20240110T000000Z");
    }

    #[test]
    fn bounds_for_plain_and_recurring_components() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);

        let open = weekly("");
        assert_eq!(occurrence_bounds(&open, &resolver), (utc(2024, 1, 1, 10).timestamp(), None));

        let counted = weekly(";COUNT=3");
        assert_eq!(
            occurrence_bounds(&counted, &resolver),
            (utc(2024, 1, 1, 10).timestamp(), Some(utc(2024, 1, 15, 11).timestamp()))
        );

        let mut single = weekly("");
        single.remove_props("RRULE");
        assert_eq!(
            occurrence_bounds(&single, &resolver),
            (utc(2024, 1, 1, 10).timestamp(), Some(utc(2024, 1, 1, 11).timestamp()))
        );
    }

    #[test]
    fn end_before_start_gives_inverted_bounds() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut comp = weekly("");
        comp.remove_props("RRULE");
        comp.set_dtend(&rid("20240101T090000Z"));

        let (start, end) = occurrence_bounds(&comp, &resolver);
        assert_eq!(start, utc(2024, 1, 1, 10).timestamp());
        assert_eq!(end, Some(utc(2024, 1, 1, 9).timestamp()));
        assert_eq!(component_duration(&comp, &resolver), Duration::zero());
    }

    #[test]
    fn range_edges_are_inclusive_and_exact() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let comp = weekly(";COUNT=5");
        let expansion = Expansion::new(&comp, &resolver, false).unwrap();

        let edge = utc(2024, 1, 15, 10);
        assert_eq!(expansion.between(edge, edge), vec![edge]);
        assert!(expansion.between(edge + Duration::seconds(1), utc(2024, 1, 22, 9)).is_empty());
        assert_eq!(raw_instances_before(&comp, edge, &resolver), 2);
    }

    #[test]
    fn exdates_are_skipped() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut comp = weekly(";COUNT=4");
        comp.add_exdate(&rid("20240108T100000Z"));

        let starts: Vec<_> = occurrences(&comp, &resolver, utc(2024, 1, 1, 0), utc(2024, 2, 1, 0))
            .into_iter()
            .map(|o| o.rid.to_ics_string())
            .collect();
        assert_eq!(starts, vec!["20240101T100000Z", "20240115T100000Z", "20240122T100000Z"]);
    }

    #[test]
    fn first_instance_and_membership() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let comp = weekly("");

        assert!(is_first_instance(&comp, &rid("20240101T100000Z"), &resolver));
        assert!(!is_first_instance(&comp, &rid("20240108T100000Z"), &resolver));
        assert!(has_instance(&comp, &rid("20240108T100000Z"), &resolver));
        assert!(!has_instance(&comp, &rid("20240109T100000Z"), &resolver));
    }

    #[test]
    fn construct_instance_moves_times_and_strips_rules() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let instance = construct_instance(&weekly(""), "20240115T100000Z", &resolver).unwrap();

        assert_eq!(instance.rid().as_deref(), Some("20240115T100000Z"));
        assert_eq!(instance.dtstart(), Some(rid("20240115T100000Z")));
        assert_eq!(instance.dtend(), Some(rid("20240115T110000Z")));
        assert!(instance.rrule().is_none());
        assert!(construct_instance(&weekly(""), "20240116T100000Z", &resolver).is_none());
    }

    #[test]
    fn truncate_future_sets_until_before_split() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut master = weekly(";COUNT=10");

        let outcome = remove_instances(&mut master, &rid("20240115T100000Z"), Side::Future, &resolver);
        assert_eq!(outcome, Truncation::Kept);
        assert_eq!(master.rrule(), Some("FREQ=WEEKLY;UNTIL=20240115T095959Z"));

        let remaining = occurrences(&master, &resolver, utc(2024, 1, 1, 0), utc(2024, 12, 1, 0));
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn truncate_future_at_first_instance_empties() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut master = weekly("");
        assert_eq!(
            remove_instances(&mut master, &rid("20240101T100000Z"), Side::Future, &resolver),
            Truncation::Emptied
        );
    }

    #[test]
    fn truncate_prior_moves_start_and_reduces_count() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut master = weekly(";COUNT=5");

        let outcome = remove_instances(&mut master, &rid("20240108T100000Z"), Side::Prior, &resolver);
        assert_eq!(outcome, Truncation::Kept);
        assert_eq!(master.dtstart(), Some(rid("20240115T100000Z")));
        assert_eq!(master.dtend(), Some(rid("20240115T110000Z")));
        assert_eq!(master.rrule(), Some("FREQ=WEEKLY;COUNT=3"));
    }

    #[test]
    fn split_future_reseeds_from_submitted_instance() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let master = weekly(";COUNT=5");

        let mut submitted = construct_instance(&master, "20240115T100000Z", &resolver).unwrap();
        submitted.set_dtstart(&rid("20240115T140000Z"));
        submitted.set_dtend(&rid("20240115T150000Z"));

        let series =
            split_at_instance(&submitted, &master, &rid("20240115T100000Z"), Side::Future, &resolver)
                .unwrap();
        assert!(series.recurrence_id().is_none());
        assert_eq!(series.dtstart(), Some(rid("20240115T140000Z")));
        assert_eq!(series.rrule(), Some("FREQ=WEEKLY;COUNT=3"));
    }

    #[test]
    fn split_future_keeps_every_remaining_instance() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let master = weekly(";COUNT=6");

        let submitted = construct_instance(&master, "20240115T100000Z", &resolver).unwrap();
        let series =
            split_at_instance(&submitted, &master, &rid("20240115T100000Z"), Side::Future, &resolver)
                .unwrap();
        assert_eq!(series.rrule(), Some("FREQ=WEEKLY;COUNT=4"));

        let owned = occurrences(&series, &resolver, utc(2024, 1, 1, 0), utc(2024, 12, 1, 0));
        assert_eq!(owned.last().map(|o| o.start), Some(utc(2024, 2, 5, 10)));
    }

    #[test]
    fn split_prior_ends_at_submitted_instance() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let master = weekly("");

        let submitted = construct_instance(&master, "20240115T100000Z", &resolver).unwrap();
        let series =
            split_at_instance(&submitted, &master, &rid("20240115T100000Z"), Side::Prior, &resolver)
                .unwrap();
        assert_eq!(series.dtstart(), Some(rid("20240101T100000Z")));
        assert_eq!(series.rrule(), Some("FREQ=WEEKLY;UNTIL=20240115T100000Z"));

        let owned = occurrences(&series, &resolver, utc(2023, 12, 1, 0), utc(2024, 12, 1, 0));
        assert_eq!(owned.len(), 3, "Prior series keeps instances up to and including the split");
    }

    #[test]
    fn split_of_non_recurring_component_yields_nothing() {
        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let mut master = weekly("");
        master.remove_props("RRULE");
        let submitted = master.clone();
        assert!(
            split_at_instance(&submitted, &master, &rid("20240101T100000Z"), Side::Future, &resolver)
                .is_none()
        );
    }
}
