//! Date/time values as they appear on DTSTART, DTEND, DUE, RECURRENCE-ID,
//! EXDATE and RDATE.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::component::Property;
use crate::timezone::Resolver;

/// A date or date-time value with its timezone flavour preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTime {
    /// All-day value (`VALUE=DATE`)
    Date(NaiveDate),
    /// UTC value with trailing `Z`
    DateTimeUtc(DateTime<Utc>),
    /// Floating local time (no `Z`, no TZID)
    DateTimeFloating(NaiveDateTime),
    /// Local time in a named zone (`TZID=...`)
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    /// Parse a single value given the property's TZID and VALUE=DATE flag.
    pub fn parse(value: &str, tzid: Option<&str>, is_date: bool) -> Option<EventTime> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if is_date || (value.len() == 8 && !value.contains('T')) {
            return NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()
                .map(EventTime::Date);
        }

        if let Some(naive) = value.strip_suffix('Z') {
            return NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
                .ok()
                .map(|dt| EventTime::DateTimeUtc(dt.and_utc()));
        }

        let datetime = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
        match tzid {
            Some(tz) if is_utc_tzid(tz) => Some(EventTime::DateTimeUtc(datetime.and_utc())),
            Some(tz) => Some(EventTime::DateTimeZoned {
                datetime,
                tzid: tz.to_string(),
            }),
            None => Some(EventTime::DateTimeFloating(datetime)),
        }
    }

    /// Parse the (first) value of a property.
    pub fn from_property(prop: &Property) -> Option<EventTime> {
        let value = prop.value.split(',').next()?;
        EventTime::parse(value, prop.param("TZID"), is_date_param(prop))
    }

    /// Parse every comma-separated value of a multi-valued property.
    pub fn list_from_property(prop: &Property) -> Vec<EventTime> {
        let tzid = prop.param("TZID");
        let is_date = is_date_param(prop);
        prop.value
            .split(',')
            .filter_map(|v| EventTime::parse(v, tzid, is_date))
            .collect()
    }

    /// Interpret a recurrence-id string the way `like` would write it.
    ///
    /// Recurrence IDs travel without their TZID, so a bare local time takes
    /// the zone of the master's DTSTART.
    pub fn parse_rid(rid: &str, like: Option<&EventTime>) -> Option<EventTime> {
        let tzid = match like {
            Some(EventTime::DateTimeZoned { tzid, .. }) => Some(tzid.as_str()),
            _ => None,
        };
        EventTime::parse(rid, tzid, false)
    }

    pub fn to_property(&self, name: &str) -> Property {
        let prop = Property::new(name, self.to_ics_string());
        match self {
            EventTime::Date(_) => prop.with_param("VALUE", "DATE"),
            EventTime::DateTimeZoned { tzid, .. } => prop.with_param("TZID", tzid.as_str()),
            _ => prop,
        }
    }

    /// The value text, without parameters. Zoned times drop their TZID.
    pub fn to_ics_string(&self) -> String {
        match self {
            EventTime::Date(d) => d.format("%Y%m%d").to_string(),
            EventTime::DateTimeUtc(dt) => format_utc(dt),
            EventTime::DateTimeFloating(dt) => dt.format("%Y%m%dT%H%M%S").to_string(),
            EventTime::DateTimeZoned { datetime, .. } => {
                datetime.format("%Y%m%dT%H%M%S").to_string()
            }
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    pub fn tzid(&self) -> Option<&str> {
        match self {
            EventTime::DateTimeZoned { tzid, .. } => Some(tzid),
            _ => None,
        }
    }

    /// Wall-clock value (dates at midnight).
    pub fn naive(&self) -> NaiveDateTime {
        match self {
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN),
            EventTime::DateTimeUtc(dt) => dt.naive_utc(),
            EventTime::DateTimeFloating(dt) => *dt,
            EventTime::DateTimeZoned { datetime, .. } => *datetime,
        }
    }

    /// Same flavour, shifted by `delta`. Dates move by whole days.
    pub fn shifted(&self, delta: Duration) -> EventTime {
        match self {
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(delta.num_days())),
            EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + delta),
            EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + delta),
            EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
                datetime: *datetime + delta,
                tzid: tzid.clone(),
            },
        }
    }

    /// Absolute instant. Dates and floating times are read as UTC; unknown
    /// zones fall back to UTC as well.
    pub fn to_utc(&self, resolver: &Resolver<'_>) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
            EventTime::DateTimeUtc(dt) => *dt,
            EventTime::DateTimeFloating(dt) => dt.and_utc(),
            EventTime::DateTimeZoned { datetime, tzid } => match resolver.resolve(tzid) {
                Some(tz) => tz.to_utc(*datetime),
                None => datetime.and_utc(),
            },
        }
    }

    /// Build a value of the same flavour as `self` for the instant `at`.
    pub fn same_kind_at(&self, at: DateTime<Utc>, resolver: &Resolver<'_>) -> EventTime {
        match self {
            EventTime::Date(_) => EventTime::Date(at.date_naive()),
            EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(at),
            EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(at.naive_utc()),
            EventTime::DateTimeZoned { tzid, .. } => {
                let datetime = match resolver.resolve(tzid) {
                    Some(tz) => tz.from_utc(at),
                    None => at.naive_utc(),
                };
                EventTime::DateTimeZoned {
                    datetime,
                    tzid: tzid.clone(),
                }
            }
        }
    }
}

fn is_date_param(prop: &Property) -> bool {
    prop.param("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
}

pub(crate) fn is_utc_tzid(tzid: &str) -> bool {
    matches!(tzid.to_ascii_uppercase().as_str(), "UTC" | "Z" | "GMT" | "ETC/UTC")
}

/// `YYYYMMDDTHHMMSSZ`
pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse an RFC 5545 duration such as `PT1H30M`, `-P1D` or `P2W`.
pub fn parse_ics_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_unit = false;

    for ch in rest.chars() {
        match ch {
            'T' => in_time = true,
            '0'..='9' => number.push(ch),
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                saw_unit = true;
                total += match (unit, in_time) {
                    ('W', false) => Duration::weeks(n),
                    ('D', false) => Duration::days(n),
                    ('H', true) => Duration::hours(n),
                    ('M', true) => Duration::minutes(n),
                    ('S', true) => Duration::seconds(n),
                    _ => return None,
                };
            }
        }
    }

    if !number.is_empty() || !saw_unit {
        return None;
    }

    Some(if negative { -total } else { total })
}
