//! Timezone lookup.
//!
//! A TZID resolves, in order, against the VTIMEZONEs travelling with an
//! incoming payload, the store's own embedded VTIMEZONEs, and the builtin
//! IANA table from `chrono-tz`.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::component::Component;
use crate::time::is_utc_tzid;

#[derive(Debug, Clone, PartialEq)]
pub enum Zone {
    Utc,
    Iana(Tz),
    /// A VTIMEZONE that names no IANA zone; approximated by its standard offset.
    Fixed(FixedOffset),
}

#[derive(Debug, Clone)]
pub struct Timezone {
    pub tzid: String,
    pub zone: Zone,
    /// The VTIMEZONE this zone was read from, if it came from calendar data.
    pub component: Option<Component>,
}

impl Timezone {
    pub fn utc() -> Self {
        Timezone {
            tzid: "UTC".to_string(),
            zone: Zone::Utc,
            component: None,
        }
    }

    /// Look `tzid` up in the builtin IANA table.
    pub fn builtin(tzid: &str) -> Option<Self> {
        if is_utc_tzid(tzid) {
            return Some(Timezone::utc());
        }
        iana_zone(tzid).map(|tz| Timezone {
            tzid: tzid.to_string(),
            zone: Zone::Iana(tz),
            component: None,
        })
    }

    pub fn from_vtimezone(comp: &Component) -> Option<Self> {
        if comp.name != "VTIMEZONE" {
            return None;
        }
        let tzid = comp.find_prop("TZID")?.value.clone();

        let location = comp.find_prop("X-LIC-LOCATION").map(|p| p.value.as_str());
        let zone = if is_utc_tzid(&tzid) {
            Zone::Utc
        } else if let Some(tz) = iana_zone(&tzid).or_else(|| location.and_then(iana_zone)) {
            Zone::Iana(tz)
        } else {
            Zone::Fixed(standard_offset(comp)?)
        };

        Some(Timezone {
            tzid,
            zone,
            component: Some(comp.clone()),
        })
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match &self.zone {
            Zone::Utc => local.and_utc(),
            Zone::Iana(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                // Inside a DST gap: apply the offset in force just before it
                .unwrap_or_else(|| {
                    let offset = tz.offset_from_utc_datetime(&local).fix();
                    (local - chrono::Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
                }),
            Zone::Fixed(offset) => {
                (local - chrono::Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
            }
        }
    }

    pub fn from_utc(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match &self.zone {
            Zone::Utc => at.naive_utc(),
            Zone::Iana(tz) => at.with_timezone(tz).naive_local(),
            Zone::Fixed(offset) => at.with_timezone(offset).naive_local(),
        }
    }

    /// IANA name usable by the recurrence expander, if any.
    pub fn iana(&self) -> Option<Tz> {
        match self.zone {
            Zone::Iana(tz) => Some(tz),
            _ => None,
        }
    }
}

/// Find an IANA zone for names such as `Europe/Berlin` or
/// `/freeassociation.sourceforge.net/Tzfile/Europe/Berlin`.
fn iana_zone(name: &str) -> Option<Tz> {
    let mut candidate = name.trim().trim_start_matches('/');
    loop {
        if let Ok(tz) = candidate.parse::<Tz>() {
            return Some(tz);
        }
        let pos = candidate.find('/')?;
        candidate = &candidate[pos + 1..];
    }
}

fn standard_offset(vtimezone: &Component) -> Option<FixedOffset> {
    let rule = vtimezone
        .components
        .iter()
        .rev()
        .find(|c| c.name == "STANDARD")
        .or_else(|| vtimezone.components.last())?;
    parse_utc_offset(&rule.find_prop("TZOFFSETTO")?.value)
}

/// `+HHMM`, `-HHMM` or `+HHMMSS`
fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    let sign = match value.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = &value[1..];
    if digits.len() != 4 && digits.len() != 6 {
        return None;
    }
    let hours: i32 = digits.get(0..2)?.parse().ok()?;
    let minutes: i32 = digits.get(2..4)?.parse().ok()?;
    let seconds: i32 = digits.get(4..6).map(|s| s.parse()).transpose().ok()?.unwrap_or(0);
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))
}

/// Get, add and list timezones known to a calendar.
pub trait TimezoneCache {
    fn get(&self, tzid: &str) -> Option<Timezone>;
    fn add(&mut self, tz: Timezone);
    fn list(&self) -> Vec<Timezone>;
}

/// Timezones embedded in one calendar container, ordered by TZID.
#[derive(Debug, Clone, Default)]
pub struct TimezoneSet {
    zones: BTreeMap<String, Timezone>,
}

impl TimezoneSet {
    /// Collect every parseable VTIMEZONE from `components`.
    pub fn from_components<'a>(components: impl IntoIterator<Item = &'a Component>) -> Self {
        let mut set = TimezoneSet::default();
        for comp in components {
            match Timezone::from_vtimezone(comp) {
                Some(tz) => set.add(tz),
                None => tracing::warn!("Skipping VTIMEZONE without a usable TZID or offset"),
            }
        }
        set
    }

    pub fn contains(&self, tzid: &str) -> bool {
        self.zones.contains_key(tzid)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// VTIMEZONE components for serialization.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.zones.values().filter_map(|tz| tz.component.as_ref())
    }
}

impl TimezoneCache for TimezoneSet {
    fn get(&self, tzid: &str) -> Option<Timezone> {
        self.zones.get(tzid).cloned()
    }

    /// Existing entries win; a calendar never silently redefines a zone.
    fn add(&mut self, tz: Timezone) {
        self.zones.entry(tz.tzid.clone()).or_insert(tz);
    }

    fn list(&self) -> Vec<Timezone> {
        self.zones.values().cloned().collect()
    }
}

/// Resolves TZIDs for one operation.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    store: &'a TimezoneSet,
    in_flight: Option<&'a TimezoneSet>,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a TimezoneSet, in_flight: Option<&'a TimezoneSet>) -> Self {
        Resolver { store, in_flight }
    }

    pub fn resolve(&self, tzid: &str) -> Option<Timezone> {
        if is_utc_tzid(tzid) {
            return Some(Timezone::utc());
        }
        self.in_flight
            .and_then(|set| set.get(tzid))
            .or_else(|| self.store.get(tzid))
            .or_else(|| Timezone::builtin(tzid))
    }

    pub fn is_known(&self, tzid: &str) -> bool {
        self.resolve(tzid).is_some()
    }
}

/// Resolve `tzid` against the in-flight zones, then `cache`, then the
/// builtin table.
pub fn resolve(tzid: &str, in_flight: Option<&TimezoneSet>, cache: &TimezoneSet) -> Option<Timezone> {
    Resolver::new(cache, in_flight).resolve(tzid)
}
