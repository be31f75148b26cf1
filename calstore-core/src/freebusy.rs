//! Free/busy lookups.

use chrono::{DateTime, Utc};

use crate::component::{Component, Property};
use crate::config::AccountConfig;
use crate::recurrence::occurrences;
use crate::time::format_utc;
use crate::timezone::Resolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Calendar user address, e.g. `mailto:alice@example.com`.
    pub address: String,
    pub name: Option<String>,
}

/// Maps user identifiers to calendar accounts.
pub trait AccountResolver: Send + Sync {
    fn resolve(&self, user: &str) -> Option<Account>;

    fn default_account(&self) -> Option<Account>;
}

/// Accounts listed in the store config.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: Vec<Account>,
}

impl StaticAccounts {
    pub fn new(accounts: Vec<Account>) -> Self {
        StaticAccounts { accounts }
    }

    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        StaticAccounts::new(
            accounts
                .iter()
                .map(|a| Account {
                    address: a.address.clone(),
                    name: a.name.clone(),
                })
                .collect(),
        )
    }
}

fn strip_mailto(address: &str) -> &str {
    let trimmed = address.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &trimmed[7..],
        _ => trimmed,
    }
}

/// Compare calendar user addresses, ignoring `mailto:` and case.
pub fn same_address(a: &str, b: &str) -> bool {
    strip_mailto(a).eq_ignore_ascii_case(strip_mailto(b))
}

impl AccountResolver for StaticAccounts {
    fn resolve(&self, user: &str) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| same_address(&a.address, user))
            .cloned()
    }

    fn default_account(&self) -> Option<Account> {
        self.accounts.first().cloned()
    }
}

fn with_mailto(address: &str) -> String {
    format!("mailto:{}", strip_mailto(address))
}

/// Build one VFREEBUSY for `account` from `components` in `[start, end]`.
///
/// Transparent components are skipped. A master's occurrence is skipped when
/// a detached instance exists for it; the instance is reported instead.
pub fn build_vfreebusy<'c>(
    account: &Account,
    components: impl IntoIterator<Item = (&'c Component, Vec<String>)>,
    resolver: &Resolver<'_>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Component {
    let mut vfreebusy = Component::new("VFREEBUSY");
    let mut organizer = Property::new("ORGANIZER", with_mailto(&account.address));
    if let Some(name) = &account.name {
        organizer.set_param("CN", param_text(name));
    }
    vfreebusy.push_prop(organizer);
    vfreebusy.push_prop(Property::new("DTSTART", format_utc(&start)));
    vfreebusy.push_prop(Property::new("DTEND", format_utc(&end)));

    for (comp, detached_rids) in components {
        if comp.is_transparent() {
            continue;
        }
        for occurrence in occurrences(comp, resolver, start, end) {
            if comp.recurrence_id().is_none()
                && comp.has_recurrences()
                && detached_rids.contains(&occurrence.rid.to_ics_string())
            {
                continue;
            }
            let mut period = Property::new(
                "FREEBUSY",
                format!("{}/{}", format_utc(&occurrence.start), format_utc(&occurrence.end)),
            )
            .with_param("FBTYPE", "BUSY");
            if let Some(summary) = comp.summary() {
                period.set_param("X-SUMMARY", param_text(summary));
            }
            if let Some(location) = comp.location() {
                period.set_param("X-LOCATION", param_text(location));
            }
            vfreebusy.push_prop(period);
        }
    }

    vfreebusy
}

/// Parameter values may not carry DQUOTE or control characters.
fn param_text(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .filter(|c| *c != '"')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_component;
    use crate::timezone::TimezoneSet;
    use chrono::TimeZone;

    fn make_account() -> Account {
        Account {
            address: "mailto:alice@example.com".into(),
            name: Some("Alice".into()),
        }
    }

    #[test]
    fn resolves_addresses_loosely() {
        let accounts = StaticAccounts::new(vec![make_account()]);
        assert!(accounts.resolve("ALICE@example.com").is_some());
        assert!(accounts.resolve("mailto:alice@example.com").is_some());
        assert!(accounts.resolve("bob@example.com").is_none());
        assert_eq!(accounts.default_account(), Some(make_account()));
    }

    #[test]
    fn periods_for_busy_occurrences_only() {
        let busy = parse_component(
            "BEGIN:VEVENT\r\nUID:a\r\nSUMMARY:Review\r\nLOCATION:HQ\r\n\
DTSTART:20240101T100000Z\r\nDTEND:20240101T110000Z\r\nRRULE:FREQ=DAILY;COUNT=3\r\nEND:VEVENT\r\n",
        )
        .unwrap();
        let free = parse_component(
            "BEGIN:VEVENT\r\nUID:b\r\nTRANSP:TRANSPARENT\r\n\
DTSTART:20240101T120000Z\r\nDTEND:20240101T130000Z\r\nEND:VEVENT\r\n",
        )
        .unwrap();

        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let vfb = build_vfreebusy(
            &make_account(),
            vec![(&busy, vec!["20240102T100000Z".to_string()]), (&free, Vec::new())],
            &resolver,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
        );

        let organizer = vfb.find_prop("ORGANIZER").unwrap();
        assert_eq!(organizer.param("CN"), Some("Alice"));
        assert_eq!(vfb.find_prop("DTSTART").unwrap().value, "20240101T000000Z");

        let periods: Vec<&str> = vfb.find_props("FREEBUSY").map(|p| p.value.as_str()).collect();
        assert_eq!(
            periods,
            vec!["20240101T100000Z/20240101T110000Z", "20240103T100000Z/20240103T110000Z"]
        );
        let first = vfb.find_prop("FREEBUSY").unwrap();
        assert_eq!(first.param("FBTYPE"), Some("BUSY"));
        assert_eq!(first.param("X-SUMMARY"), Some("Review"));
        assert_eq!(first.param("X-LOCATION"), Some("HQ"));
    }

    #[test]
    fn quotes_and_control_characters_are_kept_out_of_parameters() {
        let mut busy = parse_component(
            "BEGIN:VEVENT\r\nUID:q\r\nSUMMARY:The \"big\" one\r\n\
DTSTART:20240101T100000Z\r\nDTEND:20240101T110000Z\r\nEND:VEVENT\r\n",
        )
        .unwrap();
        busy.set_prop(Property::new("LOCATION", "Room\t4"));

        let set = TimezoneSet::default();
        let resolver = Resolver::new(&set, None);
        let vfb = build_vfreebusy(
            &make_account(),
            vec![(&busy, Vec::new())],
            &resolver,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        );

        let period = vfb.find_prop("FREEBUSY").unwrap();
        assert_eq!(period.param("X-SUMMARY"), Some("The big one"));
        assert_eq!(period.param("X-LOCATION"), Some("Room 4"));
        assert!(!vfb.to_string().contains("\"big\""));
    }
}
