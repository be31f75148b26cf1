//! Monotonic revision tokens.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::CalError;

/// Container property holding the current revision.
pub const REVISION_PROPERTY: &str = "X-EVOLUTION-DATA-REVISION";

/// A timestamp plus a counter that disambiguates bumps within the same
/// clock tick. Ordered by timestamp, then counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionToken {
    timestamp: DateTime<Utc>,
    counter: u32,
}

impl RevisionToken {
    pub fn new(timestamp: DateTime<Utc>, counter: u32) -> Self {
        RevisionToken {
            timestamp: timestamp.trunc_subsecs(6),
            counter,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.counter
        )
    }
}

impl FromStr for RevisionToken {
    type Err = CalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalError::InvalidObject(format!("Invalid revision token: {s}"));
        let (stamp, rest) = s.trim().split_once('(').ok_or_else(invalid)?;
        let counter = rest
            .strip_suffix(')')
            .and_then(|c| c.parse().ok())
            .ok_or_else(invalid)?;
        let timestamp = DateTime::parse_from_rfc3339(stamp)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        Ok(RevisionToken::new(timestamp, counter))
    }
}

type Observer = Box<dyn Fn(&RevisionToken) + Send + Sync>;

pub struct RevisionTracker {
    current: RevisionToken,
    observers: Vec<Observer>,
}

impl RevisionTracker {
    /// Resume from a persisted token, or start fresh.
    pub fn new(persisted: Option<RevisionToken>) -> Self {
        RevisionTracker {
            current: persisted.unwrap_or_else(|| RevisionToken::new(Utc::now(), 0)),
            observers: Vec::new(),
        }
    }

    pub fn current(&self) -> &RevisionToken {
        &self.current
    }

    pub fn observe(&mut self, observer: impl Fn(&RevisionToken) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn bump(&mut self) -> RevisionToken {
        self.bump_at(Utc::now())
    }

    /// Advance using `now` as the clock reading.
    pub fn bump_at(&mut self, now: DateTime<Utc>) -> RevisionToken {
        let now = now.trunc_subsecs(6);
        self.current = if now > self.current.timestamp {
            RevisionToken::new(now, 0)
        } else {
            RevisionToken::new(self.current.timestamp, self.current.counter.saturating_add(1))
        };
        for observer in &self.observers {
            observer(&self.current);
        }
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[test]
    fn text_form_round_trips() {
        let token = RevisionToken::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(), 4);
        let text = token.to_string();
        assert_eq!(text, "2024-03-01T12:00:00.000000Z(4)");
        assert_eq!(text.parse::<RevisionToken>().unwrap(), token);
        assert!("nonsense".parse::<RevisionToken>().is_err());
    }

    #[test]
    fn bumps_are_strictly_increasing_even_when_the_clock_stalls() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut tracker = RevisionTracker::new(Some(RevisionToken::new(start, 0)));

        let a = tracker.bump_at(start);
        let b = tracker.bump_at(start - chrono::Duration::hours(1));
        let c = tracker.bump_at(start + chrono::Duration::seconds(1));

        assert!(a > RevisionToken::new(start, 0));
        assert!(b > a, "Clock going backwards still advances the counter");
        assert!(c > b);
        assert_eq!(c.counter(), 0);
    }

    #[test]
    fn observers_see_every_bump() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut tracker = RevisionTracker::new(None);
        let sink = seen.clone();
        tracker.observe(move |t| sink.lock().unwrap().push(t.clone()));

        tracker.bump();
        tracker.bump();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
