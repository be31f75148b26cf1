//! Reconciliation with an external append-only change log.
//!
//! Local mutations are propagated as the full serialized state of each
//! touched object (or a tombstone). Entries written by other stores are
//! replayed through the receive path with propagation turned off, so a
//! replayed change never echoes back into the log.

mod dir;
mod memory;

pub use dir::DirLog;
pub use memory::{MemoryLog, SharedMemoryLog};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CalResult;

/// How many times an entry that failed to apply is offered again.
const MAX_RETRIES: u32 = 3;

/// Collection-level metadata carried by the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum CollectionInfo {
    Deleted,
    Name(String),
    Color(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Full object state keyed by UID; `None` is a tombstone.
    Resource { key: String, value: Option<String> },
    Info(CollectionInfo),
}

pub trait SyncLog: Send {
    fn append(&mut self, key: &str, value: &str) -> CalResult<()>;

    fn append_tombstone(&mut self, key: &str) -> CalResult<()>;

    fn append_info(&mut self, info: CollectionInfo) -> CalResult<()>;

    /// Call `f` for every entry written by others since the last call, in
    /// log order.
    fn for_each_new(&mut self, f: &mut dyn FnMut(LogEntry)) -> CalResult<()>;
}

impl LogEntry {
    fn key(&self) -> Option<&str> {
        match self {
            LogEntry::Resource { key, .. } => Some(key),
            LogEntry::Info(_) => None,
        }
    }
}

pub struct SyncReconciler {
    log: Box<dyn SyncLog>,
    /// Entries handed back by `defer`, delivered again ahead of new ones.
    retry: Vec<LogEntry>,
    attempts: HashMap<String, u32>,
}

impl SyncReconciler {
    pub fn new(log: Box<dyn SyncLog>) -> Self {
        SyncReconciler {
            log,
            retry: Vec::new(),
            attempts: HashMap::new(),
        }
    }

    /// Push an object's current state, or a tombstone when it is gone.
    pub fn propagate(&mut self, uid: &str, state: Option<&str>) -> CalResult<()> {
        match state {
            Some(value) => {
                tracing::debug!(uid, "Propagating object");
                self.log.append(uid, value)
            }
            None => {
                tracing::debug!(uid, "Propagating tombstone");
                self.log.append_tombstone(uid)
            }
        }
    }

    pub fn publish_info(&mut self, info: CollectionInfo) -> CalResult<()> {
        self.log.append_info(info)
    }

    /// Deferred entries still due, then everything new in the log, in order.
    /// A deferred entry is dropped once a newer entry for its key arrives.
    pub fn take_pending(&mut self) -> CalResult<Vec<LogEntry>> {
        let mut fresh = Vec::new();
        self.log.for_each_new(&mut |entry| fresh.push(entry))?;

        let mut entries: Vec<LogEntry> = std::mem::take(&mut self.retry)
            .into_iter()
            .filter(|old| {
                let superseded = old
                    .key()
                    .is_some_and(|key| fresh.iter().any(|new| new.key() == Some(key)));
                !superseded
            })
            .collect();
        let retried: Vec<&str> = entries.iter().filter_map(LogEntry::key).collect();
        self.attempts.retain(|key, _| retried.contains(&key.as_str()));

        entries.extend(fresh);
        Ok(entries)
    }

    /// Offer an entry that could not be applied again on the next
    /// `take_pending`, up to a fixed number of attempts.
    pub fn defer(&mut self, entry: LogEntry) {
        let Some(key) = entry.key() else { return };
        let attempts = self.attempts.entry(key.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts > MAX_RETRIES {
            tracing::warn!(key, "Giving up on sync entry after {} attempts", MAX_RETRIES);
            self.attempts.remove(key);
            return;
        }
        self.retry.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciler_writes_state_and_tombstones() {
        let shared = SharedMemoryLog::new();
        let mut local = SyncReconciler::new(Box::new(shared.handle("a")));
        let mut remote = SyncReconciler::new(Box::new(shared.handle("b")));

        local.propagate("uid-1", Some("BEGIN:VCALENDAR...")).unwrap();
        local.propagate("uid-1", None).unwrap();
        local.publish_info(CollectionInfo::Name("Work".into())).unwrap();

        assert_eq!(
            remote.take_pending().unwrap(),
            vec![
                LogEntry::Resource {
                    key: "uid-1".into(),
                    value: Some("BEGIN:VCALENDAR...".into())
                },
                LogEntry::Resource {
                    key: "uid-1".into(),
                    value: None
                },
                LogEntry::Info(CollectionInfo::Name("Work".into())),
            ]
        );
        assert!(local.take_pending().unwrap().is_empty(), "Own writes are not replayed");
    }

    #[test]
    fn deferred_entries_come_back_until_superseded_or_exhausted() {
        let shared = SharedMemoryLog::new();
        let mut writer = shared.handle("a");
        let mut reader = SyncReconciler::new(Box::new(shared.handle("b")));

        writer.append("uid-1", "broken").unwrap();
        let first = reader.take_pending().unwrap();
        reader.defer(first[0].clone());
        assert_eq!(reader.take_pending().unwrap(), first, "Deferred entry is offered again");

        reader.defer(first[0].clone());
        writer.append("uid-1", "fixed").unwrap();
        assert_eq!(
            reader.take_pending().unwrap(),
            vec![LogEntry::Resource {
                key: "uid-1".into(),
                value: Some("fixed".into())
            }],
            "A newer entry replaces the deferred one"
        );

        writer.append("uid-2", "broken").unwrap();
        let mut pending = reader.take_pending().unwrap();
        for _ in 0..MAX_RETRIES {
            reader.defer(pending.remove(0));
            pending = reader.take_pending().unwrap();
            assert_eq!(pending.len(), 1);
        }
        reader.defer(pending.remove(0));
        assert!(reader.take_pending().unwrap().is_empty());
    }
}
