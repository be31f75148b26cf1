//! In-process log shared between stores.

use std::sync::{Arc, Mutex};

use super::{CollectionInfo, LogEntry, SyncLog};
use crate::error::CalResult;

#[derive(Default)]
struct Entries {
    entries: Vec<(String, LogEntry)>,
}

/// The shared log itself. Each store gets its own [`MemoryLog`] handle.
#[derive(Clone, Default)]
pub struct SharedMemoryLog {
    inner: Arc<Mutex<Entries>>,
}

impl SharedMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle writing as `writer` that reads everyone else's entries.
    pub fn handle(&self, writer: &str) -> MemoryLog {
        MemoryLog {
            shared: self.clone(),
            writer: writer.to_string(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MemoryLog {
    shared: SharedMemoryLog,
    writer: String,
    cursor: usize,
}

impl MemoryLog {
    fn push(&mut self, entry: LogEntry) {
        self.shared.lock().entries.push((self.writer.clone(), entry));
    }
}

impl SyncLog for MemoryLog {
    fn append(&mut self, key: &str, value: &str) -> CalResult<()> {
        self.push(LogEntry::Resource {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
        Ok(())
    }

    fn append_tombstone(&mut self, key: &str) -> CalResult<()> {
        self.push(LogEntry::Resource {
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }

    fn append_info(&mut self, info: CollectionInfo) -> CalResult<()> {
        self.push(LogEntry::Info(info));
        Ok(())
    }

    fn for_each_new(&mut self, f: &mut dyn FnMut(LogEntry)) -> CalResult<()> {
        let new: Vec<LogEntry> = {
            let guard = self.shared.lock();
            let new = guard.entries[self.cursor..]
                .iter()
                .filter(|(writer, _)| *writer != self.writer)
                .map(|(_, entry)| entry.clone())
                .collect();
            self.cursor = guard.entries.len();
            new
        };
        for entry in new {
            f(entry);
        }
        Ok(())
    }
}
