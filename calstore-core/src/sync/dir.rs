//! A sync log kept in a shared directory.
//!
//! ```text
//! <dir>/calendars/<collection>/
//! ├── laptop.jsonl          one file per writer, append-only
//! ├── phone.jsonl
//! └── .state/laptop.json    read offsets and newest timestamp per key
//! ```
//!
//! Every line carries the UTC time it was written. A resource entry is only
//! delivered if it is newer than anything already seen for its key, counting
//! this writer's own entries, so concurrent edits resolve last-writer-wins.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{CollectionInfo, LogEntry, SyncLog};
use crate::error::{CalError, CalResult};

#[derive(Debug, Serialize, Deserialize)]
struct Line {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    record: Record,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Record {
    Resource { key: String, value: Option<String> },
    Info { info: CollectionInfo },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReadState {
    /// Bytes consumed per writer file.
    #[serde(default)]
    offsets: BTreeMap<String, u64>,
    /// Newest timestamp seen per key.
    #[serde(default)]
    latest: BTreeMap<String, DateTime<Utc>>,
}

pub struct DirLog {
    collection_dir: PathBuf,
    app_id: String,
    state: ReadState,
}

impl DirLog {
    pub fn open(sync_dir: &Path, collection: &str, app_id: &str) -> CalResult<Self> {
        let collection_dir = sync_dir.join("calendars").join(collection);
        fs::create_dir_all(collection_dir.join(".state"))?;

        let state_path = collection_dir.join(".state").join(format!("{app_id}.json"));
        let state = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            ReadState::default()
        };

        tracing::debug!(dir = %collection_dir.display(), app_id, "Opened sync log");
        Ok(DirLog {
            collection_dir,
            app_id: app_id.to_string(),
            state,
        })
    }

    fn own_file(&self) -> PathBuf {
        self.collection_dir.join(format!("{}.jsonl", self.app_id))
    }

    fn state_path(&self) -> PathBuf {
        self.collection_dir
            .join(".state")
            .join(format!("{}.json", self.app_id))
    }

    fn save_state(&self) -> CalResult<()> {
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// A timestamp strictly newer than anything seen for `key`.
    fn stamp(&self, key: Option<&str>) -> DateTime<Utc> {
        let now = Utc::now();
        match key.and_then(|k| self.state.latest.get(k)) {
            Some(latest) if *latest >= now => *latest + Duration::microseconds(1),
            _ => now,
        }
    }

    fn write(&mut self, record: Record) -> CalResult<()> {
        let key = match &record {
            Record::Resource { key, .. } => Some(key.clone()),
            Record::Info { .. } => None,
        };
        let line = Line {
            ts: self.stamp(key.as_deref()),
            record,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.own_file())?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        file.sync_all()?;

        if let Some(key) = key {
            self.state.latest.insert(key, line.ts);
            self.save_state()?;
        }
        Ok(())
    }

    /// Complete lines past the stored offset of one writer's file.
    fn read_new_lines(&self, path: &Path) -> CalResult<(Vec<Line>, u64)> {
        let name = file_key(path);
        let offset = self.state.offsets.get(&name).copied().unwrap_or(0);

        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut lines = Vec::new();
        let mut consumed = offset;
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = reader.read_line(&mut buf)?;
            if read == 0 || !buf.ends_with('\n') {
                // EOF, or a line still being written
                break;
            }
            consumed += read as u64;
            match serde_json::from_str::<Line>(buf.trim_end()) {
                Ok(line) => lines.push(line),
                Err(e) => tracing::warn!(file = %path.display(), "Skipping bad sync line: {}", e),
            }
        }
        Ok((lines, consumed))
    }
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl SyncLog for DirLog {
    fn append(&mut self, key: &str, value: &str) -> CalResult<()> {
        self.write(Record::Resource {
            key: key.to_string(),
            value: Some(value.to_string()),
        })
    }

    fn append_tombstone(&mut self, key: &str) -> CalResult<()> {
        self.write(Record::Resource {
            key: key.to_string(),
            value: None,
        })
    }

    fn append_info(&mut self, info: CollectionInfo) -> CalResult<()> {
        self.write(Record::Info { info })
    }

    fn for_each_new(&mut self, f: &mut dyn FnMut(LogEntry)) -> CalResult<()> {
        let own = self.own_file();
        let entries = fs::read_dir(&self.collection_dir)
            .map_err(|e| CalError::Sync(format!("{}: {}", self.collection_dir.display(), e)))?;

        let mut writers: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "jsonl").unwrap_or(false) && *path != own)
            .collect();
        writers.sort();

        let mut pending = Vec::new();
        let mut offsets = HashMap::new();
        for path in &writers {
            let (lines, consumed) = self.read_new_lines(path)?;
            pending.extend(lines);
            offsets.insert(file_key(path), consumed);
        }
        pending.sort_by_key(|line| line.ts);

        for line in pending {
            match line.record {
                Record::Resource { key, value } => {
                    let newer = self
                        .state
                        .latest
                        .get(&key)
                        .map(|seen| line.ts > *seen)
                        .unwrap_or(true);
                    if !newer {
                        tracing::debug!(key, "Skipping stale sync entry");
                        continue;
                    }
                    self.state.latest.insert(key.clone(), line.ts);
                    f(LogEntry::Resource { key, value });
                }
                Record::Info { info } => f(LogEntry::Info(info)),
            }
        }

        self.state.offsets.extend(offsets);
        self.save_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn drain(log: &mut DirLog) -> Vec<LogEntry> {
        let mut out = Vec::new();
        log.for_each_new(&mut |e| out.push(e)).unwrap();
        out
    }

    #[test]
    fn writers_see_each_other_but_not_themselves() {
        let dir = TempDir::new().unwrap();
        let mut laptop = DirLog::open(dir.path(), "personal", "laptop").unwrap();
        let mut phone = DirLog::open(dir.path(), "personal", "phone").unwrap();

        laptop.append("a", "state-1").unwrap();
        laptop.append_info(CollectionInfo::Color("#ff0000".into())).unwrap();

        assert!(drain(&mut laptop).is_empty());
        assert_eq!(
            drain(&mut phone),
            vec![
                LogEntry::Resource {
                    key: "a".into(),
                    value: Some("state-1".into())
                },
                LogEntry::Info(CollectionInfo::Color("#ff0000".into())),
            ]
        );
        assert!(drain(&mut phone).is_empty(), "Offsets advance");
        assert!(dir.path().join("calendars/personal/laptop.jsonl").exists());
    }

    #[test]
    fn older_entries_lose_to_newer_local_writes() {
        let dir = TempDir::new().unwrap();
        let mut laptop = DirLog::open(dir.path(), "c", "laptop").unwrap();
        let mut phone = DirLog::open(dir.path(), "c", "phone").unwrap();

        laptop.append("a", "from-laptop").unwrap();
        phone.append("a", "from-phone").unwrap();

        assert!(
            drain(&mut phone).is_empty(),
            "Phone wrote after laptop, so the laptop entry is stale for it"
        );
        assert_eq!(
            drain(&mut laptop),
            vec![LogEntry::Resource {
                key: "a".into(),
                value: Some("from-phone".into())
            }]
        );
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut laptop = DirLog::open(dir.path(), "c", "laptop").unwrap();
        laptop.append_tombstone("gone").unwrap();

        let mut phone = DirLog::open(dir.path(), "c", "phone").unwrap();
        assert_eq!(drain(&mut phone).len(), 1);
        drop(phone);

        let mut phone = DirLog::open(dir.path(), "c", "phone").unwrap();
        assert!(drain(&mut phone).is_empty());
    }
}
