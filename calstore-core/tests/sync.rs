use std::sync::{Arc, Mutex};

use calstore_core::scheduler::ManualScheduler;
use calstore_core::sync::{CollectionInfo, DirLog, LogEntry, SharedMemoryLog, SyncLog};
use calstore_core::{BackendEvent, CalBackend, CalResult, ComponentId, ModType};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const EVENT: &str = "BEGIN:VEVENT\r\n\
UID:shared-1\r\n\
SUMMARY:Planning\r\n\
DTSTART:20240301T090000Z\r\n\
DTEND:20240301T100000Z\r\n\
END:VEVENT\r\n";

fn make_test_backend(dir: &TempDir, name: &str, log: Box<dyn SyncLog>) -> CalBackend {
    let backend = CalBackend::builder(dir.path().join(format!("{name}.ics")))
        .scheduler(Arc::new(ManualScheduler::new()))
        .sync_log(log)
        .build();
    backend.open().expect("Should open");
    backend
}

/// Records what the backend writes and hands out a scripted inbound queue.
#[derive(Clone, Default)]
struct RecordingLog {
    written: Arc<Mutex<Vec<String>>>,
    inbound: Arc<Mutex<Vec<LogEntry>>>,
}

impl SyncLog for RecordingLog {
    fn append(&mut self, key: &str, _value: &str) -> CalResult<()> {
        self.written.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn append_tombstone(&mut self, key: &str) -> CalResult<()> {
        self.written.lock().unwrap().push(format!("-{key}"));
        Ok(())
    }

    fn append_info(&mut self, _info: CollectionInfo) -> CalResult<()> {
        Ok(())
    }

    fn for_each_new(&mut self, f: &mut dyn FnMut(LogEntry)) -> CalResult<()> {
        for entry in self.inbound.lock().unwrap().drain(..) {
            f(entry);
        }
        Ok(())
    }
}

#[test]
fn local_changes_are_propagated_once_per_object() {
    let dir = TempDir::new().unwrap();
    let log = RecordingLog::default();
    let backend = make_test_backend(&dir, "local", Box::new(log.clone()));

    let master = EVENT.replace("shared-1", "series");
    backend.create_objects(&[EVENT, master.as_str()]).unwrap();
    backend
        .remove_objects(&[ComponentId::new("shared-1", None)], ModType::AllInstances)
        .unwrap();

    assert_eq!(
        *log.written.lock().unwrap(),
        vec!["shared-1".to_string(), "series".to_string(), "-shared-1".to_string()]
    );
}

#[test]
fn replayed_entries_are_not_written_back() {
    let dir = TempDir::new().unwrap();
    let log = RecordingLog::default();
    log.inbound.lock().unwrap().push(LogEntry::Resource {
        key: "shared-1".into(),
        value: Some(EVENT.to_string()),
    });

    let backend = make_test_backend(&dir, "replay", Box::new(log.clone()));
    assert_eq!(backend.get_object("shared-1", None).unwrap().summary(), Some("Planning"));

    log.inbound.lock().unwrap().push(LogEntry::Resource {
        key: "shared-1".into(),
        value: None,
    });
    assert_eq!(backend.refresh().unwrap(), 1);
    assert!(backend.get_object("shared-1", None).is_err());

    assert!(log.written.lock().unwrap().is_empty());
}

#[test]
fn unappliable_entry_is_retried_until_a_newer_one_arrives() {
    let dir = TempDir::new().unwrap();
    let log = RecordingLog::default();
    let backend = make_test_backend(&dir, "retry", Box::new(log.clone()));

    log.inbound.lock().unwrap().push(LogEntry::Resource {
        key: "shared-1".into(),
        value: Some("BEGIN:VEVENT\r\nUID:shared-1".into()),
    });
    assert_eq!(backend.refresh().unwrap(), 0);
    assert_eq!(backend.refresh().unwrap(), 0, "Still failing on retry");
    assert!(backend.get_object("shared-1", None).is_err());

    log.inbound.lock().unwrap().push(LogEntry::Resource {
        key: "shared-1".into(),
        value: Some(EVENT.to_string()),
    });
    assert_eq!(backend.refresh().unwrap(), 1);
    assert_eq!(backend.get_object("shared-1", None).unwrap().summary(), Some("Planning"));
    assert_eq!(backend.refresh().unwrap(), 0, "Superseded entry is not offered again");
}

#[test]
fn tombstone_for_unknown_object_is_ignored() {
    let dir = TempDir::new().unwrap();
    let log = RecordingLog::default();
    let backend = make_test_backend(&dir, "ghost", Box::new(log.clone()));
    let mut rx = backend.subscribe();

    backend.replay_inbound("never-seen", None).unwrap();
    assert!(rx.try_recv().is_err());
    assert!(!backend.is_dirty());
}

#[test]
fn collection_info_is_reported_to_host() {
    let dir = TempDir::new().unwrap();
    let log = RecordingLog::default();
    let backend = make_test_backend(&dir, "info", Box::new(log.clone()));
    let mut rx = backend.subscribe();

    log.inbound
        .lock()
        .unwrap()
        .push(LogEntry::Info(CollectionInfo::Name("Team".into())));
    assert_eq!(backend.refresh().unwrap(), 0);

    match rx.try_recv() {
        Ok(BackendEvent::Collection(CollectionInfo::Name(name))) => assert_eq!(name, "Team"),
        other => panic!("Expected collection info, got {other:?}"),
    }
}

#[test]
fn two_stores_converge_through_shared_log() {
    let dir = TempDir::new().unwrap();
    let shared = SharedMemoryLog::new();
    let laptop = make_test_backend(&dir, "laptop", Box::new(shared.handle("laptop")));
    let phone = make_test_backend(&dir, "phone", Box::new(shared.handle("phone")));

    laptop.create_objects(&[EVENT]).unwrap();
    assert_eq!(shared.len(), 1);

    assert_eq!(phone.refresh().unwrap(), 1);
    assert_eq!(phone.get_object("shared-1", None).unwrap().summary(), Some("Planning"));
    assert_eq!(shared.len(), 1, "Replay is not echoed");

    let renamed = EVENT.replace("Planning", "Planning (room 4)");
    phone
        .modify_objects(&[renamed.as_str()], ModType::AllInstances)
        .unwrap();
    assert_eq!(laptop.refresh().unwrap(), 1);
    assert_eq!(
        laptop.get_object("shared-1", None).unwrap().summary(),
        Some("Planning (room 4)")
    );

    laptop
        .remove_objects(&[ComponentId::new("shared-1", None)], ModType::AllInstances)
        .unwrap();
    assert_eq!(phone.refresh().unwrap(), 1);
    assert!(phone.get_object("shared-1", None).is_err());
    assert_eq!(laptop.refresh().unwrap(), 0);
}

#[test]
fn directory_logs_deliver_between_writers() {
    let sync_dir = TempDir::new().unwrap();
    let dir = TempDir::new().unwrap();

    let laptop_log = DirLog::open(sync_dir.path(), "work", "laptop").unwrap();
    let phone_log = DirLog::open(sync_dir.path(), "work", "phone").unwrap();
    let laptop = make_test_backend(&dir, "laptop", Box::new(laptop_log));
    let phone = make_test_backend(&dir, "phone", Box::new(phone_log));

    laptop.create_objects(&[EVENT]).unwrap();
    assert_eq!(phone.refresh().unwrap(), 1);
    assert!(phone.get_object("shared-1", None).is_ok());
    assert_eq!(laptop.refresh().unwrap(), 0);
}
