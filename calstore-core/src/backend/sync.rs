//! Inbound replay from the sync log, the refresh timer and reload from disk.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::state::{State, empty_container};
use super::{CalBackend, ModType, ModifyOptions, lock_mutex};
use crate::component::ComponentId;
use crate::error::CalResult;
use crate::notify::BackendEvent;
use crate::persist::load_or_create;
use crate::sync::LogEntry;

/// Replayed changes never go back out, and the logged state is the whole
/// object, so detached instances it no longer lists must go.
const REPLAY: ModifyOptions = ModifyOptions {
    propagate: false,
    carry_over_detached: false,
    keep_timestamps: true,
};

impl CalBackend {
    /// Apply one log entry: a value is the full new state of object `key`,
    /// `None` removes it.
    pub fn replay_inbound(&self, key: &str, value: Option<&str>) -> CalResult<()> {
        match value {
            Some(text) => {
                tracing::debug!(key, "Replaying object");
                self.receive_objects_with(text, REPLAY).map(|_| ())
            }
            None => {
                let exists = self.lock().borrow().store.contains(key);
                if !exists {
                    return Ok(());
                }
                tracing::debug!(key, "Replaying tombstone");
                self.remove_objects_with(&[ComponentId::new(key, None)], ModType::AllInstances, REPLAY)
                    .map(|_| ())
            }
        }
    }

    /// Drain everything other writers have logged since the last call.
    /// Returns how many resource entries were applied.
    pub fn replay_all_pending(&self) -> CalResult<usize> {
        let guard = self.lock();
        if !guard.borrow().opened {
            return Ok(0);
        }

        // Store lock first, then the log.
        let entries = {
            let mut sync = lock_mutex(&self.shared.sync);
            match sync.as_mut() {
                Some(reconciler) => reconciler.take_pending()?,
                None => return Ok(0),
            }
        };

        let mut applied = 0;
        let mut failed = Vec::new();
        for entry in entries {
            match entry {
                LogEntry::Resource { key, value } => match self.replay_inbound(&key, value.as_deref()) {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        tracing::warn!(%key, "Could not apply sync entry, will retry: {}", e);
                        failed.push(LogEntry::Resource { key, value });
                    }
                },
                LogEntry::Info(info) => {
                    tracing::debug!(?info, "Collection info from sync log");
                    self.emit(BackendEvent::Collection(info));
                }
            }
        }
        if !failed.is_empty() {
            let mut sync = lock_mutex(&self.shared.sync);
            if let Some(reconciler) = sync.as_mut() {
                for entry in failed {
                    reconciler.defer(entry);
                }
            }
        }
        if applied > 0 {
            tracing::info!(applied, "Applied changes from sync log");
        }
        Ok(applied)
    }

    /// Poll the sync log now.
    pub fn refresh(&self) -> CalResult<usize> {
        self.replay_all_pending()
    }

    pub(super) fn start_refresh_timer(&self) {
        let Some(interval) = self.shared.refresh_interval else {
            return;
        };
        if lock_mutex(&self.shared.sync).is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, periodic refresh disabled");
            return;
        };

        let weak = Arc::downgrade(&self.shared);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; open already replayed.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                let backend = CalBackend { shared };
                let result = tokio::task::spawn_blocking(move || backend.replay_all_pending()).await;
                match result {
                    Ok(Err(e)) => tracing::warn!("Periodic refresh failed: {}", e),
                    Err(e) => tracing::error!("Refresh task panicked: {}", e),
                    Ok(Ok(_)) => {}
                }
            }
        });

        if let Some(previous) = lock_mutex(&self.shared.refresh).replace(task) {
            previous.abort();
        }
        tracing::debug!(?interval, "Started refresh timer");
    }

    /// Re-read the container after another process wrote it, and report
    /// what changed per object.
    pub fn reload(&self) -> CalResult<()> {
        let (text, writable) = load_or_create(&self.shared.path, empty_container)?;

        let guard = self.lock();
        let mut state = guard.borrow_mut();
        state.ensure_open()?;

        let (mut loaded, _) = State::load(&text, self.shared.kind, self.shared.path.clone(), writable)?;
        self.observe_revision(&mut loaded);
        loaded.views = std::mem::take(&mut state.views);

        let uids: BTreeSet<String> = state.store.uids().into_iter().chain(loaded.store.uids()).collect();
        let mut events = Vec::new();
        for uid in &uids {
            let before = state.serialize_object(uid);
            let after = loaded.serialize_object(uid);
            if before == after {
                continue;
            }
            let old = state.store.master(uid).cloned();
            let new = loaded.store.master(uid).cloned();
            match (old, new) {
                (old, None) if after.is_none() => events.push(BackendEvent::ComponentRemoved {
                    id: ComponentId::new(uid.as_str(), None),
                    old,
                    new: None,
                }),
                (_, _) if before.is_none() => {
                    for comp in loaded.store.object_components(uid) {
                        events.push(BackendEvent::ComponentCreated(comp.clone()));
                    }
                }
                (old, Some(new)) => events.push(BackendEvent::ComponentModified { old, new }),
                (old, None) => {
                    for comp in loaded.store.object_components(uid) {
                        events.push(BackendEvent::ComponentModified {
                            old: old.clone(),
                            new: comp.clone(),
                        });
                    }
                }
            }
        }

        *state = loaded;
        self.dispatch_to_views(&mut state, &events);
        let revision = state.revision.current().to_string();
        drop(state);

        tracing::info!(changed = events.len(), "Reloaded calendar from disk");
        for event in events {
            self.emit(event);
        }
        self.emit(BackendEvent::PropertyChanged {
            name: "revision".to_string(),
            value: revision,
        });
        Ok(())
    }
}
