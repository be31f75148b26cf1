//! The host-facing calendar backend.
//!
//! A `CalBackend` owns one container file. Every operation takes the store
//! lock, works on the in-memory state, and leaves saving to the scheduler.

mod mutate;
mod read;
mod receive;
mod state;
mod sync;

pub use read::BackendProperty;

use std::cell::{RefCell, RefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::component::ComponentKind;
use crate::config::StoreConfig;
use crate::error::{CalError, CalResult};
use crate::freebusy::{AccountResolver, StaticAccounts};
use crate::lock::{ReentrantGuard, ReentrantLock};
use crate::notify::BackendEvent;
use crate::persist::load_or_create;
use crate::query::{QueryContext, QueryEvaluator, SexpEvaluator};
use crate::scheduler::{Scheduler, ThreadScheduler, TokioScheduler};
use crate::sync::{DirLog, SyncLog, SyncReconciler};
use crate::timezone::Resolver;

use state::{State, empty_container};

/// How far a modification or removal reaches into a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    ThisInstanceOnly,
    ThisAndFuture,
    ThisAndPrior,
    AllInstances,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifyOptions {
    /// Push touched objects to the sync log.
    pub propagate: bool,
    /// Keep existing detached instances when a master is replaced.
    pub carry_over_detached: bool,
    /// Leave CREATED and LAST-MODIFIED as submitted.
    pub keep_timestamps: bool,
}

impl Default for ModifyOptions {
    fn default() -> Self {
        ModifyOptions {
            propagate: true,
            carry_over_detached: false,
            keep_timestamps: false,
        }
    }
}

const EVENT_CAPACITY: usize = 256;

/// Everything one mutation wants to report, collected while the state is
/// borrowed and committed afterwards.
#[derive(Default)]
pub(crate) struct Batch {
    events: Vec<BackendEvent>,
    /// UIDs in first-touched order.
    touched: Vec<String>,
    /// Container-level change with no component event, e.g. a new zone.
    changed: bool,
}

impl Batch {
    pub fn push(&mut self, event: BackendEvent) {
        self.events.push(event);
    }

    pub fn touch(&mut self, uid: &str) {
        if !self.touched.iter().any(|u| u == uid) {
            self.touched.push(uid.to_string());
        }
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.touched.is_empty() && !self.changed
    }
}

struct Shared {
    kind: ComponentKind,
    path: PathBuf,
    save_delay: Duration,
    refresh_interval: Option<Duration>,
    state: ReentrantLock<RefCell<State>>,
    refresh: Mutex<Option<JoinHandle<()>>>,
    sync: Mutex<Option<SyncReconciler>>,
    events: broadcast::Sender<BackendEvent>,
    scheduler: Arc<dyn Scheduler>,
    evaluator: Arc<dyn QueryEvaluator>,
    accounts: Arc<dyn AccountResolver>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = lock_mutex(&self.refresh).take() {
            task.abort();
        }
    }
}

fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A single-file calendar store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CalBackend {
    shared: Arc<Shared>,
}

// ============================================================================
// Construction
// ============================================================================

pub struct CalBackendBuilder {
    path: PathBuf,
    kind: ComponentKind,
    save_delay: Duration,
    refresh_interval: Option<Duration>,
    scheduler: Option<Arc<dyn Scheduler>>,
    evaluator: Arc<dyn QueryEvaluator>,
    accounts: Arc<dyn AccountResolver>,
    sync_log: Option<Box<dyn SyncLog>>,
}

impl CalBackendBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CalBackendBuilder {
            path: path.into(),
            kind: ComponentKind::Event,
            save_delay: Duration::from_millis(500),
            refresh_interval: None,
            scheduler: None,
            evaluator: Arc::new(SexpEvaluator),
            accounts: Arc::new(StaticAccounts::default()),
            sync_log: None,
        }
    }

    pub fn kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn QueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn accounts(mut self, accounts: Arc<dyn AccountResolver>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn sync_log(mut self, log: Box<dyn SyncLog>) -> Self {
        self.sync_log = Some(log);
        self
    }

    pub fn build(self) -> CalBackend {
        let scheduler = self.scheduler.unwrap_or_else(|| match TokioScheduler::current() {
            Some(tokio) => Arc::new(tokio),
            None => Arc::new(ThreadScheduler),
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        CalBackend {
            shared: Arc::new(Shared {
                kind: self.kind,
                state: ReentrantLock::new(RefCell::new(State::unopened(self.path.clone()))),
                path: self.path,
                save_delay: self.save_delay,
                refresh_interval: self.refresh_interval,
                refresh: Mutex::new(None),
                sync: Mutex::new(self.sync_log.map(SyncReconciler::new)),
                events,
                scheduler,
                evaluator: self.evaluator,
                accounts: self.accounts,
            }),
        }
    }
}

impl CalBackend {
    pub fn builder(path: impl Into<PathBuf>) -> CalBackendBuilder {
        CalBackendBuilder::new(path)
    }

    /// Build a backend from the store config, wiring the directory sync log
    /// when a `[sync]` section is present.
    pub fn from_config(config: &StoreConfig) -> CalResult<Self> {
        let refresh = if config.refresh.enabled {
            Some(config.refresh.interval()?)
        } else {
            None
        };

        let mut builder = CalBackendBuilder::new(config.calendar_path())
            .kind(config.kind)
            .save_delay(config.save_delay()?)
            .refresh_interval(refresh)
            .accounts(Arc::new(StaticAccounts::from_config(&config.accounts)));

        if let Some(sync) = &config.sync {
            let log = DirLog::open(&sync.dir(), &sync.collection, &sync.app_id())?;
            builder = builder.sync_log(Box::new(log));
        }
        Ok(builder.build())
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn kind(&self) -> ComponentKind {
        self.shared.kind
    }

    /// Host notifications. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.shared.events.subscribe()
    }

    fn lock(&self) -> ReentrantGuard<'_, RefCell<State>> {
        self.shared.state.lock()
    }

    fn emit(&self, event: BackendEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }

    // ========================================================================
    // Open / close
    // ========================================================================

    /// Load the container, creating it if absent. Returns whether the store
    /// is writable.
    pub fn open(&self) -> CalResult<bool> {
        let guard = self.lock();
        let writable = {
            let mut state = guard.borrow_mut();
            if state.opened {
                return Ok(state.persistence.is_writable());
            }

            let (text, writable) = load_or_create(&self.shared.path, empty_container)?;
            let (mut loaded, repaired) =
                State::load(&text, self.shared.kind, self.shared.path.clone(), writable)?;

            self.observe_revision(&mut loaded);

            *state = loaded;
            if repaired {
                tracing::info!(path = %self.shared.path.display(), "Repaired duplicate UIDs, saving");
                self.mark_dirty(&mut state);
            }
            tracing::info!(
                path = %self.shared.path.display(),
                objects = state.store.len(),
                writable,
                "Opened calendar"
            );
            writable
        };

        if let Err(e) = self.replay_all_pending() {
            tracing::warn!("Initial sync replay failed: {}", e);
        }
        self.start_refresh_timer();
        Ok(writable)
    }

    pub fn is_open(&self) -> bool {
        self.lock().borrow().opened
    }

    /// Stop the refresh timer and write any pending changes.
    pub fn close(&self) -> CalResult<()> {
        if let Some(task) = lock_mutex(&self.shared.refresh).take() {
            task.abort();
        }
        self.flush_pending_synchronously()
    }

    // ========================================================================
    // Saving
    // ========================================================================

    fn mark_dirty(&self, state: &mut RefMut<'_, State>) {
        if state.persistence.mark_dirty() {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            self.shared.scheduler.schedule_once(
                self.shared.save_delay,
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        CalBackend { shared }.save_pending();
                    }
                }),
            );
        }
    }

    /// Scheduled save. Failures go to the event channel.
    fn save_pending(&self) {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        state.persistence.take_scheduled();
        if let Err(e) = save_state(&mut state) {
            tracing::error!("Background save failed: {}", e);
            drop(state);
            self.emit(BackendEvent::Error(e.to_string()));
        }
    }

    pub fn flush_pending_synchronously(&self) -> CalResult<()> {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        save_state(&mut state)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().borrow().persistence.is_dirty()
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Publish a finished batch: bump the revision, schedule a save, update
    /// views, notify the host, then propagate touched objects.
    fn commit(&self, batch: Batch, propagate: bool) {
        if batch.is_empty() {
            return;
        }

        let guard = self.lock();
        let outbound: Vec<(String, Option<String>)> = {
            let mut state = guard.borrow_mut();
            state.revision.bump();
            self.mark_dirty(&mut state);

            self.dispatch_to_views(&mut state, &batch.events);

            if propagate {
                batch
                    .touched
                    .iter()
                    .map(|uid| (uid.clone(), state.serialize_object(uid)))
                    .collect()
            } else {
                Vec::new()
            }
        };

        for event in batch.events {
            self.emit(event);
        }

        if outbound.is_empty() {
            return;
        }
        let mut sync = lock_mutex(&self.shared.sync);
        if let Some(reconciler) = sync.as_mut() {
            for (uid, value) in outbound {
                if let Err(e) = reconciler.propagate(&uid, value.as_deref()) {
                    tracing::warn!(%uid, "Could not propagate change: {}", e);
                    self.emit(BackendEvent::Error(e.to_string()));
                }
            }
        }
    }
}

impl CalBackend {
    fn dispatch_to_views(&self, state: &mut State, events: &[BackendEvent]) {
        let State { views, timezones, .. } = state;
        if views.is_empty() {
            return;
        }
        let ctx = QueryContext {
            resolver: Resolver::new(timezones, None),
        };
        for event in events {
            views.dispatch(event, self.shared.evaluator.as_ref(), &ctx);
        }
    }

    /// Report revision bumps on the event channel.
    fn observe_revision(&self, state: &mut State) {
        let events = self.shared.events.clone();
        state.revision.observe(move |token| {
            let _ = events.send(BackendEvent::PropertyChanged {
                name: "revision".to_string(),
                value: token.to_string(),
            });
        });
    }
}

fn save_state(state: &mut State) -> CalResult<()> {
    if !state.persistence.is_dirty() {
        return Ok(());
    }
    let text = state.to_ics();
    state.persistence.save_now(&text).map_err(|e| match e {
        CalError::PersistenceFailure(_) => e,
        other => CalError::PersistenceFailure(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use tempfile::TempDir;

    fn make_test_backend(dir: &TempDir, scheduler: Arc<ManualScheduler>) -> CalBackend {
        CalBackend::builder(dir.path().join("calendar.ics"))
            .scheduler(scheduler)
            .build()
    }

    #[test]
    fn open_creates_an_empty_container() {
        let dir = TempDir::new().unwrap();
        let backend = make_test_backend(&dir, Arc::new(ManualScheduler::new()));
        assert!(!backend.is_open());
        assert!(backend.open().expect("Should open"));
        assert!(backend.is_open());

        let text = std::fs::read_to_string(dir.path().join("calendar.ics")).unwrap();
        assert!(text.starts_with("BEGIN:VCALENDAR"));
        assert!(!backend.is_dirty());
    }

    #[test]
    fn open_rejects_bare_components() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calendar.ics");
        std::fs::write(&path, "BEGIN:VEVENT\r\nUID:a\r\nEND:VEVENT\r\n").unwrap();
        let backend = CalBackend::builder(&path)
            .scheduler(Arc::new(ManualScheduler::new()))
            .build();
        assert!(matches!(backend.open(), Err(CalError::InvalidObject(_))));
    }

    #[test]
    fn batch_tracks_first_touch_order() {
        let mut batch = Batch::default();
        assert!(batch.is_empty());
        batch.touch("b");
        batch.touch("a");
        batch.touch("b");
        assert_eq!(batch.touched, vec!["b".to_string(), "a".to_string()]);
    }
}
