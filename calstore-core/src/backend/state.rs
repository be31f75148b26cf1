//! Everything guarded by the store lock.

use std::path::PathBuf;

use crate::component::{Component, ComponentId, ComponentKind, Property};
use crate::error::{CalError, CalResult};
use crate::ics::{parse_container, serialize_component};
use crate::interval::IntervalIndex;
use crate::notify::ViewSet;
use crate::persist::PersistenceEngine;
use crate::recurrence::occurrence_bounds;
use crate::revision::{REVISION_PROPERTY, RevisionToken, RevisionTracker};
use crate::store::{ComponentStore, Handle};
use crate::timezone::{Resolver, TimezoneSet};

pub(crate) const PRODID: &str = "-//calstore//calstore 0.1//EN";

/// Contents of a freshly created calendar file.
pub(crate) fn empty_container() -> String {
    let mut cal = Component::new("VCALENDAR");
    cal.push_prop(Property::new("PRODID", PRODID));
    cal.push_prop(Property::new("VERSION", "2.0"));
    serialize_component(&cal)
}

pub(crate) struct State {
    pub opened: bool,
    pub calendar_props: Vec<Property>,
    /// Top-level components the store does not manage, kept as-is.
    pub passthrough: Vec<Component>,
    pub timezones: TimezoneSet,
    pub store: ComponentStore,
    pub index: IntervalIndex,
    pub revision: RevisionTracker,
    pub persistence: PersistenceEngine,
    pub views: ViewSet,
}

/// Index one stored component under its occurrence bounds.
fn index_handle(index: &mut IntervalIndex, store: &ComponentStore, timezones: &TimezoneSet, handle: Handle) {
    let Some(comp) = store.get(handle) else { return };
    let Some(id) = comp.id() else { return };
    let resolver = Resolver::new(timezones, None);
    let (start, end) = occurrence_bounds(comp, &resolver);
    if let Err(e) = index.insert(id.clone(), start, end, handle) {
        tracing::warn!(%id, "Not indexing component: {}", e);
    }
}

impl State {
    /// A state with no calendar loaded.
    pub fn unopened(path: PathBuf) -> Self {
        State {
            opened: false,
            calendar_props: Vec::new(),
            passthrough: Vec::new(),
            timezones: TimezoneSet::default(),
            store: ComponentStore::new(),
            index: IntervalIndex::new(),
            revision: RevisionTracker::new(None),
            persistence: PersistenceEngine::new(path, false),
            views: ViewSet::default(),
        }
    }

    /// Build state from container text. Returns true when duplicate UIDs
    /// had to be reassigned, in which case the container must be resaved.
    pub fn load(text: &str, kind: ComponentKind, path: PathBuf, writable: bool) -> CalResult<(Self, bool)> {
        let (wrapped, calendar) = parse_container(text)?;
        if wrapped {
            return Err(CalError::InvalidObject(format!(
                "{} does not contain a VCALENDAR",
                path.display()
            )));
        }

        let revision = calendar
            .find_prop(REVISION_PROPERTY)
            .and_then(|p| match p.value.parse::<RevisionToken>() {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!("Ignoring stored revision: {}", e);
                    None
                }
            });

        let mut state = State {
            opened: true,
            calendar_props: calendar
                .properties
                .iter()
                .filter(|p| p.name != REVISION_PROPERTY)
                .cloned()
                .collect(),
            passthrough: Vec::new(),
            timezones: TimezoneSet::from_components(calendar.components.iter().filter(|c| c.name == "VTIMEZONE")),
            store: ComponentStore::new(),
            index: IntervalIndex::new(),
            revision: RevisionTracker::new(revision),
            persistence: PersistenceEngine::new(path, writable),
            views: ViewSet::default(),
        };

        let mut repaired = false;
        for mut comp in calendar.components {
            if comp.name == "VTIMEZONE" {
                continue;
            }
            if comp.kind() != Some(kind) {
                state.passthrough.push(comp);
                continue;
            }
            let Some(uid) = comp.uid().map(str::to_string) else {
                tracing::warn!("Keeping {} without UID as opaque data", comp.name);
                state.passthrough.push(comp);
                continue;
            };

            let clash = match comp.rid() {
                Some(rid) => state.store.override_component(&uid, &rid).is_some(),
                None => state.store.master(&uid).is_some(),
            };
            if clash {
                let new_uid = uuid::Uuid::new_v4().to_string();
                tracing::info!(%uid, %new_uid, "Reassigning duplicated UID");
                comp.set_uid(&new_uid);
                repaired = true;
            }
            state.insert(comp)?;
        }

        tracing::debug!(
            objects = state.store.len(),
            timezones = state.timezones.len(),
            "Loaded calendar"
        );
        Ok((state, repaired))
    }

    pub fn ensure_open(&self) -> CalResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(CalError::NoSuchCalendar(self.persistence.path().display().to_string()))
        }
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.timezones, None)
    }

    /// The whole container, deterministic for a given state.
    pub fn to_ics(&self) -> String {
        let mut cal = Component::new("VCALENDAR");
        cal.properties = self.calendar_props.clone();
        cal.push_prop(Property::new(REVISION_PROPERTY, self.revision.current().to_string()));
        cal.components.extend(self.timezones.components().cloned());
        cal.components.extend(self.passthrough.iter().cloned());
        cal.components
            .extend(self.store.all_components().into_iter().cloned());
        serialize_component(&cal)
    }

    /// One object as a standalone VCALENDAR with the zones it references.
    pub fn object_container(&self, uid: &str) -> Option<Component> {
        let components = self.store.object_components(uid);
        if components.is_empty() {
            return None;
        }

        let mut cal = Component::new("VCALENDAR");
        cal.push_prop(Property::new("PRODID", PRODID));
        cal.push_prop(Property::new("VERSION", "2.0"));

        let mut tzids: Vec<String> = components.iter().flat_map(|c| c.referenced_tzids()).collect();
        tzids.sort();
        tzids.dedup();
        for tz in self.timezones.components() {
            if tz.find_prop("TZID").map(|p| tzids.contains(&p.value)).unwrap_or(false) {
                cal.components.push(tz.clone());
            }
        }

        cal.components.extend(components.into_iter().cloned());
        Some(cal)
    }

    pub fn serialize_object(&self, uid: &str) -> Option<String> {
        self.object_container(uid).map(|c| serialize_component(&c))
    }

    // ========================================================================
    // Store + index maintenance
    // ========================================================================

    fn reindex(&mut self, handle: Handle) {
        index_handle(&mut self.index, &self.store, &self.timezones, handle);
    }

    fn unindex(&mut self, id: &ComponentId) {
        self.index.remove(&id.uid, id.rid.as_deref());
    }

    /// Add a new component under its own identity.
    pub fn insert(&mut self, comp: Component) -> CalResult<Handle> {
        let id = comp
            .id()
            .ok_or_else(|| CalError::InvalidObject("Component has no UID".into()))?;
        let handle = match &id.rid {
            Some(rid) => self.store.insert_override(&id.uid, rid, comp)?,
            None => self.store.insert_master(&id.uid, comp)?,
        };
        self.reindex(handle);
        Ok(handle)
    }

    /// Replace (or add) the master, keeping its position.
    pub fn put_master(&mut self, uid: &str, comp: Component) -> Option<Component> {
        let (old, handle) = self.store.replace_master(uid, comp);
        self.reindex(handle);
        old
    }

    /// Replace (or add) one override, keeping its position.
    pub fn put_override(&mut self, uid: &str, rid: &str, comp: Component) -> Option<Component> {
        let (old, handle) = self.store.replace_override(uid, rid, comp);
        self.reindex(handle);
        old
    }

    pub fn take_master(&mut self, uid: &str) -> Option<Component> {
        self.unindex(&ComponentId::new(uid, None));
        self.store.remove_master(uid)
    }

    pub fn take_override(&mut self, uid: &str, rid: &str) -> Option<Component> {
        self.unindex(&ComponentId::new(uid, Some(rid.to_string())));
        self.store.remove_override(uid, rid)
    }

    /// Remove the whole object, master first.
    pub fn take_object(&mut self, uid: &str) -> Vec<Component> {
        let removed = self.store.remove_object(uid);
        for comp in &removed {
            if let Some(id) = comp.id() {
                self.unindex(&id);
            }
        }
        removed
    }

    /// Recompute every index entry, after the zone set changed.
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (_, handle) in self.store.ordered_handles() {
            self.reindex(handle);
        }
    }
}
