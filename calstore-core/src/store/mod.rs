//! The authoritative collection of calendar objects.
//!
//! Components live in an [`Arena`]; objects keyed by UID point at them by
//! [`Handle`]. Every component also has a position in the store's
//! iteration order, which is insertion order with in-place replacement, so
//! serializing the same state always gives the same bytes.

mod arena;

use std::collections::{BTreeMap, HashMap};

pub use arena::{Arena, Handle};

use crate::component::Component;
use crate::error::{CalError, CalResult};

/// One UID's master and detached instances.
#[derive(Debug, Clone, Default)]
pub struct CalendarObject {
    master: Option<Handle>,
    overrides: HashMap<String, Handle>,
    override_order: Vec<String>,
}

impl CalendarObject {
    pub fn master(&self) -> Option<Handle> {
        self.master
    }

    pub fn override_handle(&self, rid: &str) -> Option<Handle> {
        self.overrides.get(rid).copied()
    }

    /// Recurrence IDs in insertion order.
    pub fn override_rids(&self) -> &[String] {
        &self.override_order
    }

    pub fn has_overrides(&self) -> bool {
        !self.override_order.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.master.is_none() && self.overrides.is_empty()
    }

    /// Master first, then overrides in insertion order.
    pub fn handles(&self) -> Vec<Handle> {
        self.master
            .into_iter()
            .chain(self.override_order.iter().filter_map(|rid| self.overrides.get(rid).copied()))
            .collect()
    }
}

#[derive(Default)]
pub struct ComponentStore {
    arena: Arena,
    objects: HashMap<String, CalendarObject>,
    order: BTreeMap<u64, Handle>,
    positions: HashMap<Handle, u64>,
    next_seq: u64,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, uid: &str) -> Option<&CalendarObject> {
        self.objects.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.objects.contains_key(uid)
    }

    pub fn get(&self, handle: Handle) -> Option<&Component> {
        self.arena.get(handle)
    }

    pub fn master(&self, uid: &str) -> Option<&Component> {
        self.lookup(uid)?.master.and_then(|h| self.arena.get(h))
    }

    pub fn override_component(&self, uid: &str, rid: &str) -> Option<&Component> {
        self.lookup(uid)?
            .override_handle(rid)
            .and_then(|h| self.arena.get(h))
    }

    /// Every component of `uid`, master first.
    pub fn object_components(&self, uid: &str) -> Vec<&Component> {
        self.lookup(uid)
            .map(|obj| obj.handles().into_iter().filter_map(|h| self.arena.get(h)).collect())
            .unwrap_or_default()
    }

    /// Number of objects (distinct UIDs).
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn component_count(&self) -> usize {
        self.arena.len()
    }

    fn place(&mut self, component: Component, seq: Option<u64>) -> Handle {
        let handle = self.arena.insert(component);
        let seq = seq.unwrap_or_else(|| {
            self.next_seq += 1;
            self.next_seq
        });
        self.order.insert(seq, handle);
        self.positions.insert(handle, seq);
        handle
    }

    fn release(&mut self, handle: Handle) -> Option<(Component, u64)> {
        let seq = self.positions.remove(&handle)?;
        self.order.remove(&seq);
        self.arena.remove(handle).map(|c| (c, seq))
    }

    pub fn insert_master(&mut self, uid: &str, component: Component) -> CalResult<Handle> {
        if self.master(uid).is_some() {
            return Err(CalError::DuplicateUid(uid.to_string()));
        }
        let handle = self.place(component, None);
        self.objects.entry(uid.to_string()).or_default().master = Some(handle);
        Ok(handle)
    }

    pub fn insert_override(&mut self, uid: &str, rid: &str, component: Component) -> CalResult<Handle> {
        if self.override_component(uid, rid).is_some() {
            return Err(CalError::DuplicateRecurrence {
                uid: uid.to_string(),
                rid: rid.to_string(),
            });
        }
        let handle = self.place(component, None);
        let object = self.objects.entry(uid.to_string()).or_default();
        object.overrides.insert(rid.to_string(), handle);
        object.override_order.push(rid.to_string());
        Ok(handle)
    }

    /// Put `component` in place of the current master, keeping its position.
    /// Inserts when there is no master yet.
    pub fn replace_master(&mut self, uid: &str, component: Component) -> (Option<Component>, Handle) {
        let previous = self.objects.get(uid).and_then(|obj| obj.master);
        let (old, seq) = match previous.and_then(|h| self.release(h)) {
            Some((old, seq)) => (Some(old), Some(seq)),
            None => (None, None),
        };
        let handle = self.place(component, seq);
        self.objects.entry(uid.to_string()).or_default().master = Some(handle);
        (old, handle)
    }

    /// Put `component` in place of the override at `rid`, keeping its
    /// position. Inserts when the override does not exist.
    pub fn replace_override(&mut self, uid: &str, rid: &str, component: Component) -> (Option<Component>, Handle) {
        let previous = self.objects.get(uid).and_then(|obj| obj.override_handle(rid));
        let Some((old, seq)) = previous.and_then(|h| self.release(h)) else {
            let handle = self.place(component, None);
            let object = self.objects.entry(uid.to_string()).or_default();
            object.overrides.insert(rid.to_string(), handle);
            object.override_order.push(rid.to_string());
            return (None, handle);
        };
        let handle = self.place(component, Some(seq));
        if let Some(object) = self.objects.get_mut(uid) {
            object.overrides.insert(rid.to_string(), handle);
        }
        (Some(old), handle)
    }

    /// Remove the master. The object goes with it if nothing else remains.
    pub fn remove_master(&mut self, uid: &str) -> Option<Component> {
        let handle = self.objects.get_mut(uid)?.master.take()?;
        let removed = self.release(handle).map(|(c, _)| c);
        self.drop_if_empty(uid);
        removed
    }

    /// Remove one override. The object goes with it if nothing else remains.
    pub fn remove_override(&mut self, uid: &str, rid: &str) -> Option<Component> {
        let object = self.objects.get_mut(uid)?;
        let handle = object.overrides.remove(rid)?;
        object.override_order.retain(|r| r != rid);
        let removed = self.release(handle).map(|(c, _)| c);
        self.drop_if_empty(uid);
        removed
    }

    /// Remove the whole object, returning its components master first.
    pub fn remove_object(&mut self, uid: &str) -> Vec<Component> {
        let Some(object) = self.objects.remove(uid) else {
            return Vec::new();
        };
        object
            .handles()
            .into_iter()
            .filter_map(|h| self.release(h).map(|(c, _)| c))
            .collect()
    }

    fn drop_if_empty(&mut self, uid: &str) {
        if self.objects.get(uid).map(CalendarObject::is_empty).unwrap_or(false) {
            self.objects.remove(uid);
        }
    }

    /// Snapshot of every component in store order.
    pub fn all_components(&self) -> Vec<&Component> {
        self.order.values().filter_map(|h| self.arena.get(*h)).collect()
    }

    /// Handles in store order, paired with their order position.
    pub fn ordered_handles(&self) -> Vec<(u64, Handle)> {
        self.order.iter().map(|(seq, h)| (*seq, *h)).collect()
    }

    pub fn position(&self, handle: Handle) -> Option<u64> {
        self.positions.get(&handle).copied()
    }

    /// UIDs ordered by the position of their first component.
    pub fn uids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.order
            .values()
            .filter_map(|h| self.arena.get(*h))
            .filter_map(|c| c.uid())
            .filter(|uid| seen.insert(uid.to_string()))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Property;

    fn make_test_event(uid: &str, summary: &str) -> Component {
        let mut comp = Component::new("VEVENT");
        comp.push_prop(Property::new("UID", uid));
        comp.push_prop(Property::new("SUMMARY", summary));
        comp
    }

    fn summaries(store: &ComponentStore) -> Vec<String> {
        store
            .all_components()
            .iter()
            .map(|c| c.summary().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn insert_and_lookup() {
        let mut store = ComponentStore::new();
        store.insert_master("a", make_test_event("a", "A")).unwrap();
        store.insert_override("a", "20240108T100000Z", make_test_event("a", "A2")).unwrap();

        let object = store.lookup("a").expect("Object should exist");
        assert!(object.master().is_some());
        assert_eq!(object.override_rids(), ["20240108T100000Z".to_string()]);
        assert_eq!(store.object_components("a").len(), 2);
        assert!(store.lookup("b").is_none());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut store = ComponentStore::new();
        store.insert_master("a", make_test_event("a", "A")).unwrap();
        assert!(matches!(
            store.insert_master("a", make_test_event("a", "again")),
            Err(CalError::DuplicateUid(_))
        ));

        store.insert_override("a", "r1", make_test_event("a", "r")).unwrap();
        assert!(matches!(
            store.insert_override("a", "r1", make_test_event("a", "r")),
            Err(CalError::DuplicateRecurrence { .. })
        ));
    }

    #[test]
    fn removing_the_last_component_removes_the_object() {
        let mut store = ComponentStore::new();
        store.insert_master("a", make_test_event("a", "A")).unwrap();
        store.insert_override("a", "r1", make_test_event("a", "r")).unwrap();

        assert!(store.remove_master("a").is_some());
        assert!(store.contains("a"), "Override keeps the object alive");
        assert!(store.remove_override("a", "r1").is_some());
        assert!(!store.contains("a"));
        assert_eq!(store.component_count(), 0);
    }

    #[test]
    fn replace_keeps_position() {
        let mut store = ComponentStore::new();
        store.insert_master("a", make_test_event("a", "A")).unwrap();
        store.insert_master("b", make_test_event("b", "B")).unwrap();

        let (old, _) = store.replace_master("a", make_test_event("a", "A'"));
        assert_eq!(old.and_then(|c| c.summary().map(str::to_string)).as_deref(), Some("A"));
        assert_eq!(summaries(&store), vec!["A'", "B"]);
    }

    #[test]
    fn snapshot_is_not_live() {
        let mut store = ComponentStore::new();
        store.insert_master("a", make_test_event("a", "A")).unwrap();
        let before: Vec<Component> = store.all_components().into_iter().cloned().collect();
        store.insert_master("b", make_test_event("b", "B")).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.uids(), vec!["a", "b"]);
    }
}
