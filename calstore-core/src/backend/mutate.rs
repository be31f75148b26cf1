//! Create, modify and remove.
//!
//! Every batch is parsed and validated before anything is touched, so a bad
//! entry leaves the store unchanged.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::state::State;
use super::{Batch, CalBackend, ModType, ModifyOptions};
use crate::component::{Component, ComponentId};
use crate::error::{CalError, CalResult};
use crate::ics::parse_component;
use crate::notify::BackendEvent;
use crate::recurrence::{
    Side, Truncation, construct_instance, is_first_instance, remove_instances, split_at_instance,
};
use crate::time::EventTime;
use crate::timezone::Resolver;

/// Rewrite DTSTART, DTEND and DUE values whose TZID cannot be resolved to
/// UTC, keeping the wall-clock time.
pub(crate) fn sanitize(comp: &mut Component, resolver: &Resolver<'_>) {
    for name in ["DTSTART", "DTEND", "DUE"] {
        let Some(EventTime::DateTimeZoned { datetime, tzid }) =
            comp.find_prop(name).and_then(EventTime::from_property)
        else {
            continue;
        };
        if !resolver.is_known(&tzid) {
            tracing::debug!(%tzid, property = name, "Unknown timezone, storing as UTC");
            comp.set_prop(EventTime::DateTimeUtc(datetime.and_utc()).to_property(name));
        }
    }
}

/// CREATED and LAST-MODIFIED for a newly stored component.
pub(crate) fn stamp_new(comp: &mut Component, now: DateTime<Utc>) {
    if comp.created().is_none() {
        comp.set_created(now);
        comp.set_last_modified(now);
    } else if comp.last_modified().is_none() {
        comp.set_last_modified(now);
    }
}

fn required_uid(comp: &Component) -> CalResult<String> {
    comp.uid()
        .map(str::to_string)
        .ok_or_else(|| CalError::ObjectNotFound("component has no UID".into()))
}

/// Override RIDs of `uid` on `side` of `split`, inclusive.
fn overrides_beyond(state: &State, uid: &str, split: &EventTime, side: Side) -> Vec<String> {
    let Some(object) = state.store.lookup(uid) else {
        return Vec::new();
    };
    let resolver = state.resolver();
    let like = state.store.master(uid).and_then(Component::dtstart);
    let at = split.to_utc(&resolver);

    object
        .override_rids()
        .iter()
        .filter(|rid| {
            let Some(time) = EventTime::parse_rid(rid, like.as_ref()) else {
                return false;
            };
            let time = time.to_utc(&resolver);
            match side {
                Side::Future => time >= at,
                Side::Prior => time <= at,
            }
        })
        .cloned()
        .collect()
}

/// Take overrides out of the store, reporting each removal.
fn drop_overrides(state: &mut State, uid: &str, rids: &[String], batch: &mut Batch) {
    for rid in rids {
        if let Some(old) = state.take_override(uid, rid) {
            batch.push(BackendEvent::ComponentRemoved {
                id: ComponentId::new(uid, Some(rid.clone())),
                old: Some(old),
                new: None,
            });
        }
    }
}

fn all_override_rids(state: &State, uid: &str) -> Vec<String> {
    state
        .store
        .lookup(uid)
        .map(|o| o.override_rids().to_vec())
        .unwrap_or_default()
}

impl CalBackend {
    fn parse_submitted(&self, text: &str) -> CalResult<Component> {
        let comp = parse_component(text)?;
        if comp.kind() != Some(self.shared.kind) {
            return Err(CalError::InvalidObject(format!(
                "expected {}, got {}",
                self.shared.kind.ics_name(),
                comp.name
            )));
        }
        Ok(comp)
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub fn create_objects(&self, calobjs: &[&str]) -> CalResult<Vec<Component>> {
        self.create_objects_with(calobjs, ModifyOptions::default())
    }

    /// Add new objects. Returns the stored components, UIDs filled in.
    pub fn create_objects_with(&self, calobjs: &[&str], opts: ModifyOptions) -> CalResult<Vec<Component>> {
        let guard = self.lock();
        let mut batch = Batch::default();
        let created = {
            let mut state = guard.borrow_mut();
            state.ensure_open()?;

            let mut parsed = Vec::with_capacity(calobjs.len());
            let mut seen = HashSet::new();
            for text in calobjs {
                let mut comp = self.parse_submitted(text)?;
                if comp.uid().is_none() {
                    comp.set_uid(&uuid::Uuid::new_v4().to_string());
                }
                let id = comp.id().ok_or_else(|| CalError::InvalidObject("component has no UID".into()))?;
                if state.store.contains(&id.uid) || !seen.insert(id.clone()) {
                    return Err(CalError::ObjectIdAlreadyExists(id.uid));
                }
                parsed.push(comp);
            }

            let now = Utc::now();
            let mut created = Vec::with_capacity(parsed.len());
            for mut comp in parsed {
                if !opts.keep_timestamps {
                    stamp_new(&mut comp, now);
                }
                sanitize(&mut comp, &state.resolver());
                state.insert(comp.clone())?;

                if let Some(uid) = comp.uid() {
                    batch.touch(uid);
                }
                tracing::debug!(uid = comp.uid(), "Created component");
                batch.push(BackendEvent::ComponentCreated(comp.clone()));
                created.push(comp);
            }
            created
        };

        self.commit(batch, opts.propagate);
        Ok(created)
    }

    // ========================================================================
    // Modify
    // ========================================================================

    pub fn modify_objects(
        &self,
        calobjs: &[&str],
        mod_type: ModType,
    ) -> CalResult<(Vec<Option<Component>>, Vec<Component>)> {
        self.modify_objects_with(calobjs, mod_type, ModifyOptions::default())
    }

    /// Update existing objects. Returns the previous and the stored state
    /// for each submitted component.
    pub fn modify_objects_with(
        &self,
        calobjs: &[&str],
        mod_type: ModType,
        opts: ModifyOptions,
    ) -> CalResult<(Vec<Option<Component>>, Vec<Component>)> {
        let guard = self.lock();
        let mut batch = Batch::default();
        let (olds, news) = {
            let mut state = guard.borrow_mut();
            state.ensure_open()?;

            let mut parsed = Vec::with_capacity(calobjs.len());
            for text in calobjs {
                let comp = self.parse_submitted(text)?;
                let uid = required_uid(&comp)?;
                if !state.store.contains(&uid) {
                    return Err(CalError::ObjectNotFound(uid));
                }
                parsed.push(comp);
            }

            let now = Utc::now();
            let mut olds = Vec::with_capacity(parsed.len());
            let mut news = Vec::with_capacity(parsed.len());
            for comp in parsed {
                let (old, new) = modify_one(&mut state, comp, mod_type, opts, now, &mut batch)?;
                olds.push(old);
                news.push(new);
            }
            (olds, news)
        };

        self.commit(batch, opts.propagate);
        Ok((olds, news))
    }

    // ========================================================================
    // Remove
    // ========================================================================

    pub fn remove_objects(
        &self,
        ids: &[ComponentId],
        mod_type: ModType,
    ) -> CalResult<Vec<(Option<Component>, Option<Component>)>> {
        self.remove_objects_with(ids, mod_type, ModifyOptions::default())
    }

    /// Remove objects or instances. Returns, per id, the state before and
    /// the master left behind (if any).
    pub fn remove_objects_with(
        &self,
        ids: &[ComponentId],
        mod_type: ModType,
        opts: ModifyOptions,
    ) -> CalResult<Vec<(Option<Component>, Option<Component>)>> {
        let guard = self.lock();
        let mut batch = Batch::default();
        let results = {
            let mut state = guard.borrow_mut();
            state.ensure_open()?;

            for id in ids {
                if !state.store.contains(&id.uid) {
                    return Err(CalError::ObjectNotFound(id.to_string()));
                }
                match (mod_type, &id.rid) {
                    (ModType::ThisAndFuture | ModType::ThisAndPrior, None) => {
                        return Err(CalError::InvalidObject(format!(
                            "{id}: removing a range of instances needs a recurrence ID"
                        )));
                    }
                    (ModType::ThisInstanceOnly, Some(rid))
                        if state.store.master(&id.uid).is_none()
                            && state.store.override_component(&id.uid, rid).is_none() =>
                    {
                        return Err(CalError::ObjectNotFound(id.to_string()));
                    }
                    _ => {}
                }
            }

            let now = Utc::now();
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                // An earlier id in the batch may already have taken the object.
                if !state.store.contains(&id.uid) {
                    results.push((None, None));
                    continue;
                }
                results.push(remove_one(&mut state, id, mod_type, opts, now, &mut batch));
                batch.touch(&id.uid);
            }
            results
        };

        self.commit(batch, opts.propagate);
        Ok(results)
    }
}

/// Apply one modification. The UID is known to exist.
fn modify_one(
    state: &mut State,
    mut comp: Component,
    mod_type: ModType,
    opts: ModifyOptions,
    now: DateTime<Utc>,
    batch: &mut Batch,
) -> CalResult<(Option<Component>, Component)> {
    let uid = required_uid(&comp)?;
    if !opts.keep_timestamps {
        comp.set_last_modified(now);
    }
    sanitize(&mut comp, &state.resolver());
    batch.touch(&uid);

    let rid_time = comp.recurrence_id();
    let master = state.store.master(&uid).cloned();

    let mod_type = match (mod_type, &rid_time, &master) {
        (ModType::ThisAndFuture | ModType::ThisAndPrior, None, _) => ModType::AllInstances,
        (ModType::ThisAndFuture, Some(rid), Some(master)) if is_first_instance(master, rid, &state.resolver()) => {
            comp.set_recurrence_id(None);
            ModType::AllInstances
        }
        (ModType::ThisAndFuture | ModType::ThisAndPrior, Some(_), None) => ModType::ThisInstanceOnly,
        (other, _, _) => other,
    };

    match (mod_type, comp.rid()) {
        (ModType::ThisInstanceOnly, Some(rid)) => Ok(replace_instance(state, &uid, &rid, comp, batch)),
        (ModType::ThisInstanceOnly, None) => {
            let old = state.put_master(&uid, comp.clone());
            batch.push(BackendEvent::ComponentModified {
                old: old.clone(),
                new: comp.clone(),
            });
            Ok((old, comp))
        }
        (ModType::AllInstances, _) => {
            comp.set_recurrence_id(None);
            if !opts.carry_over_detached {
                let rids = all_override_rids(state, &uid);
                drop_overrides(state, &uid, &rids, batch);
            }
            let old = state.put_master(&uid, comp.clone());
            batch.push(BackendEvent::ComponentModified {
                old: old.clone(),
                new: comp.clone(),
            });
            Ok((old, comp))
        }
        (ModType::ThisAndFuture | ModType::ThisAndPrior, Some(rid)) => {
            let side = if mod_type == ModType::ThisAndFuture {
                Side::Future
            } else {
                Side::Prior
            };
            // Both are Some here: the remap above routed the rest elsewhere.
            let (Some(rid_time), Some(master)) = (rid_time, master) else {
                return Ok(replace_instance(state, &uid, &rid, comp, batch));
            };
            split_series(state, &uid, &rid_time, side, master, comp, now, opts, batch)
        }
        (ModType::ThisAndFuture | ModType::ThisAndPrior, None) => {
            Err(CalError::InvalidObject(format!("{uid}: missing recurrence ID")))
        }
    }
}

/// Store `comp` as the detached instance at `rid`.
fn replace_instance(
    state: &mut State,
    uid: &str,
    rid: &str,
    comp: Component,
    batch: &mut Batch,
) -> (Option<Component>, Component) {
    let generated = state
        .store
        .master(uid)
        .and_then(|master| construct_instance(master, rid, &state.resolver()));
    let old = state.put_override(uid, rid, comp.clone()).or(generated);
    batch.push(BackendEvent::ComponentModified {
        old: old.clone(),
        new: comp.clone(),
    });
    (old, comp)
}

/// ThisAndFuture / ThisAndPrior: truncate the master and hand the split-off
/// instances to a new series with its own UID.
#[allow(clippy::too_many_arguments)]
fn split_series(
    state: &mut State,
    uid: &str,
    rid: &EventTime,
    side: Side,
    master: Component,
    comp: Component,
    now: DateTime<Utc>,
    opts: ModifyOptions,
    batch: &mut Batch,
) -> CalResult<(Option<Component>, Component)> {
    let doomed = overrides_beyond(state, uid, rid, side);
    drop_overrides(state, uid, &doomed, batch);

    let Some(mut series) = split_at_instance(&comp, &master, rid, side, &state.resolver()) else {
        // Nothing recurs past the split point; keep the master as it is and
        // store the edit as a plain detached instance.
        tracing::debug!(uid, "No series to split off, storing as instance");
        let rid = rid.to_ics_string();
        return Ok(replace_instance(state, uid, &rid, comp, batch));
    };

    let mut truncated = master.clone();
    let truncation = remove_instances(&mut truncated, rid, side, &state.resolver());
    if !opts.keep_timestamps {
        truncated.set_last_modified(now);
    }
    match truncation {
        Truncation::Kept => {
            state.put_master(uid, truncated.clone());
            batch.push(BackendEvent::ComponentModified {
                old: Some(master.clone()),
                new: truncated,
            });
        }
        Truncation::Emptied => {
            state.take_master(uid);
            batch.push(BackendEvent::ComponentRemoved {
                id: ComponentId::new(uid, None),
                old: Some(master.clone()),
                new: None,
            });
        }
    }

    let new_uid = uuid::Uuid::new_v4().to_string();
    series.set_uid(&new_uid);
    if !opts.keep_timestamps {
        series.set_created(now);
        series.set_last_modified(now);
    }
    sanitize(&mut series, &state.resolver());
    state.insert(series.clone())?;
    tracing::debug!(uid, %new_uid, ?side, "Split recurring series");

    batch.touch(&new_uid);
    batch.push(BackendEvent::ComponentCreated(series.clone()));
    Ok((Some(master), series))
}

/// Apply one removal. The UID is known to exist.
fn remove_one(
    state: &mut State,
    id: &ComponentId,
    mod_type: ModType,
    opts: ModifyOptions,
    now: DateTime<Utc>,
    batch: &mut Batch,
) -> (Option<Component>, Option<Component>) {
    let uid = id.uid.as_str();
    let master = state.store.master(uid).cloned();

    match (mod_type, id.rid.as_deref()) {
        (ModType::AllInstances, _) => {
            let removed = state.take_object(uid);
            let old = master.or_else(|| removed.into_iter().next());
            batch.push(BackendEvent::ComponentRemoved {
                id: ComponentId::new(uid, None),
                old: old.clone(),
                new: None,
            });
            (old, None)
        }
        (ModType::ThisInstanceOnly, None) => {
            let old = state.take_master(uid);
            batch.push(BackendEvent::ComponentRemoved {
                id: id.clone(),
                old: old.clone(),
                new: None,
            });
            (old, None)
        }
        (ModType::ThisInstanceOnly, Some(rid)) => {
            let detached = state.take_override(uid, rid);
            match master {
                Some(master) => {
                    let mut updated = master.clone();
                    if let Some(at) = EventTime::parse_rid(rid, master.dtstart().as_ref()) {
                        updated.add_exdate(&at);
                    }
                    if !opts.keep_timestamps {
                        updated.set_last_modified(now);
                    }
                    state.put_master(uid, updated.clone());
                    batch.push(BackendEvent::ComponentRemoved {
                        id: id.clone(),
                        old: Some(master.clone()),
                        new: Some(updated.clone()),
                    });
                    (Some(master), Some(updated))
                }
                None => {
                    batch.push(BackendEvent::ComponentRemoved {
                        id: id.clone(),
                        old: detached.clone(),
                        new: None,
                    });
                    (detached, None)
                }
            }
        }
        (ModType::ThisAndFuture | ModType::ThisAndPrior, rid) => {
            let side = if mod_type == ModType::ThisAndFuture {
                Side::Future
            } else {
                Side::Prior
            };
            let like = master.as_ref().and_then(Component::dtstart);
            let Some(at) = rid.and_then(|r| EventTime::parse_rid(r, like.as_ref())) else {
                tracing::warn!(%id, "Unreadable recurrence ID, nothing removed");
                return (master, None);
            };

            let doomed = overrides_beyond(state, uid, &at, side);
            drop_overrides(state, uid, &doomed, batch);

            let Some(master) = master else {
                return (None, None);
            };
            let mut truncated = master.clone();
            let new = match remove_instances(&mut truncated, &at, side, &state.resolver()) {
                Truncation::Emptied => {
                    state.take_master(uid);
                    None
                }
                Truncation::Kept => {
                    if !opts.keep_timestamps {
                        truncated.set_last_modified(now);
                    }
                    state.put_master(uid, truncated.clone());
                    Some(truncated)
                }
            };
            batch.push(BackendEvent::ComponentRemoved {
                id: id.clone(),
                old: Some(master.clone()),
                new: new.clone(),
            });
            (Some(master), new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Property;
    use crate::timezone::TimezoneSet;
    use chrono::TimeZone;

    #[test]
    fn unknown_zones_become_utc_with_the_same_wall_time() {
        let mut comp = Component::new("VEVENT");
        comp.push_prop(Property::new("DTSTART", "20240301T090000").with_param("TZID", "Nowhere/Special"));
        comp.push_prop(Property::new("DTEND", "20240301T100000").with_param("TZID", "Europe/Berlin"));

        let set = TimezoneSet::default();
        sanitize(&mut comp, &Resolver::new(&set, None));

        let start = comp.find_prop("DTSTART").unwrap();
        assert_eq!(start.value, "20240301T090000Z");
        assert_eq!(start.param("TZID"), None);
        assert_eq!(comp.find_prop("DTEND").unwrap().param("TZID"), Some("Europe/Berlin"));
    }

    #[test]
    fn stamping_respects_existing_created() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        let mut fresh = Component::new("VEVENT");
        stamp_new(&mut fresh, now);
        assert_eq!(fresh.created(), Some(now));
        assert_eq!(fresh.last_modified(), Some(now));

        let mut imported = Component::new("VEVENT");
        imported.set_created(earlier);
        stamp_new(&mut imported, now);
        assert_eq!(imported.created(), Some(earlier));
        assert_eq!(imported.last_modified(), Some(now));

        imported.set_last_modified(earlier);
        stamp_new(&mut imported, now);
        assert_eq!(imported.last_modified(), Some(earlier));
    }
}
