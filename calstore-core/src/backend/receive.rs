//! iTIP-style receive and timezone import.

use chrono::Utc;

use super::mutate::{sanitize, stamp_new};
use super::state::State;
use super::{Batch, CalBackend, ModifyOptions};
use crate::component::{Component, ComponentId};
use crate::error::{CalError, CalResult};
use crate::ics::{parse_component, parse_container};
use crate::notify::BackendEvent;
use crate::time::EventTime;
use crate::timezone::{Resolver, Timezone, TimezoneCache, TimezoneSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Publish,
    Request,
    Reply,
    Cancel,
}

impl Method {
    fn parse(value: &str) -> CalResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PUBLISH" => Ok(Method::Publish),
            "REQUEST" => Ok(Method::Request),
            "REPLY" => Ok(Method::Reply),
            "CANCEL" => Ok(Method::Cancel),
            other => Err(CalError::UnsupportedMethod(other.to_string())),
        }
    }
}

fn method_of(comp: &Component) -> Option<&str> {
    comp.find_prop("METHOD").map(|p| p.value.as_str())
}

impl CalBackend {
    /// Apply an incoming calendar with receive defaults: existing detached
    /// instances survive a master update.
    pub fn receive_objects(&self, calobj: &str) -> CalResult<Vec<ComponentId>> {
        self.receive_objects_with(
            calobj,
            ModifyOptions {
                carry_over_detached: true,
                ..ModifyOptions::default()
            },
        )
    }

    /// Returns the ids of the components applied, in application order.
    pub fn receive_objects_with(&self, calobj: &str, opts: ModifyOptions) -> CalResult<Vec<ComponentId>> {
        let (wrapped, calendar) = parse_container(calobj)?;
        let toplevel = if wrapped {
            calendar.components.first().and_then(method_of)
        } else {
            method_of(&calendar)
        };
        let default_method = match toplevel {
            Some(value) => Method::parse(value)?,
            None => Method::Publish,
        };

        let in_flight = TimezoneSet::from_components(calendar.components.iter().filter(|c| c.name == "VTIMEZONE"));

        let mut incoming = Vec::new();
        for comp in calendar.components {
            if comp.kind() != Some(self.shared.kind) {
                if comp.name != "VTIMEZONE" {
                    tracing::debug!(name = %comp.name, "Ignoring component of another kind");
                }
                continue;
            }
            let method = match method_of(&comp) {
                Some(value) => Method::parse(value)?,
                None => default_method,
            };
            let mut comp = comp;
            comp.remove_props("METHOD");
            if comp.uid().is_none() {
                if method != Method::Publish {
                    return Err(CalError::InvalidObject(format!(
                        "{} without UID cannot be applied",
                        comp.name
                    )));
                }
                comp.set_uid(&uuid::Uuid::new_v4().to_string());
            }
            incoming.push((method, comp));
        }

        // Masters first, then by UID.
        incoming.sort_by(|(_, a), (_, b)| {
            (a.recurrence_id().is_some(), a.uid()).cmp(&(b.recurrence_id().is_some(), b.uid()))
        });

        let declined_by = self.shared.accounts.default_account().map(|a| a.address);

        let guard = self.lock();
        let mut batch = Batch::default();
        let applied = {
            let mut state = guard.borrow_mut();
            state.ensure_open()?;

            let before = state.timezones.len();
            for tz in in_flight.list() {
                state.timezones.add(tz);
            }
            if state.timezones.len() != before {
                tracing::debug!(added = state.timezones.len() - before, "Merged incoming timezones");
                batch.mark_changed();
            }

            let now = Utc::now();
            let mut applied = Vec::with_capacity(incoming.len());
            for (method, mut comp) in incoming {
                if !opts.keep_timestamps {
                    stamp_new(&mut comp, now);
                }
                sanitize(&mut comp, &Resolver::new(&state.timezones, Some(&in_flight)));

                let Some(id) = comp.id() else { continue };
                let declined = declined_by
                    .as_deref()
                    .and_then(|address| comp.attendee_partstat(address))
                    .map(|p| p.eq_ignore_ascii_case("DECLINED"))
                    .unwrap_or(false);

                match method {
                    Method::Cancel => cancel(&mut state, &id, opts, &mut batch),
                    _ if declined => {
                        tracing::debug!(%id, "Invitation declined, removing");
                        cancel_declined(&mut state, &id, &mut batch);
                    }
                    _ => upsert(&mut state, &id, comp, opts, &mut batch),
                }
                batch.touch(&id.uid);
                applied.push(id);
            }
            applied
        };

        self.commit(batch, opts.propagate);
        Ok(applied)
    }

    /// Store a VTIMEZONE in the container. A TZID already present is kept.
    pub fn add_timezone(&self, tzobj: &str) -> CalResult<()> {
        let comp = parse_component(tzobj)?;
        if comp.name != "VTIMEZONE" {
            return Err(CalError::InvalidObject(format!("expected VTIMEZONE, got {}", comp.name)));
        }
        let tz = Timezone::from_vtimezone(&comp)
            .ok_or_else(|| CalError::InvalidObject("VTIMEZONE without usable TZID or offsets".into()))?;

        let guard = self.lock();
        let mut batch = Batch::default();
        {
            let mut state = guard.borrow_mut();
            state.ensure_open()?;
            if state.timezones.contains(&tz.tzid) {
                return Ok(());
            }
            tracing::debug!(tzid = %tz.tzid, "Adding timezone");
            state.timezones.add(tz);
            state.rebuild_index();
            batch.mark_changed();
        }
        self.commit(batch, false);
        Ok(())
    }
}

/// PUBLISH, REQUEST and REPLY: replace what is stored under the same id.
fn upsert(state: &mut State, id: &ComponentId, comp: Component, opts: ModifyOptions, batch: &mut Batch) {
    let uid = id.uid.as_str();
    let existed = state.store.contains(uid);

    let old = match &id.rid {
        Some(rid) => state.put_override(uid, rid, comp.clone()),
        None => {
            if existed && !opts.carry_over_detached {
                let rids: Vec<String> = state
                    .store
                    .lookup(uid)
                    .map(|o| o.override_rids().to_vec())
                    .unwrap_or_default();
                for rid in rids {
                    if let Some(old) = state.take_override(uid, &rid) {
                        batch.push(BackendEvent::ComponentRemoved {
                            id: ComponentId::new(uid, Some(rid)),
                            old: Some(old),
                            new: None,
                        });
                    }
                }
            }
            state.put_master(uid, comp.clone())
        }
    };

    match old {
        Some(old) => batch.push(BackendEvent::ComponentModified { old: Some(old), new: comp }),
        None if existed => batch.push(BackendEvent::ComponentModified { old: None, new: comp }),
        None => batch.push(BackendEvent::ComponentCreated(comp)),
    }
}

/// The configured user declined: drop the instance or the whole object.
fn cancel_declined(state: &mut State, id: &ComponentId, batch: &mut Batch) {
    let uid = id.uid.as_str();
    let old = match &id.rid {
        Some(rid) => state.take_override(uid, rid),
        None => {
            let master = state.store.master(uid).cloned();
            let removed = state.take_object(uid);
            master.or_else(|| removed.into_iter().next())
        }
    };
    if old.is_some() {
        batch.push(BackendEvent::ComponentRemoved {
            id: id.clone(),
            old,
            new: None,
        });
    }
}

/// CANCEL: an instance is excluded from the master; a master cancels the
/// whole object.
fn cancel(state: &mut State, id: &ComponentId, opts: ModifyOptions, batch: &mut Batch) {
    let uid = id.uid.as_str();
    let Some(rid) = &id.rid else {
        cancel_declined(state, id, batch);
        return;
    };

    let detached = state.take_override(uid, rid);
    match state.store.master(uid).cloned() {
        Some(master) => {
            let mut updated = master.clone();
            if let Some(at) = EventTime::parse_rid(rid, master.dtstart().as_ref()) {
                updated.add_exdate(&at);
            }
            if !opts.keep_timestamps {
                updated.set_last_modified(Utc::now());
            }
            state.put_master(uid, updated.clone());
            batch.push(BackendEvent::ComponentRemoved {
                id: id.clone(),
                old: Some(master),
                new: Some(updated),
            });
        }
        None if detached.is_some() => batch.push(BackendEvent::ComponentRemoved {
            id: id.clone(),
            old: detached,
            new: None,
        }),
        None => tracing::debug!(%id, "Nothing to cancel"),
    }
}
