//! Read-side operations: lookups, queries, views and free/busy.

use chrono::{DateTime, Utc};

use super::CalBackend;
use super::state::State;
use crate::component::{Component, Property};
use crate::error::{CalError, CalResult};
use crate::freebusy::build_vfreebusy;
use crate::notify::View;
use crate::query::{CompiledQuery, QueryContext};
use crate::recurrence::construct_instance;
use crate::store::Handle;
use crate::time::format_utc;
use crate::timezone::{Timezone, TimezoneCache, resolve};

/// Static properties a host can ask the backend for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProperty {
    Capabilities,
    DefaultObject,
    Revision,
}

const CAPABILITIES: &[&str] = &[
    "no-email-alarms",
    "delegate-support",
    "remove-only-this",
    "bulk-adds",
    "bulk-modifies",
    "bulk-removes",
    "alarm-description",
    "task-can-recur",
    "component-color",
    "refresh-supported",
];

/// Stored components matching `query`, in store order.
fn matching(state: &State, backend: &CalBackend, query: &CompiledQuery) -> Vec<Component> {
    let evaluator = backend.shared.evaluator.as_ref();
    let mut handles: Vec<(u64, Handle)> = match evaluator.extract_time_bounds(query) {
        Some((start, end)) => state
            .index
            .search(start, Some(end))
            .into_iter()
            .filter_map(|h| state.store.position(h).map(|pos| (pos, h)))
            .collect(),
        None => state.store.ordered_handles(),
    };
    handles.sort_by_key(|(pos, _)| *pos);

    let ctx = QueryContext {
        resolver: state.resolver(),
    };
    handles
        .into_iter()
        .filter_map(|(_, h)| state.store.get(h))
        .filter(|comp| evaluator.matches(query, comp, &ctx))
        .cloned()
        .collect()
}

impl CalBackend {
    /// One component, an instance built from the master, or the whole object
    /// as a VCALENDAR when it has detached instances.
    pub fn get_object(&self, uid: &str, rid: Option<&str>) -> CalResult<Component> {
        let guard = self.lock();
        let state = guard.borrow();
        state.ensure_open()?;

        let not_found = || CalError::ObjectNotFound(match rid {
            Some(rid) => format!("{uid} ({rid})"),
            None => uid.to_string(),
        });
        let object = state.store.lookup(uid).ok_or_else(not_found)?;

        match rid.filter(|r| !r.is_empty()) {
            Some(rid) => {
                if let Some(detached) = state.store.override_component(uid, rid) {
                    return Ok(detached.clone());
                }
                state
                    .store
                    .master(uid)
                    .and_then(|master| construct_instance(master, rid, &state.resolver()))
                    .ok_or_else(not_found)
            }
            None => match state.store.master(uid) {
                Some(master) if !object.has_overrides() => Ok(master.clone()),
                _ => state.object_container(uid).ok_or_else(not_found),
            },
        }
    }

    pub fn get_object_list(&self, query: &str) -> CalResult<Vec<Component>> {
        let compiled = self.shared.evaluator.compile(query)?;
        let guard = self.lock();
        let state = guard.borrow();
        state.ensure_open()?;
        Ok(matching(&state, self, &compiled))
    }

    /// Open a live view. The current matches arrive first, then `Complete`,
    /// then updates as the store changes.
    pub fn start_view(&self, query: &str) -> CalResult<View> {
        let compiled = self.shared.evaluator.compile(query)?;
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        state.ensure_open()?;
        let initial = matching(&state, self, &compiled);
        tracing::debug!(query, initial = initial.len(), "Started view");
        Ok(state.views.open(compiled, initial))
    }

    pub fn stop_view(&self, view: &View) {
        self.lock().borrow_mut().views.close(view.id());
    }

    /// One VFREEBUSY per resolvable user; the default account when `users`
    /// is empty.
    pub fn get_free_busy(&self, users: &[&str], start: DateTime<Utc>, end: DateTime<Utc>) -> CalResult<Vec<Component>> {
        if end < start {
            return Err(CalError::MalformedInterval {
                start: start.timestamp(),
                end: end.timestamp(),
            });
        }

        let accounts = &self.shared.accounts;
        let resolved: Vec<_> = if users.is_empty() {
            accounts.default_account().into_iter().collect()
        } else {
            users
                .iter()
                .filter_map(|user| {
                    let account = accounts.resolve(user);
                    if account.is_none() {
                        tracing::debug!(user, "No account for free/busy user");
                    }
                    account
                })
                .collect()
        };

        let guard = self.lock();
        let state = guard.borrow();
        state.ensure_open()?;

        let mut handles: Vec<(u64, Handle)> = state
            .index
            .search(start.timestamp(), Some(end.timestamp()))
            .into_iter()
            .filter_map(|h| state.store.position(h).map(|pos| (pos, h)))
            .collect();
        handles.sort_by_key(|(pos, _)| *pos);

        let candidates: Vec<(&Component, Vec<String>)> = handles
            .into_iter()
            .filter_map(|(_, h)| state.store.get(h))
            .map(|comp| {
                let detached = match (comp.recurrence_id(), comp.uid()) {
                    (None, Some(uid)) => state
                        .store
                        .lookup(uid)
                        .map(|o| o.override_rids().to_vec())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                (comp, detached)
            })
            .collect();

        let resolver = state.resolver();
        Ok(resolved
            .iter()
            .map(|account| {
                build_vfreebusy(
                    account,
                    candidates.iter().map(|(c, d)| (*c, d.clone())),
                    &resolver,
                    start,
                    end,
                )
            })
            .collect())
    }

    /// ATTACH URIs of one instance, or of every component of the object.
    pub fn get_attachment_uris(&self, uid: &str, rid: Option<&str>) -> CalResult<Vec<String>> {
        let guard = self.lock();
        let state = guard.borrow();
        state.ensure_open()?;

        let components: Vec<&Component> = match rid {
            Some(rid) => state
                .store
                .override_component(uid, rid)
                .or_else(|| state.store.master(uid))
                .into_iter()
                .collect(),
            None => state.store.object_components(uid),
        };
        if components.is_empty() {
            return Err(CalError::ObjectNotFound(uid.to_string()));
        }
        Ok(components.iter().flat_map(|c| c.attachment_uris()).collect())
    }

    pub fn get_timezone(&self, tzid: &str) -> CalResult<Timezone> {
        let guard = self.lock();
        let state = guard.borrow();
        state.ensure_open()?;
        resolve(tzid, None, &state.timezones).ok_or_else(|| CalError::ObjectNotFound(tzid.to_string()))
    }

    pub fn get_backend_property(&self, prop: BackendProperty) -> CalResult<String> {
        match prop {
            BackendProperty::Capabilities => Ok(CAPABILITIES.join(",")),
            BackendProperty::DefaultObject => {
                let mut comp = Component::new(self.shared.kind.ics_name());
                comp.set_uid(&uuid::Uuid::new_v4().to_string());
                comp.push_prop(Property::new("DTSTAMP", format_utc(&Utc::now())));
                Ok(comp.to_string())
            }
            BackendProperty::Revision => {
                let guard = self.lock();
                let state = guard.borrow();
                Ok(state.revision.current().to_string())
            }
        }
    }
}

/// The store's embedded timezones.
impl TimezoneCache for CalBackend {
    fn get(&self, tzid: &str) -> Option<Timezone> {
        self.lock().borrow().timezones.get(tzid)
    }

    /// Goes through the same path as `add_timezone`: the container is marked
    /// dirty and the revision moves.
    fn add(&mut self, tz: Timezone) {
        let guard = self.lock();
        let added = {
            let mut state = guard.borrow_mut();
            if state.timezones.contains(&tz.tzid) {
                false
            } else {
                state.timezones.add(tz);
                state.rebuild_index();
                true
            }
        };
        if added {
            let mut batch = super::Batch::default();
            batch.mark_changed();
            self.commit(batch, false);
        }
    }

    fn list(&self) -> Vec<Timezone> {
        self.lock().borrow().timezones.list()
    }
}
