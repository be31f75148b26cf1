//! Core of the calstore calendar store.
//!
//! One iCalendar container file holds every object of one kind (events,
//! tasks or journal entries). This crate provides:
//! - `CalBackend`, the host facade: create, modify, remove, receive, queries,
//!   live views and free/busy
//! - the pieces it is built from: component store, interval index, revision
//!   tracking, crash-safe persistence
//! - `sync`, replaying and propagating changes through an append-only log

pub mod backend;
pub mod component;
pub mod config;
pub mod error;
pub mod freebusy;
pub mod ics;
pub mod interval;
pub mod lock;
pub mod notify;
pub mod persist;
pub mod query;
pub mod recurrence;
pub mod revision;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod time;
pub mod timezone;

pub use backend::{BackendProperty, CalBackend, CalBackendBuilder, ModType, ModifyOptions};
pub use component::{Component, ComponentId, ComponentKind, Property};
pub use config::StoreConfig;
pub use error::{CalError, CalResult};
pub use notify::{BackendEvent, View, ViewEvent};
pub use time::EventTime;
