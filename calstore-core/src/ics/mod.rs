//! iCalendar (RFC 5545) text codec.
//!
//! Parsing goes through the icalendar crate's parser; serialization writes
//! content lines directly so that every property survives a round trip.

mod generate;
mod parse;

pub use generate::serialize_component;
pub use parse::{parse_container, parse_component};
