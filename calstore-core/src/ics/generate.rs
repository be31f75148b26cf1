//! ICS generation.
//!
//! Writes content lines exactly as stored, folding at 75 octets with CRLF
//! line endings.

use crate::component::{Component, Property};

const MAX_LINE_OCTETS: usize = 75;

/// Serialize a component and its children.
pub fn serialize_component(comp: &Component) -> String {
    let mut out = String::new();
    write_component(&mut out, comp);
    out
}

fn write_component(out: &mut String, comp: &Component) {
    push_folded(out, &format!("BEGIN:{}", comp.name));
    for prop in &comp.properties {
        push_folded(out, &content_line(prop));
    }
    for child in &comp.components {
        write_component(out, child);
    }
    push_folded(out, &format!("END:{}", comp.name));
}

fn content_line(prop: &Property) -> String {
    let mut line = prop.name.clone();
    for (key, value) in &prop.params {
        line.push(';');
        line.push_str(key);
        line.push('=');
        if needs_quoting(value) {
            line.push('"');
            line.push_str(value);
            line.push('"');
        } else {
            line.push_str(value);
        }
    }
    line.push(':');
    line.push_str(&prop.value);
    line
}

fn needs_quoting(value: &str) -> bool {
    !value.starts_with('"') && value.contains([':', ';', ','])
}

/// Append `line` folded per RFC 5545 (continuation lines start with a space).
fn push_folded(out: &mut String, line: &str) {
    let mut octets = 0;
    for ch in line.chars() {
        let width = ch.len_utf8();
        if octets + width > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            octets = 1;
        }
        out.push(ch);
        octets += width;
    }
    out.push_str("\r\n");
}
