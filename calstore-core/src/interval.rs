//! Interval index over component occurrence bounds.
//!
//! A treap keyed by `(start, insertion sequence)` where every node also
//! carries the largest end in its subtree, so a range search can skip whole
//! subtrees that end before the range begins.

use std::collections::HashMap;

use crate::component::ComponentId;
use crate::error::{CalError, CalResult};
use crate::store::Handle;

/// Internal end value for entries without an end.
const UNBOUNDED: i64 = i64::MAX;

type Key = (i64, u64);

struct Node {
    key: Key,
    end: i64,
    max_end: i64,
    priority: u64,
    handle: Handle,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn update(&mut self) {
        let mut max_end = self.end;
        if let Some(left) = &self.left {
            max_end = max_end.max(left.max_end);
        }
        if let Some(right) = &self.right {
            max_end = max_end.max(right.max_end);
        }
        self.max_end = max_end;
    }
}

/// Split into keys `< key` and keys `>= key`.
fn split(node: Option<Box<Node>>, key: Key) -> (Option<Box<Node>>, Option<Box<Node>>) {
    match node {
        None => (None, None),
        Some(mut n) => {
            if n.key < key {
                let (l, r) = split(n.right.take(), key);
                n.right = l;
                n.update();
                (Some(n), r)
            } else {
                let (l, r) = split(n.left.take(), key);
                n.left = r;
                n.update();
                (l, Some(n))
            }
        }
    }
}

/// Merge two treaps where every key of `a` is below every key of `b`.
fn merge(a: Option<Box<Node>>, b: Option<Box<Node>>) -> Option<Box<Node>> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority > b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.update();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.update();
                Some(b)
            }
        }
    }
}

fn collect(node: &Option<Box<Node>>, start: i64, end: i64, out: &mut Vec<(Key, Handle)>) {
    let Some(n) = node else { return };
    if n.max_end < start {
        return;
    }
    collect(&n.left, start, end, out);
    if n.key.0 > end {
        return;
    }
    if n.end >= start {
        out.push((n.key, n.handle));
    }
    collect(&n.right, start, end, out);
}

pub struct IntervalIndex {
    root: Option<Box<Node>>,
    keys: HashMap<ComponentId, Key>,
    next_seq: u64,
    rng: u64,
}

impl Default for IntervalIndex {
    fn default() -> Self {
        IntervalIndex {
            root: None,
            keys: HashMap::new(),
            next_seq: 0,
            rng: 0x853c_49e6_748f_ea9b,
        }
    }
}

impl IntervalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_priority(&mut self) -> u64 {
        // splitmix64
        self.rng = self.rng.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.rng;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Index `handle` under `[start, end]`; `None` end means unbounded.
    /// An identity already present is replaced.
    pub fn insert(&mut self, id: ComponentId, start: i64, end: Option<i64>, handle: Handle) -> CalResult<()> {
        let end_value = end.unwrap_or(UNBOUNDED);
        if end_value < start {
            return Err(CalError::MalformedInterval {
                start,
                end: end_value,
            });
        }
        self.remove(&id.uid, id.rid.as_deref());

        self.next_seq += 1;
        let key = (start, self.next_seq);
        let node = Box::new(Node {
            key,
            end: end_value,
            max_end: end_value,
            priority: self.next_priority(),
            handle,
            left: None,
            right: None,
        });

        let (left, right) = split(self.root.take(), key);
        self.root = merge(merge(left, Some(node)), right);
        self.keys.insert(id, key);
        Ok(())
    }

    /// Handles whose interval overlaps `[start, end]`, ordered by start.
    pub fn search(&self, start: i64, end: Option<i64>) -> Vec<Handle> {
        let mut out = Vec::new();
        collect(&self.root, start, end.unwrap_or(UNBOUNDED), &mut out);
        out.into_iter().map(|(_, h)| h).collect()
    }

    pub fn remove(&mut self, uid: &str, rid: Option<&str>) -> bool {
        let id = ComponentId::new(uid, rid.map(str::to_string));
        let Some(key) = self.keys.remove(&id) else {
            return false;
        };
        let (left, rest) = split(self.root.take(), key);
        let (_, right) = split(rest, (key.0, key.1 + 1));
        self.root = merge(left, right);
        true
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::store::Arena;

    fn handles(n: usize) -> (Arena, Vec<Handle>) {
        let mut arena = Arena::default();
        let hs = (0..n).map(|_| arena.insert(Component::new("VEVENT"))).collect();
        (arena, hs)
    }

    fn id(uid: &str) -> ComponentId {
        ComponentId::new(uid, None)
    }

    #[test]
    fn search_finds_overlaps_only() {
        let (_arena, h) = handles(3);
        let mut index = IntervalIndex::new();
        index.insert(id("a"), 10, Some(20), h[0]).unwrap();
        index.insert(id("b"), 30, Some(40), h[1]).unwrap();
        index.insert(id("c"), 15, Some(35), h[2]).unwrap();

        assert_eq!(index.search(21, Some(29)), vec![h[2]]);
        assert_eq!(index.search(0, Some(10)), vec![h[0]], "Closed bounds touch at 10");
        assert_eq!(index.search(41, Some(50)), Vec::<Handle>::new());
        assert_eq!(index.search(0, None), vec![h[0], h[2], h[1]]);
    }

    #[test]
    fn unbounded_entries_match_any_later_range() {
        let (_arena, h) = handles(1);
        let mut index = IntervalIndex::new();
        index.insert(id("forever"), 100, None, h[0]).unwrap();

        assert_eq!(index.search(1_000_000, Some(2_000_000)), vec![h[0]]);
        assert_eq!(index.search(100, Some(100)), vec![h[0]]);
        assert!(index.search(0, Some(99)).is_empty());
    }

    #[test]
    fn malformed_intervals_are_rejected() {
        let (_arena, h) = handles(1);
        let mut index = IntervalIndex::new();
        assert!(matches!(
            index.insert(id("bad"), 50, Some(10), h[0]),
            Err(CalError::MalformedInterval { start: 50, end: 10 })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn remove_by_identity() {
        let (_arena, h) = handles(3);
        let mut index = IntervalIndex::new();
        index.insert(id("a"), 10, Some(20), h[0]).unwrap();
        index.insert(ComponentId::new("a", Some("r1".into())), 10, Some(20), h[1]).unwrap();
        index.insert(id("b"), 10, Some(20), h[2]).unwrap();

        assert!(index.remove("a", Some("r1")));
        assert!(!index.remove("a", Some("r1")));
        assert_eq!(index.search(0, Some(100)), vec![h[0], h[2]]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn many_entries_stay_consistent() {
        let (_arena, h) = handles(200);
        let mut index = IntervalIndex::new();
        for (i, handle) in h.iter().enumerate() {
            let start = (i as i64) * 10;
            index.insert(id(&format!("e{i}")), start, Some(start + 5), *handle).unwrap();
        }
        for i in (0..200).step_by(2) {
            assert!(index.remove(&format!("e{i}"), None));
        }

        let found = index.search(0, Some(2000));
        assert_eq!(found.len(), 100);
        assert_eq!(index.search(500, Some(504)), Vec::<Handle>::new());
        assert_eq!(index.search(510, Some(512)), vec![h[51]]);
    }
}
