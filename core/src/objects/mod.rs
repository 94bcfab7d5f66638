//! Named-object registry for builder results.
//!
//! Keys are user-facing strings synthesized from short mnemonics ("pt3",
//! "sf1", ...). The table is insertion-ordered so a replayed sequence
//! reproduces the same listing, and it can be duplicated wholesale for
//! work-plane scoping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::GeometryResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectTable {
    order: Vec<String>,
    entries: HashMap<String, GeometryResult>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `result` under a fresh key `<mnemonic><n>` with the smallest
    /// unused numeric suffix. Returns the key.
    pub fn add_object(&mut self, result: GeometryResult, mnemonic: &str) -> String {
        let mut n = 1usize;
        loop {
            let key = format!("{mnemonic}{n}");
            if !self.entries.contains_key(&key) {
                self.order.push(key.clone());
                self.entries.insert(key.clone(), result);
                return key;
            }
            n += 1;
        }
    }

    /// Plain assignment: overwrite keeps the original position, a new key
    /// appends.
    pub fn insert(&mut self, key: String, result: GeometryResult) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, result);
    }

    pub fn get(&self, key: &str) -> Option<&GeometryResult> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<GeometryResult> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GeometryResult)> {
        self.order.iter().map(|k| (k, &self.entries[k]))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// A detached copy, used for work-plane scoping.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Merge every entry of `other` into `self` in `other`'s insertion
    /// order. Key collisions resolve by plain assignment: last writer wins.
    pub fn merge_from(&mut self, other: ObjectTable) {
        for key in other.order {
            if let Some(result) = other.entries.get(&key) {
                self.insert(key, *result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;

    fn vx(tag: i32) -> GeometryResult {
        GeometryResult::Entity(EntityId::Vertex(tag))
    }

    #[test]
    fn keys_use_the_smallest_unused_suffix() {
        let mut table = ObjectTable::new();
        assert_eq!(table.add_object(vx(1), "pt"), "pt1");
        assert_eq!(table.add_object(vx(2), "pt"), "pt2");
        table.remove("pt1");
        // The freed suffix is reused before a new one is minted.
        assert_eq!(table.add_object(vx(3), "pt"), "pt1");
        assert_eq!(table.add_object(vx(4), "pt"), "pt3");
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut table = ObjectTable::new();
        table.add_object(vx(1), "pt");
        table.add_object(vx(2), "ln");
        table.add_object(vx(3), "pt");
        let keys: Vec<&String> = table.keys().collect();
        assert_eq!(keys, ["pt1", "ln1", "pt2"]);
    }

    #[test]
    fn duplicate_is_detached() {
        let mut table = ObjectTable::new();
        table.add_object(vx(1), "pt");
        let copy = table.duplicate();
        table.add_object(vx(2), "pt");
        assert_eq!(copy.len(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn merge_appends_in_source_order_and_overwrites_collisions() {
        let mut parent = ObjectTable::new();
        parent.insert("pt1".into(), vx(1));
        parent.insert("sf1".into(), vx(9));

        let mut scoped = ObjectTable::new();
        scoped.insert("ln1".into(), vx(5));
        scoped.insert("sf1".into(), vx(7));

        parent.merge_from(scoped);
        let keys: Vec<&String> = parent.keys().collect();
        assert_eq!(keys, ["pt1", "sf1", "ln1"]);
        assert_eq!(parent.get("sf1"), Some(&vx(7)));
    }
}
