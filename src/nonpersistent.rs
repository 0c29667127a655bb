//! In-process storage for non-persistent groups.
//!
//! Entries never reach the backend and vanish with the engine, so
//! expirations are irrelevant here and are not tracked.

use crate::serialization::Payload;
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct NonPersistentStore {
    groups: HashMap<String, HashMap<String, Payload>>,
}

impl NonPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &str, key: &str) -> Option<&Payload> {
        self.groups.get(group).and_then(|g| g.get(key))
    }

    pub fn contains(&self, group: &str, key: &str) -> bool {
        self.get(group, key).is_some()
    }

    /// Unconditional store.
    pub fn insert(&mut self, group: &str, key: &str, payload: Payload) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), payload);
    }

    /// Store only if absent.
    pub fn add(&mut self, group: &str, key: &str, payload: Payload) -> bool {
        if self.contains(group, key) {
            return false;
        }
        self.insert(group, key, payload);
        true
    }

    /// Store only if present.
    pub fn replace(&mut self, group: &str, key: &str, payload: Payload) -> bool {
        match self.groups.get_mut(group).and_then(|g| g.get_mut(key)) {
            Some(slot) => {
                *slot = payload;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, group: &str, key: &str) {
        if let Some(g) = self.groups.get_mut(group) {
            g.remove(key);
        }
    }

    /// Add `offset` to an integer entry, returning the new value.
    ///
    /// Returns `None` if the entry is absent or not an integer.
    pub fn incr(&mut self, group: &str, key: &str, offset: i64) -> Option<i64> {
        let slot = self.groups.get_mut(group)?.get_mut(key)?;
        let value = slot.as_integer()?.saturating_add(offset);
        *slot = Payload::integer(value);
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    /// Number of entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
