//! Request-local mirror of backend state.
//!
//! Remembers, per storage key, the last payload seen in or written to the
//! backend, or that the backend confirmed the key absent. Lives for one
//! request and is never shared.

use crate::serialization::Payload;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Slot {
    Present(Payload),
    Missing,
}

/// Result of a mirror lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MirrorLookup<'a> {
    /// Last known payload.
    Present(&'a Payload),
    /// Backend confirmed the key absent.
    Missing,
    /// Nothing known; ask the backend.
    Unknown,
}

#[derive(Clone, Debug, Default)]
pub struct LocalMirror {
    slots: HashMap<String, Slot>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> MirrorLookup<'_> {
        match self.slots.get(key) {
            Some(Slot::Present(payload)) => MirrorLookup::Present(payload),
            Some(Slot::Missing) => MirrorLookup::Missing,
            None => MirrorLookup::Unknown,
        }
    }

    pub fn put(&mut self, key: impl Into<String>, payload: Payload) {
        self.slots.insert(key.into(), Slot::Present(payload));
    }

    /// Record that the backend confirmed the key absent.
    pub fn put_missing(&mut self, key: impl Into<String>) {
        self.slots.insert(key.into(), Slot::Missing);
    }

    /// Forget whatever is known about the key.
    ///
    /// Used after ambiguous backend results: the next read goes to the
    /// backend instead of trusting a guess.
    pub fn invalidate(&mut self, key: &str) {
        self.slots.remove(key);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::encode;

    #[test]
    fn test_present_missing_unknown() {
        let mut mirror = LocalMirror::new();
        let payload = encode(&false).unwrap();

        mirror.put("a", payload.clone());
        mirror.put_missing("b");

        assert_eq!(mirror.get("a"), MirrorLookup::Present(&payload));
        assert_eq!(mirror.get("b"), MirrorLookup::Missing);
        assert_eq!(mirror.get("c"), MirrorLookup::Unknown);
    }

    #[test]
    fn test_invalidate_forgets_instead_of_marking_missing() {
        let mut mirror = LocalMirror::new();
        mirror.put("a", encode(&1_i64).unwrap());
        mirror.invalidate("a");
        assert_eq!(mirror.get("a"), MirrorLookup::Unknown);

        mirror.put_missing("b");
        mirror.invalidate("b");
        assert_eq!(mirror.get("b"), MirrorLookup::Unknown);
    }

    #[test]
    fn test_clear() {
        let mut mirror = LocalMirror::new();
        mirror.put("a", encode(&1_i64).unwrap());
        mirror.put_missing("b");
        assert_eq!(mirror.len(), 2);
        mirror.clear();
        assert!(mirror.is_empty());
    }
}
