//! Group classification.

use std::collections::HashSet;

/// Group used when the caller passes an empty group.
pub const DEFAULT_GROUP: &str = "default";

/// Normalize a caller-supplied group name.
pub fn normalize_group(group: &str) -> &str {
    if group.is_empty() {
        DEFAULT_GROUP
    } else {
        group
    }
}

/// Registry of group classifications.
///
/// A group can be global (shared across scopes, e.g. every site of a
/// multi-tenant install) and/or non-persistent (kept in-process only). The
/// two flags are independent. Registration is additive and idempotent.
#[derive(Clone, Debug, Default)]
pub struct GroupRegistry {
    global: HashSet<String>,
    non_persistent: HashSet<String>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark groups as global.
    pub fn add_global<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global.extend(groups.into_iter().map(Into::into));
    }

    /// Mark groups as non-persistent.
    pub fn add_non_persistent<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_persistent
            .extend(groups.into_iter().map(Into::into));
    }

    pub fn is_global(&self, group: &str) -> bool {
        self.global.contains(normalize_group(group))
    }

    pub fn is_non_persistent(&self, group: &str) -> bool {
        self.non_persistent.contains(normalize_group(group))
    }

    /// Registered non-persistent groups.
    pub fn non_persistent_groups(&self) -> impl Iterator<Item = &str> {
        self.non_persistent.iter().map(String::as_str)
    }
}
