//! Routing snapshot shared between the configurator (writer) and the outbound
//! handlers (readers).
//!
//! A [`RoutingTable`] is never mutated once published.  The configurator
//! clones the current table, edits the copy, and swaps it in with
//! [`RoutingState::replace`]; readers hold an `Arc` for as long as they need a
//! consistent view.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Subscription, publication, alias and settings state declared by the
/// device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    pub subscribed: HashSet<String>,
    pub published: HashSet<String>,
    /// Forwarded topic name → short serial tag.
    pub aliases: HashMap<String, String>,
    /// Capability name → (setting name → value).
    pub settings: HashMap<String, BTreeMap<String, String>>,
    /// Device module name from the last configuration document.
    pub module_name: Option<String>,
}

impl RoutingTable {
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed.contains(topic)
    }

    pub fn alias(&self, topic: &str) -> Option<&str> {
        self.aliases.get(topic).map(String::as_str)
    }

    /// Sorted copy of the subscription set, for logging.
    pub fn subscribed_sorted(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.subscribed.iter().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }
}

/// Shared handle to the current [`RoutingTable`].
#[derive(Debug, Default)]
pub struct RoutingState {
    current: RwLock<Arc<RoutingTable>>,
}

impl RoutingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table in effect right now.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Atomically publish `table` as the new routing state.
    pub fn replace(&self, table: RoutingTable) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_across_replace() {
        let state = RoutingState::new();
        let before = state.snapshot();
        assert!(before.subscribed.is_empty());

        let mut next = RoutingTable::clone(&before);
        next.subscribed.insert("Cardiovascular_HeartRate".into());
        next.aliases.insert("Cardiovascular_HeartRate".into(), "HR".into());
        state.replace(next);

        assert!(!before.is_subscribed("Cardiovascular_HeartRate"));
        let after = state.snapshot();
        assert!(after.is_subscribed("Cardiovascular_HeartRate"));
        assert_eq!(after.alias("Cardiovascular_HeartRate"), Some("HR"));
        assert_eq!(after.alias("Respiratory_Rate"), None);
    }

    #[test]
    fn subscribed_sorted_orders_topics() {
        let mut table = RoutingTable::default();
        table.subscribed.insert("b".into());
        table.subscribed.insert("a".into());
        assert_eq!(table.subscribed_sorted(), vec!["a", "b"]);
    }
}
