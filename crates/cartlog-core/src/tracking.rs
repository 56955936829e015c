//! Insertion-ordered lookup table for live descriptors, RPCs and regions.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Hash table that remembers first-insertion order.
///
/// Overwriting an existing key keeps its original position, so end-of-run
/// reports list entries in the order they first appeared in the log.
#[derive(Debug, Clone)]
pub(crate) struct OrderedTable<K, V> {
    next_seq: u64,
    entries: HashMap<K, (u64, V)>,
}

impl<K: Eq + Hash + Clone, V: Copy> OrderedTable<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 0,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: K, value: V) {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.1 = value;
            return;
        }
        self.entries.insert(key, (self.next_seq, value));
        self.next_seq += 1;
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|(_, value)| *value)
    }

    pub(crate) fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries in first-insertion order.
    pub(crate) fn ordered(&self) -> Vec<(K, V)> {
        let mut items: Vec<(u64, K, V)> = self
            .entries
            .iter()
            .map(|(key, (seq, value))| (*seq, key.clone(), *value))
            .collect();
        items.sort_by_key(|(seq, _, _)| *seq);
        items.into_iter().map(|(_, key, value)| (key, value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_keeps_first_position() {
        let mut table: OrderedTable<String, u32> = OrderedTable::new();
        table.insert("b".to_string(), 1);
        table.insert("a".to_string(), 2);
        table.insert("b".to_string(), 3);
        table.insert("c".to_string(), 4);
        assert_eq!(
            table.ordered(),
            vec![
                ("b".to_string(), 3),
                ("a".to_string(), 2),
                ("c".to_string(), 4)
            ]
        );
    }

    #[test]
    fn lookups_by_borrowed_key() {
        let mut table: OrderedTable<String, u32> = OrderedTable::new();
        table.insert("root".to_string(), 0);
        assert!(table.contains("root"));
        assert_eq!(table.get("root"), Some(0));
        assert_eq!(table.remove("root"), Some(0));
        assert!(table.is_empty());
        assert_eq!(table.remove("root"), None);
        assert_eq!(table.len(), 0);
    }
}
