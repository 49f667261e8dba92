//! Map from keys to values stored contiguously in a [`Vec`].

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// Map from keys to values where the values are stored contiguously in a
/// [`Vec`], with a [`HashMap`] keeping track of which index each key
/// corresponds to.
///
/// Iteration follows the order of the underlying `Vec`, which only depends on
/// the sequence of insertions and removals. Removal swaps the last value into
/// the vacated slot, so keys stay valid while indices may change.
#[derive(Clone, Debug)]
pub struct DenseMap<K, V> {
    indices_for_keys: HashMap<K, usize>,
    keys_at_indices: Vec<K>,
    values: Vec<V>,
}

impl<K, V> DenseMap<K, V>
where
    K: Copy + Hash + Eq + Debug,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            indices_for_keys: HashMap::new(),
            keys_at_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// The number of entries in the map.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether an entry exists for the given key.
    pub fn contains_key(&self, key: K) -> bool {
        self.indices_for_keys.contains_key(&key)
    }

    /// Returns the current index of the value for the given key, or [`None`]
    /// if the key does not exist.
    pub fn idx(&self, key: K) -> Option<usize> {
        self.indices_for_keys.get(&key).copied()
    }

    /// Returns a reference to the value for the given key, or [`None`] if the
    /// key does not exist.
    pub fn get(&self, key: K) -> Option<&V> {
        let idx = self.idx(key)?;
        Some(&self.values[idx])
    }

    /// Returns a mutable reference to the value for the given key, or
    /// [`None`] if the key does not exist.
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        let idx = self.idx(key)?;
        Some(&mut self.values[idx])
    }

    /// Returns mutable references to the values for the two given keys, or
    /// [`None`] if either key does not exist.
    ///
    /// # Panics
    /// If the two keys are equal.
    pub fn get_two_mut(&mut self, key_a: K, key_b: K) -> Option<(&mut V, &mut V)> {
        assert_ne!(key_a, key_b, "Tried to borrow the same value twice");
        let idx_a = self.idx(key_a)?;
        let idx_b = self.idx(key_b)?;
        Some(two_mutable_elements(&mut self.values, idx_a, idx_b))
    }

    /// Returns an iterator over all keys in storage order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.keys_at_indices.iter().copied()
    }

    /// Returns the stored values in storage order.
    pub fn values(&self) -> &[V] {
        &self.values
    }

    /// Returns the stored values in storage order.
    pub fn values_mut(&mut self) -> &mut [V] {
        &mut self.values
    }

    /// Returns an iterator over all key-value pairs in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.keys_at_indices.iter().copied().zip(&self.values)
    }

    /// Returns an iterator over all keys and mutable values in storage order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> + '_ {
        self.keys_at_indices.iter().copied().zip(&mut self.values)
    }

    /// Adds the given value under the given key at the end of the storage.
    ///
    /// # Panics
    /// If the key already exists.
    pub fn push(&mut self, key: K, value: V) {
        let idx_of_new_key = self.keys_at_indices.len();
        let existing_entry = self.indices_for_keys.insert(key, idx_of_new_key);
        assert!(existing_entry.is_none(), "Tried to add an existing key");
        self.keys_at_indices.push(key);
        self.values.push(value);
    }

    /// Removes the value for the given key by moving the last value into its
    /// slot.
    ///
    /// # Returns
    /// The removed value, or [`None`] if the key does not exist.
    pub fn swap_remove(&mut self, key: K) -> Option<V> {
        let idx = self.indices_for_keys.remove(&key)?;
        self.keys_at_indices.swap_remove(idx);
        let value = self.values.swap_remove(idx);
        if let Some(&moved_key) = self.keys_at_indices.get(idx) {
            *self
                .indices_for_keys
                .get_mut(&moved_key)
                .expect("Moved key should have an index") = idx;
        }
        Some(value)
    }

    /// Removes all entries for which the given predicate returns `false`.
    /// Surviving entries keep their relative order.
    pub fn retain(&mut self, mut keep: impl FnMut(K, &V) -> bool) {
        let mut kept_keys = Vec::with_capacity(self.keys_at_indices.len());
        let mut kept_values = Vec::with_capacity(self.values.len());

        for (key, value) in self.keys_at_indices.drain(..).zip(self.values.drain(..)) {
            if keep(key, &value) {
                kept_keys.push(key);
                kept_values.push(value);
            }
        }

        self.indices_for_keys.clear();
        for (idx, &key) in kept_keys.iter().enumerate() {
            self.indices_for_keys.insert(key, idx);
        }
        self.keys_at_indices = kept_keys;
        self.values = kept_values;
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.indices_for_keys.clear();
        self.keys_at_indices.clear();
        self.values.clear();
    }
}

impl<K, V> Default for DenseMap<K, V>
where
    K: Copy + Hash + Eq + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

fn two_mutable_elements<T>(values: &mut [T], idx_a: usize, idx_b: usize) -> (&mut T, &mut T) {
    if idx_b > idx_a {
        let (left, right) = values.split_at_mut(idx_b);
        (&mut left[idx_a], &mut right[0])
    } else {
        let (left, right) = values.split_at_mut(idx_a);
        (&mut right[0], &mut left[idx_b])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn map_with(entries: &[(u32, &'static str)]) -> DenseMap<u32, &'static str> {
        let mut map = DenseMap::new();
        for &(key, value) in entries {
            map.push(key, value);
        }
        map
    }

    #[test]
    fn new_dense_map_is_empty() {
        let map = DenseMap::<u32, f64>::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert!(map.get(0).is_none());
    }

    #[test]
    fn pushed_values_are_retrievable_by_key() {
        let map = map_with(&[(4, "a"), (2, "b"), (100, "c")]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(4), Some(&"a"));
        assert_eq!(map.get(2), Some(&"b"));
        assert_eq!(map.get(100), Some(&"c"));
        assert_eq!(map.get(0), None);
        assert_eq!(map.idx(2), Some(1));
    }

    #[test]
    #[should_panic]
    fn pushing_duplicate_key_fails() {
        map_with(&[(4, "a"), (4, "b")]);
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let map = map_with(&[(4, "a"), (2, "b"), (100, "c")]);
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec![4, 2, 100]);
        assert_eq!(map.values(), &["a", "b", "c"]);
    }

    #[test]
    fn swap_remove_moves_last_value_into_slot() {
        let mut map = map_with(&[(4, "a"), (2, "b"), (100, "c")]);

        assert_eq!(map.swap_remove(4), Some("a"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.idx(100), Some(0));
        assert_eq!(map.get(100), Some(&"c"));
        assert_eq!(map.get(2), Some(&"b"));

        assert_eq!(map.swap_remove(2), Some("b"));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![100]);

        assert_eq!(map.swap_remove(100), Some("c"));
        assert!(map.is_empty());
    }

    #[test]
    fn swap_remove_of_missing_key_gives_none() {
        let mut map = map_with(&[(4, "a")]);
        assert_eq!(map.swap_remove(3), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn retain_preserves_order_of_kept_entries() {
        let mut map = map_with(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
        map.retain(|key, _| key % 2 == 0);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(map.idx(4), Some(1));
        assert_eq!(map.get(1), None);
    }

    #[test]
    fn get_two_mut_gives_both_values() {
        let mut map = map_with(&[(1, "a"), (2, "b"), (3, "c")]);
        let (a, c) = map.get_two_mut(3, 1).unwrap();
        assert_eq!((*a, *c), ("c", "a"));
        *a = "x";
        assert_eq!(map.get(3), Some(&"x"));
        assert!(map.get_two_mut(1, 7).is_none());
    }

    #[test]
    #[should_panic]
    fn get_two_mut_with_same_key_fails() {
        let mut map = map_with(&[(1, "a")]);
        map.get_two_mut(1, 1);
    }
}
