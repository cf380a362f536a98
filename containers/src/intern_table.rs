use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::ContainerErrors;

/// Fixed capacity table that maps structurally equal keys to one entry.
///
/// Entries are addressed by their insertion index, which never changes since entries are never
/// removed. Lookup hashes the key first and only compares keys whose hash matches.
#[derive(Debug)]
pub struct InternTable<K, V>
where
    K: Hash + Eq,
{
    entries: Vec<(K, V)>,
    // hash of the key -> indices of entries with that hash
    buckets: HashMap<u64, Vec<usize>>,
    capacity: usize,
}

impl<K, V> InternTable<K, V>
where
    K: Hash + Eq,
{
    fn compute_hash(key: &K) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            buckets: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Index of the entry whose key equals `key`
    pub fn find(&self, key: &K) -> Option<usize> {
        let hash = Self::compute_hash(key);
        self.buckets.get(&hash).and_then(|bucket| {
            bucket
                .iter()
                .copied()
                // Hash collision check: verify the actual key matches
                .find(|index| self.entries[*index].0 == *key)
        })
    }

    /// Return the index of `key`, inserting the value produced by `create` if the key is new.
    ///
    /// The boolean is `true` when an entry was inserted. `create` is only called when the key is
    /// new and the table has room; if it fails nothing is inserted.
    pub fn get_or_insert_with<E, F>(&mut self, key: K, create: F) -> Result<(usize, bool), E>
    where
        E: From<ContainerErrors>,
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(index) = self.find(&key) {
            return Ok((index, false));
        }
        if self.is_full() {
            return Err(ContainerErrors::CapacityExceeded {
                capacity: self.capacity,
            }
            .into());
        }
        let value = create(&key)?;
        let index = self.entries.len();
        self.buckets
            .entry(Self::compute_hash(&key))
            .or_default()
            .push(index);
        self.entries.push((key, value));
        Ok((index, true))
    }

    pub fn key(&self, index: usize) -> Option<&K> {
        self.entries.get(index).map(|entry| &entry.0)
    }

    pub fn get(&self, index: usize) -> Option<&V> {
        self.entries.get(index).map(|entry| &entry.1)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut V> {
        self.entries.get_mut(index).map(|entry| &mut entry.1)
    }

    pub fn try_get(&self, index: usize) -> Result<&V, ContainerErrors> {
        self.get(index).ok_or(ContainerErrors::InvalidHandle { index })
    }

    pub fn try_get_mut(&mut self, index: usize) -> Result<&mut V, ContainerErrors> {
        self.get_mut(index)
            .ok_or(ContainerErrors::InvalidHandle { index })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &K, &V)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, (key, value))| (index, key, value))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|entry| &mut entry.1)
    }
}
