use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use crate::index::key::KeyDescriptor;

/// Hash map whose hashing and equality come from a `KeyDescriptor`
/// instead of `K: Hash + Eq`
pub struct KeyMap<K, V> {
    descriptor: Arc<dyn KeyDescriptor<K>>,
    buckets: HashMap<u64, Vec<(K, V)>>,
    len: usize,
}

impl<K, V> KeyMap<K, V> {
    pub fn new(descriptor: Arc<dyn KeyDescriptor<K>>) -> Self {
        KeyMap {
            descriptor,
            buckets: HashMap::new(),
            len: 0,
        }
    }

    pub fn descriptor(&self) -> &Arc<dyn KeyDescriptor<K>> {
        &self.descriptor
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.descriptor.hash(key);
        self.buckets.get(&hash)?
            .iter()
            .find(|(k, _)| self.descriptor.equals(k, key))
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns the previous value; the originally stored key spelling is kept
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.descriptor.hash(&key);
        let bucket = self.buckets.entry(hash).or_default();
        if let Some(slot) = bucket.iter_mut().find(|(k, _)| self.descriptor.equals(k, &key)) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        bucket.push((key, value));
        self.len += 1;
        None
    }

    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let hash = self.descriptor.hash(&key);
        let bucket = self.buckets.entry(hash).or_default();
        let pos = match bucket.iter().position(|(k, _)| self.descriptor.equals(k, &key)) {
            Some(pos) => pos,
            None => {
                bucket.push((key, make()));
                self.len += 1;
                bucket.len() - 1
            }
        };
        &mut bucket[pos].1
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.descriptor.hash(key);
        let bucket = self.buckets.get_mut(&hash)?;
        let pos = bucket.iter().position(|(k, _)| self.descriptor.equals(k, key))?;
        let (_, value) = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.values().flatten().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }
}

impl<K: Clone, V: Clone> Clone for KeyMap<K, V> {
    fn clone(&self) -> Self {
        KeyMap {
            descriptor: Arc::clone(&self.descriptor),
            buckets: self.buckets.clone(),
            len: self.len,
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for KeyMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::{CaseInsensitiveKeyDescriptor, StringKeyDescriptor};

    #[test]
    fn equality_follows_the_descriptor() {
        let mut map: KeyMap<String, u32> = KeyMap::new(Arc::new(CaseInsensitiveKeyDescriptor));
        assert_eq!(map.insert("Foo".into(), 1), None);
        assert_eq!(map.insert("FOO".into(), 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.keys().next().unwrap(), "Foo");
        assert_eq!(map.get(&"foo".to_string()), Some(&2));

        *map.get_or_insert_with("bar".into(), || 0) += 5;
        *map.get_or_insert_with("BAR".into(), || 100) += 5;
        assert_eq!(map.get(&"Bar".to_string()), Some(&10));

        assert_eq!(map.remove(&"fOO".to_string()), Some(2));
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&"foo".to_string()));
    }

    #[test]
    fn natural_strings_stay_distinct() {
        let mut map: KeyMap<String, ()> = KeyMap::new(Arc::new(StringKeyDescriptor));
        map.insert("a".into(), ());
        map.insert("A".into(), ());
        assert_eq!(map.len(), 2);
    }
}
