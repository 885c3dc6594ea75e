//! # Dispatch Cache
//!
//! A string-keyed lookup table specialized for the dispatch hot path:
//! lookups probe by string *slice*, so resolving a method identifier never
//! allocates an owned key. The key is copied into a `String` only when an
//! entry is inserted.
//!
//! Backing store: an open-addressing bucket table with in-place singly
//! linked overflow chains. Capacity is a power of two starting at 4 and
//! doubles when full. A chain longer than the entry count means the bucket
//! state is corrupted; that is a fatal internal error, never tolerated.

use std::hash::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

/// Initial capacity exponent (capacity 4).
const INITIAL_CAP_POW: u32 = 2;

/// Slice-keyed cache of compiled lookups. No removal: the protocol never
/// invalidates an entry.
pub struct SliceMap<V> {
    cap_pow: u32,
    /// Bucket heads: entry index + 1, 0 meaning empty.
    buckets: Vec<u32>,
    entries: Vec<Entry<V>>,
}

struct Entry<V> {
    key: String,
    /// Next entry index + 1 in this bucket's chain, 0 meaning end.
    next: u32,
    value: V,
}

impl<V> SliceMap<V> {
    pub fn new() -> Self {
        Self {
            cap_pow: INITIAL_CAP_POW,
            buckets: vec![0; 1 << INITIAL_CAP_POW],
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bucket_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() & ((1u64 << self.cap_pow) - 1)) as usize
    }

    /// Look up by slice without allocating.
    pub fn get(&self, key: &str) -> Option<&V> {
        let mut index = self.buckets[self.bucket_of(key)];
        let mut walked = 0usize;
        while index != 0 {
            if walked > self.entries.len() {
                panic!("dispatch cache bucket chain cycle");
            }
            let entry = &self.entries[(index - 1) as usize];
            if entry.key == key {
                return Some(&entry.value);
            }
            index = entry.next;
            walked += 1;
        }
        None
    }

    /// Insert an entry, copying the key into owned storage. Existing keys
    /// are left untouched; the protocol only inserts after a missed lookup.
    pub fn insert(&mut self, key: &str, value: V) {
        if self.get(key).is_some() {
            return;
        }
        if self.entries.len() == self.buckets.len() {
            self.grow();
        }

        let bucket = self.bucket_of(key);
        let head = self.buckets[bucket];
        self.entries.push(Entry { key: key.to_owned(), next: head, value });
        self.buckets[bucket] = self.entries.len() as u32;
    }

    /// Double the bucket table and rehash the chains in place.
    fn grow(&mut self) {
        self.cap_pow += 1;
        self.buckets = vec![0; 1 << self.cap_pow];
        for entry in self.entries.iter_mut() {
            entry.next = 0;
        }
        for i in 0..self.entries.len() {
            let bucket = {
                let mut hasher = DefaultHasher::new();
                self.entries[i].key.hash(&mut hasher);
                (hasher.finish() & ((1u64 << self.cap_pow) - 1)) as usize
            };
            self.entries[i].next = self.buckets[bucket];
            self.buckets[bucket] = (i + 1) as u32;
        }
    }
}

impl<V> Default for SliceMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty() {
        let map: SliceMap<u32> = SliceMap::new();
        assert!(map.get("anything").is_none());
    }

    #[test]
    fn insert_then_get_by_slice() {
        let mut map = SliceMap::new();
        let owned = String::from("[demo]Calc:Add([core]i32,[core]i32)");
        map.insert(&owned, 7u32);

        // Probe with a different backing slice of the same content.
        let probe = format!("[demo]Calc:Add([core]i32,{})", "[core]i32");
        assert_eq!(map.get(&probe), Some(&7));
    }

    #[test]
    fn growth_preserves_entries() {
        let mut map = SliceMap::new();
        for i in 0..64 {
            map.insert(&format!("key-{}", i), i);
        }
        assert_eq!(map.len(), 64);
        for i in 0..64 {
            assert_eq!(map.get(&format!("key-{}", i)), Some(&i));
        }
    }

    #[test]
    fn duplicate_insert_keeps_first() {
        let mut map = SliceMap::new();
        map.insert("k", 1);
        map.insert("k", 2);
        assert_eq!(map.get("k"), Some(&1));
        assert_eq!(map.len(), 1);
    }
}
