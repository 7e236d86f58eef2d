//! A map that remembers the order in which its keys were last touched.
//!
//! Entries live in a slab of slots that form a doubly linked list, ordered from the least
//! recently used (the head) to the most recently used (the tail). A `HashMap` from key to slot
//! index gives direct access to any entry, so promoting or removing a key never scans the list.
use std::collections::HashMap;

// marks the absence of a neighbouring slot
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<V> {
    key: String,
    value: V,
    prev: usize,
    next: usize,
}

/// A key/value map with O(1) recency tracking.
///
/// Every slot index held in `index`, `head`, `tail` or a slot's `prev`/`next` refers to an
/// occupied slot. The set of keys in `index` is exactly the set of keys linked into the list.
#[derive(Debug)]
pub struct LruMap<V> {
    slots: Vec<Option<Slot<V>>>,
    // indices of unoccupied slots that can be reused
    free: Vec<usize>,
    index: HashMap<String, usize>,
    // least recently used
    head: usize,
    // most recently used
    tail: usize,
}

impl<V> Default for LruMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruMap<V> {
    /// creates an empty map
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// creates an empty map with room for `capacity` entries before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        LruMap {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    /// number of entries in the map
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// returns `true` if the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// returns `true` if `key` is present. Does not change the recency order.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// returns the value for `key` and marks it as the most recently used entry
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&self.slot(idx).value)
    }

    /// returns the value for `key` mutably and marks it as the most recently used entry
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&mut self.slot_mut(idx).value)
    }

    /// returns the value for `key` without touching it
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.slot(idx).value)
    }

    /// Inserts `value` under `key` as the most recently used entry.
    ///
    /// If the key was already present its previous value is returned. No entry is ever evicted
    /// here; bounding the size is left to the caller through [`LruMap::pop_lru`].
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            return Some(std::mem::replace(&mut self.slot_mut(idx).value, value));
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_back(idx);
        self.index.insert(key, idx);
        None
    }

    /// removes `key` and returns its value, if it was present
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        Some(self.release(idx).value)
    }

    /// returns the least recently used entry without removing it
    pub fn peek_lru(&self) -> Option<(&str, &V)> {
        if self.head == NIL {
            return None;
        }
        let slot = self.slot(self.head);
        Some((slot.key.as_str(), &slot.value))
    }

    /// removes and returns the least recently used entry
    pub fn pop_lru(&mut self) -> Option<(String, V)> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.unlink(idx);
        let slot = self.release(idx);
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    /// iterates the entries from least to most recently used
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            map: self,
            cursor: self.head,
        }
    }

    /// iterates all entries mutably, in no particular order, without touching them
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.slots
            .iter_mut()
            .flatten()
            .map(|slot| (slot.key.as_str(), &mut slot.value))
    }

    fn slot(&self, idx: usize) -> &Slot<V> {
        self.slots[idx].as_ref().expect("linked index points at an empty slot")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<V> {
        self.slots[idx].as_mut().expect("linked index points at an empty slot")
    }

    fn promote(&mut self, idx: usize) {
        if self.tail != idx {
            self.unlink(idx);
            self.link_back(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.slot_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slot_mut(next).prev = prev;
        }
    }

    fn link_back(&mut self, idx: usize) {
        let tail = self.tail;
        {
            let slot = self.slot_mut(idx);
            slot.prev = tail;
            slot.next = NIL;
        }
        if tail == NIL {
            self.head = idx;
        } else {
            self.slot_mut(tail).next = idx;
        }
        self.tail = idx;
    }

    fn release(&mut self, idx: usize) -> Slot<V> {
        let slot = self.slots[idx].take().expect("released slot was empty");
        self.free.push(idx);
        slot
    }
}

/// Iterator over an [`LruMap`], from least to most recently used.
pub struct Iter<'a, V> {
    map: &'a LruMap<V>,
    cursor: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let slot = self.map.slot(self.cursor);
        self.cursor = slot.next;
        Some((slot.key.as_str(), &slot.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<V>(map: &LruMap<V>) -> Vec<String> {
        map.iter().map(|(k, _)| k.to_string()).collect()
    }

    #[test]
    fn new_map_is_empty() {
        let map: LruMap<u32> = LruMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert!(map.peek_lru().is_none());
    }

    #[test]
    fn insertion_order_is_recency_order() {
        let mut map = LruMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.insert("c".to_string(), 3);

        assert_eq!(keys(&map), vec!["a", "b", "c"]);
        assert_eq!(map.peek_lru(), Some(("a", &1)));
    }

    #[test]
    fn get_promotes_but_peek_does_not() {
        let mut map = LruMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.insert("c".to_string(), 3);

        assert_eq!(map.peek("a"), Some(&1));
        assert_eq!(keys(&map), vec!["a", "b", "c"]);

        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(keys(&map), vec!["b", "c", "a"]);

        *map.get_mut("b").unwrap() = 20;
        assert_eq!(keys(&map), vec!["c", "a", "b"]);
        assert_eq!(map.peek("b"), Some(&20));
    }

    #[test]
    fn reinsert_replaces_value_and_promotes() {
        let mut map = LruMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);

        assert_eq!(map.insert("a".to_string(), 10), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(keys(&map), vec!["b", "a"]);
        assert_eq!(map.peek("a"), Some(&10));
    }

    #[test]
    fn pop_lru_drains_oldest_first() {
        let mut map = LruMap::new();
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            map.insert(k.to_string(), i);
        }
        map.get("a");
        map.get("c");

        assert_eq!(map.pop_lru(), Some(("b".to_string(), 1)));
        assert_eq!(map.pop_lru(), Some(("d".to_string(), 3)));
        assert_eq!(map.pop_lru(), Some(("a".to_string(), 0)));
        assert_eq!(map.pop_lru(), Some(("c".to_string(), 2)));
        assert_eq!(map.pop_lru(), None);
        assert!(map.is_empty());
    }

    #[test]
    fn remove_from_head_middle_and_tail() {
        let mut map = LruMap::new();
        for k in ["a", "b", "c", "d", "e"] {
            map.insert(k.to_string(), ());
        }
        assert_eq!(map.remove("c"), Some(()));
        assert_eq!(map.remove("a"), Some(()));
        assert_eq!(map.remove("e"), Some(()));
        assert_eq!(map.remove("zzz"), None);

        assert_eq!(keys(&map), vec!["b", "d"]);
        assert!(!map.contains("c"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut map = LruMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.remove("a");
        map.insert("c".to_string(), 3);

        assert_eq!(map.slots.len(), 2);
        assert_eq!(keys(&map), vec!["b", "c"]);
    }

    #[test]
    fn index_and_list_agree_after_mixed_operations() {
        let mut map = LruMap::new();
        for i in 0..50u32 {
            map.insert(format!("k{}", i % 13), i);
            if i % 3 == 0 {
                map.get(&format!("k{}", (i * 7) % 13));
            }
            if i % 5 == 0 {
                map.remove(&format!("k{}", (i * 3) % 13));
            }
            if i % 11 == 0 {
                map.pop_lru();
            }
        }
        let listed = keys(&map);
        assert_eq!(listed.len(), map.len());
        for k in &listed {
            assert!(map.contains(k));
        }
        let mut unique = listed.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), listed.len());
    }

    #[test]
    fn iter_mut_reaches_every_entry() {
        let mut map = LruMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        for (_, v) in map.iter_mut() {
            *v *= 10;
        }
        assert_eq!(map.peek("a"), Some(&10));
        assert_eq!(map.peek("b"), Some(&20));
        assert_eq!(keys(&map), vec!["a", "b"]);
    }
}
