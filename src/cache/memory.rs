//! In-process LRU layer.
//!
//! A hash map from key to slot plus an intrusive doubly linked recency list
//! stored in a slab, so get, insert and eviction are all O(1). The list head
//! is the most recently accessed entry; the tail is the eviction victim.

use std::collections::HashMap;
use std::time::Instant;

use crate::cache::entry::CacheEntry;

#[derive(Debug)]
struct Node<T> {
    key: String,
    entry: CacheEntry<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Hit(T),
    Miss,
    /// The entry existed but had expired; it has been purged.
    Expired,
}

/// Bounded LRU map with lazily checked TTLs.
#[derive(Debug)]
pub struct LruStore<T> {
    capacity: usize,
    map: HashMap<String, usize>,
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<T: Clone> LruStore<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up `key`, refreshing its recency on a hit.
    pub fn get(&mut self, key: &str, now: Instant) -> Lookup<T> {
        let Some(&idx) = self.map.get(key) else {
            return Lookup::Miss;
        };

        let expired = self.slots[idx]
            .as_ref()
            .map_or(true, |node| node.entry.is_expired(now));
        if expired {
            self.remove_slot(idx);
            return Lookup::Expired;
        }

        self.detach(idx);
        self.push_front(idx);
        match self.slots[idx].as_mut() {
            Some(node) => {
                node.entry.touch(now);
                Lookup::Hit(node.entry.value.clone())
            }
            None => Lookup::Miss,
        }
    }

    /// Entry for `key` without touching recency or expiry.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<T>> {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|node| &node.entry)
    }

    /// Insert or replace. Returns the key evicted to make room, if any.
    pub fn insert(&mut self, key: String, entry: CacheEntry<T>) -> Option<String> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(node) = self.slots[idx].as_mut() {
                node.entry = entry;
            }
            self.detach(idx);
            self.push_front(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.tail
                .and_then(|tail| self.remove_slot(tail))
                .map(|node| node.key)
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            entry,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.map.get(key).copied() {
            Some(idx) => self.remove_slot(idx).is_some(),
            None => false,
        }
    }

    /// Remove every key matching `pred`. Returns how many were removed.
    pub fn remove_matching(&mut self, pred: impl Fn(&str) -> bool) -> usize {
        let victims: Vec<usize> = self
            .map
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(_, idx)| *idx)
            .collect();
        victims
            .into_iter()
            .filter_map(|idx| self.remove_slot(idx))
            .count()
    }

    /// Key that would be evicted next.
    pub fn lru_key(&self) -> Option<&str> {
        self.tail
            .and_then(|idx| self.slots[idx].as_ref())
            .map(|node| node.key.as_str())
    }

    fn remove_slot(&mut self, idx: usize) -> Option<Node<T>> {
        self.detach(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.map.remove(&node.key);
        self.free.push(idx);
        Some(node)
    }

    fn detach(&mut self, idx: usize) {
        let Some((prev, next)) = self.slots[idx].as_ref().map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => {
                if self.head == Some(idx) {
                    self.head = next;
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => {
                if self.tail == Some(idx) {
                    self.tail = prev;
                }
            }
        }
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.slots[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}
