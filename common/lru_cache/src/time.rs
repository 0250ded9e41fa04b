//! This implements a time-based LRU cache for checking gossipsub message duplicates.

use fnv::FnvHashSet;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct Element<Key> {
    /// The key being inserted.
    key: Key,
    /// The instant the key was inserted.
    inserted: Instant,
}

pub struct LRUTimeCache<Key> {
    /// The duplicate cache.
    map: FnvHashSet<Key>,
    /// An ordered list of keys by insert time.
    list: VecDeque<Element<Key>>,
    /// The time elements remain in the cache.
    ttl: Duration,
}

impl<Key> LRUTimeCache<Key>
where
    Key: Eq + std::hash::Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        LRUTimeCache {
            map: FnvHashSet::default(),
            list: VecDeque::new(),
            ttl,
        }
    }

    /// Inserts new elements and removes any expired elements.
    ///
    /// If the key was not present this returns `true`. If the value was already present this
    /// returns `false`.
    pub fn insert_update(&mut self, key: Key) -> bool {
        // check the cache before removing elements
        let result = self.map.insert(key.clone());

        let now = Instant::now();

        // remove any expired results
        while let Some(element) = self.list.pop_front() {
            if element.inserted + self.ttl > now {
                self.list.push_front(element);
                break;
            }
            self.map.remove(&element.key);
        }

        if result {
            self.list.push_back(Element { key, inserted: now });
        } else {
            let position = self
                .list
                .iter()
                .position(|e| e.key == key)
                .expect("Key is not in list");
            let mut element = self
                .list
                .remove(position)
                .expect("Position is not occupied");
            element.inserted = now;
            self.list.push_back(element);
        }
        result
    }

    /// Inserts a new element, without removing expired elements.
    ///
    /// If the key was not present this returns `true`. If the value was already present this
    /// returns `false`.
    pub fn raw_insert(&mut self, key: Key) -> bool {
        let result = self.map.insert(key.clone());
        if result {
            self.list.push_back(Element {
                key,
                inserted: Instant::now(),
            });
        }
        result
    }

    /// Removes a key from the cache without purging expired elements. Returns true if the key
    /// existed.
    pub fn raw_remove(&mut self, key: &Key) -> bool {
        if self.map.remove(key) {
            if let Some(position) = self.list.iter().position(|e| &e.key == key) {
                self.list.remove(position);
            }
            true
        } else {
            false
        }
    }

    /// Removes any expired elements from the cache.
    pub fn update(&mut self) {
        let now = Instant::now();
        // remove any expired results
        while let Some(element) = self.list.pop_front() {
            if element.inserted + self.ttl > now {
                self.list.push_front(element);
                break;
            }
            self.map.remove(&element.key);
        }
    }

    /// Returns true if the key is in the cache, purging expired elements first.
    pub fn contains(&mut self, key: &Key) -> bool {
        self.update();
        self.map.contains(key)
    }

    /// Returns true if the key is in the cache, without purging expired elements.
    pub fn raw_contains(&self, key: &Key) -> bool {
        self.map.contains(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
