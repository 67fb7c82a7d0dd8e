//! The response cache.
//!
//! A bounded LRU over fully-assembled responses (pre-EDNS-echo),
//! keyed by (location, qtype, qclass, lowercased qname).  Entries
//! carry an absolute expiry; a lookup that finds an expired entry
//! evicts it.  Weighted answers only enter under a positive WRS
//! timeout, and the whole cache is purged on reload.

use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dns_store::LocationId;
use dns_types::protocol::types::{Message, Question};

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

/// What a response is cached under.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub location: LocationId,
    pub qtype: u16,
    pub qclass: u16,
    pub qname: Vec<u8>,
}

impl CacheKey {
    pub fn new(location: &LocationId, question: &Question) -> Self {
        Self {
            location: location.clone(),
            qtype: question.qtype.into(),
            qclass: question.qclass.into(),
            qname: question.name.octets.clone(),
        }
    }
}

/// A convenience wrapper around a `ResponseCache` which lets it be
/// shared between tasks.
///
/// Invoking `clone` on a `SharedResponseCache` gives a new instance
/// which refers to the same underlying cache.
#[derive(Debug, Clone)]
pub struct SharedResponseCache {
    cache: Arc<Mutex<ResponseCache>>,
}

impl SharedResponseCache {
    pub fn with_desired_size(desired_size: usize) -> Self {
        Self {
            cache: Arc::new(Mutex::new(ResponseCache::with_desired_size(desired_size))),
        }
    }

    /// Get an unexpired entry.  Expired entries are evicted on the
    /// way.
    pub fn get(&self, key: &CacheKey) -> Option<Message> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(key)
    }

    /// Insert an entry that expires `ttl` from now.  Zero-TTL entries
    /// are not inserted.
    pub fn insert(&self, key: CacheKey, message: Message, ttl: Duration) {
        if !ttl.is_zero() {
            self.cache
                .lock()
                .expect(MUTEX_POISON_MESSAGE)
                .insert(key, message, ttl);
        }
    }

    /// Drop everything: reloads call this so stale data never
    /// outlives the store it came from.
    pub fn purge(&self) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).purge();
    }

    /// Atomically clear expired entries and, if the cache has grown
    /// beyond its desired size, prune in LRU order.
    ///
    /// Returns `(has overflowed?, current size, num expired, num pruned)`.
    pub fn prune(&self) -> (bool, usize, usize, usize) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).prune()
    }
}

impl Default for SharedResponseCache {
    fn default() -> Self {
        Self::with_desired_size(4096)
    }
}

/// Caching for assembled responses.
///
/// You probably want to use `SharedResponseCache` instead.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    /// Cached responses.
    entries: HashMap<CacheKey, CachedResponse>,

    /// Priority queue of keys ordered by access time, for LRU
    /// pruning.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    access_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// Priority queue of keys ordered by expiry time.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    expiry_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// The desired maximum number of entries.
    desired_size: usize,
}

#[derive(Debug, Clone)]
struct CachedResponse {
    message: Message,
    expires: Instant,
}

impl ResponseCache {
    /// Panics:
    ///
    /// - If called with a desired_size of 0.
    pub fn with_desired_size(desired_size: usize) -> Self {
        if desired_size == 0 {
            panic!("cannot create a zero-size cache");
        }

        Self {
            entries: HashMap::with_capacity(desired_size / 2),
            access_priority: PriorityQueue::with_capacity(desired_size),
            expiry_priority: PriorityQueue::with_capacity(desired_size),
            desired_size,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Message> {
        let now = Instant::now();

        let entry = self.entries.get(key)?;
        if entry.expires <= now {
            self.remove(key);
            return None;
        }

        let message = entry.message.clone();
        self.access_priority.change_priority(key, Reverse(now));
        Some(message)
    }

    pub fn insert(&mut self, key: CacheKey, message: Message, ttl: Duration) {
        let now = Instant::now();
        let expires = now + ttl;

        if self
            .entries
            .insert(key.clone(), CachedResponse { message, expires })
            .is_some()
        {
            self.access_priority.change_priority(&key, Reverse(now));
            self.expiry_priority.change_priority(&key, Reverse(expires));
        } else {
            self.access_priority.push(key.clone(), Reverse(now));
            self.expiry_priority.push(key, Reverse(expires));
        }
    }

    pub fn purge(&mut self) {
        self.entries.clear();
        self.access_priority.clear();
        self.expiry_priority.clear();
    }

    pub fn prune(&mut self) -> (bool, usize, usize, usize) {
        let has_overflowed = self.entries.len() > self.desired_size;
        let num_expired = self.remove_expired();
        let mut num_pruned = 0;

        while self.entries.len() > self.desired_size {
            if let Some((key, _)) = self.access_priority.pop() {
                self.expiry_priority.remove(&key);
                self.entries.remove(&key);
                num_pruned += 1;
            } else {
                break;
            }
        }

        (has_overflowed, self.entries.len(), num_expired, num_pruned)
    }

    fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        while let Some((key, Reverse(expires))) = self.expiry_priority.pop() {
            if expires > now {
                self.expiry_priority.push(key, Reverse(expires));
                break;
            }
            self.entries.remove(&key);
            self.access_priority.remove(&key);
            removed += 1;
        }

        removed
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        self.access_priority.remove(key);
        self.expiry_priority.remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
