//! Bounded, Expiring Key-Value Store
//!
//! The key space is one `HashMap` owned by the event-loop thread; nothing
//! here is `Send`, shared, or locked. Expiration is two-pronged:
//!
//! 1. **Lazy**: `get` checks the deadline on access and removes a dead key
//!    before reporting absence.
//! 2. **Active**: `sweep_expired` samples a bounded batch of
//!    expiry-carrying keys so that never-touched keys are still reclaimed.
//!    The ticker re-invokes it while the expired fraction stays high.
//!
//! Capacity is enforced on insertion: a net-new key at `keysLimit` evicts
//! one resident key first. Overwrites never evict, even at capacity.

use crate::storage::eviction::EvictionPolicy;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Deadline sentinel for keys that never expire.
pub const NO_EXPIRY: i64 = -1;

/// Keys examined per active-expiration sweep.
pub const SWEEP_SAMPLE_SIZE: usize = 20;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A stored value. Currently only byte strings exist; the tag leaves room
/// for further kinds without touching the store or codec call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
}

impl Value {
    /// Payload bytes of a string value.
    pub fn as_payload(&self) -> &Bytes {
        match self {
            Value::String(b) => b,
        }
    }
}

/// One resident value with its expiration deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Absolute wall-clock deadline in ms since the epoch; [`NO_EXPIRY`]
    /// means immortal.
    pub expires_at_ms: i64,
    /// Monotonic access stamp maintained by the store, for LRU.
    last_access: u64,
}

impl Entry {
    /// An immortal entry.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at_ms: NO_EXPIRY,
            last_access: 0,
        }
    }

    /// An entry that expires `ttl_ms` from now. A non-positive TTL yields
    /// an immortal entry, matching the write path's treatment of `EX 0`.
    pub fn expiring(value: Value, ttl_ms: i64) -> Self {
        let expires_at_ms = if ttl_ms > 0 {
            now_ms() + ttl_ms
        } else {
            NO_EXPIRY
        };
        Self {
            value,
            expires_at_ms,
            last_access: 0,
        }
    }

    /// Whether the deadline has passed at `now`. A deadline exactly equal
    /// to now counts as expired.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at_ms != NO_EXPIRY && self.expires_at_ms <= now
    }
}

/// The process-wide key space.
///
/// Constructed once at startup and handed to the server as an owned
/// handle; all access happens from the loop thread.
///
/// # Example
///
/// ```
/// use emberkv::storage::{Entry, EvictionPolicy, Store, Value};
/// use bytes::Bytes;
///
/// let mut store = Store::new(1000, EvictionPolicy::SimpleFirst);
/// store.put(Bytes::from("name"), Entry::new(Value::String(Bytes::from("ember"))));
/// assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("ember")));
/// ```
#[derive(Debug)]
pub struct Store {
    data: HashMap<Bytes, Entry>,
    keys_limit: usize,
    policy: EvictionPolicy,
    /// Bumped on every get and put; stamps entries for LRU.
    access_clock: u64,
}

impl Store {
    pub fn new(keys_limit: usize, policy: EvictionPolicy) -> Self {
        Self {
            data: HashMap::new(),
            keys_limit,
            policy,
            access_clock: 0,
        }
    }

    /// Inserts or overwrites `key`. A net-new key at capacity evicts one
    /// resident key first; overwrites never evict.
    pub fn put(&mut self, key: Bytes, mut entry: Entry) {
        if self.data.len() >= self.keys_limit && !self.data.contains_key(&key) {
            debug!(
                size = self.data.len(),
                limit = self.keys_limit,
                policy = %self.policy,
                "Key space at capacity, evicting"
            );
            self.evict_one();
        }

        self.access_clock += 1;
        entry.last_access = self.access_clock;
        self.data.insert(key, entry);
    }

    /// Looks up `key`, removing it first if its deadline has passed.
    /// A hit refreshes the key's access stamp.
    pub fn get(&mut self, key: &Bytes) -> Option<Bytes> {
        self.live_entry(key)
            .map(|entry| entry.value.as_payload().clone())
    }

    /// Like `get`, but exposes the whole entry (TTL queries need the
    /// deadline, not just the payload).
    pub fn live_entry(&mut self, key: &Bytes) -> Option<&Entry> {
        let now = now_ms();

        let expired = match self.data.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => return None,
        };

        if expired {
            trace!(key = ?key, "Lazily removing expired key");
            self.data.remove(key);
            return None;
        }

        self.access_clock += 1;
        let clock = self.access_clock;
        self.data.get_mut(key).map(|entry| {
            entry.last_access = clock;
            &*entry
        })
    }

    /// Removes `key`. Expired-but-still-resident keys count as removed.
    pub fn del(&mut self, key: &Bytes) -> bool {
        self.data.remove(key).is_some()
    }

    /// Sets the expiration deadline of a live key. Returns false when the
    /// key is absent or already past its deadline.
    pub fn set_expiry(&mut self, key: &Bytes, deadline_ms: i64) -> bool {
        if self.live_entry(key).is_none() {
            return false;
        }
        match self.data.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = deadline_ms;
                true
            }
            None => false,
        }
    }

    /// One bounded active-expiration pass.
    ///
    /// Samples up to [`SWEEP_SAMPLE_SIZE`] keys that carry a deadline,
    /// removes the ones already past it, and returns expired/sampled so
    /// the ticker can decide whether to go again. Returns 0.0 when no
    /// deadline-carrying key was sampled.
    pub fn sweep_expired(&mut self) -> f64 {
        let now = now_ms();
        let mut sampled = 0usize;
        let mut dead: Vec<Bytes> = Vec::new();

        for (key, entry) in self.data.iter() {
            if entry.expires_at_ms == NO_EXPIRY {
                continue;
            }
            sampled += 1;
            if entry.is_expired_at(now) {
                dead.push(key.clone());
            }
            if sampled == SWEEP_SAMPLE_SIZE {
                break;
            }
        }

        for key in &dead {
            self.data.remove(key);
        }

        if !dead.is_empty() {
            debug!(
                expired = dead.len(),
                sampled,
                remaining = self.data.len(),
                "Swept expired keys"
            );
        }

        if sampled == 0 {
            0.0
        } else {
            dead.len() as f64 / sampled as f64
        }
    }

    /// Removes exactly one key chosen by the configured policy. A no-op on
    /// an empty key space.
    pub fn evict_one(&mut self) {
        let victim = match self.policy {
            EvictionPolicy::SimpleFirst => self.data.keys().next().cloned(),
            EvictionPolicy::Lru => self
                .data
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone()),
            EvictionPolicy::Random => {
                use rand::seq::IteratorRandom;
                let mut rng = rand::thread_rng();
                self.data.keys().choose(&mut rng).cloned()
            }
        };

        if let Some(key) = victim {
            trace!(key = ?key, policy = %self.policy, "Evicted");
            self.data.remove(&key);
        }
    }

    /// Number of physically resident keys (expired stragglers included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys_limit(&self) -> usize {
        self.keys_limit
    }
}
