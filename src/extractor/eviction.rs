//! Capacity-bounded key registry.
//!
//! Each enabled key kind gets its own [`Registry`], sized by the host or
//! session capacity of the run. Entries are never expired by age: decay
//! already makes an idle accumulator read as near-empty. Memory is reclaimed
//! only when a new key arrives at a full registry, in which case exactly one
//! victim is chosen by the configured [`EvictionPolicy`] and removed before
//! the new key is inserted.
//!
//! Victims come from an ordered index kept next to the map, so finding one
//! costs `O(log n)` instead of a scan. Every rank is time-invariant and only
//! changes when its entry is updated:
//!
//! - `LeastWeight` ranks by [`Accumulator::retention`], which orders entries
//!   by the decayed weight of their slowest lambda at any common read time;
//! - `Lru` ranks by last update.
//!
//! Ties fall back to last update, then key text, so the same input always
//! evicts the same entries regardless of hash-map iteration order. Eviction
//! and insertion happen inside one `&mut self` call; a caller sharing the
//! registry across threads must put it behind a lock, which then covers both
//! steps.

use crate::extractor::config::EvictionPolicy;
use crate::extractor::stats::Accumulator;
use crate::extractor::types::KeyKind;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};

/// Position of one entry in the eviction order; smallest goes first.
#[derive(Debug, Clone)]
struct Rank {
    primary:   f64,
    last_seen: f64,
    key:       String,
}

/// `(primary, last_seen)` of `acc` under `policy`.
fn position(policy: EvictionPolicy, acc: &Accumulator) -> (f64, f64) {
    let last_seen = acc.last_seen().unwrap_or(f64::NEG_INFINITY);
    let primary = match policy {
        EvictionPolicy::LeastWeight => acc.retention(),
        EvictionPolicy::Lru => last_seen,
    };
    (primary, last_seen)
}

impl Rank {
    fn of(policy: EvictionPolicy, key: String, acc: &Accumulator) -> Self {
        let (primary, last_seen) = position(policy, acc);
        Self { primary, last_seen, key }
    }

    fn same_position(&self, primary: f64, last_seen: f64) -> bool {
        self.primary.total_cmp(&primary).is_eq() && self.last_seen.total_cmp(&last_seen).is_eq()
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .total_cmp(&other.primary)
            .then_with(|| self.last_seen.total_cmp(&other.last_seen))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Rank {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Rank {}

#[derive(Debug)]
struct Slot {
    acc:  Accumulator,
    rank: Rank,
}

pub struct Registry {
    kind:      KeyKind,
    capacity:  usize,
    policy:    EvictionPolicy,
    entries:   HashMap<String, Slot>,
    index:     BTreeSet<Rank>,
    evictions: u64,
}

impl Registry {
    /// Creates an empty registry. `capacity` must be positive; the config
    /// validation rejects zero for every enabled kind.
    pub fn new(kind: KeyKind, capacity: usize, policy: EvictionPolicy) -> Self {
        debug_assert!(capacity > 0, "registry capacity must be positive");
        Self {
            kind,
            capacity,
            policy,
            entries: HashMap::new(),
            index: BTreeSet::new(),
            evictions: 0,
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
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

    /// Total entries removed to make room since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn get(&self, key: &str) -> Option<&Accumulator> {
        self.entries.get(key).map(|slot| &slot.acc)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the accumulator for `key`, creating it with `make` on first
    /// sight. If the registry is full, the lowest-ranked entry is evicted
    /// first.
    ///
    /// The entry is re-ranked when the returned handle is dropped.
    pub fn get_or_create<F>(&mut self, key: &str, make: F) -> EntryMut<'_>
    where
        F: FnOnce() -> Accumulator,
    {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }

        let policy = self.policy;
        let slot = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let acc = make();
                let rank = Rank::of(policy, e.key().clone(), &acc);
                self.index.insert(rank.clone());
                e.insert(Slot { acc, rank })
            }
        };
        EntryMut { slot, index: &mut self.index, policy }
    }

    /// Removes the entry the policy ranks lowest. Returns its key.
    fn evict_one(&mut self) -> Option<String> {
        let victim = self.index.pop_first()?;
        self.entries.remove(&victim.key);
        self.evictions += 1;
        Some(victim.key)
    }

    /// Key of the entry that would be given up next, if any.
    pub fn select_victim(&self) -> Option<&str> {
        self.index.first().map(|rank| rank.key.as_str())
    }
}

/// Mutable handle to one registry entry. Dereferences to the
/// [`Accumulator`]; on drop the entry's eviction rank is refreshed.
pub struct EntryMut<'a> {
    slot:   &'a mut Slot,
    index:  &'a mut BTreeSet<Rank>,
    policy: EvictionPolicy,
}

impl Deref for EntryMut<'_> {
    type Target = Accumulator;

    fn deref(&self) -> &Accumulator {
        &self.slot.acc
    }
}

impl DerefMut for EntryMut<'_> {
    fn deref_mut(&mut self) -> &mut Accumulator {
        &mut self.slot.acc
    }
}

impl Drop for EntryMut<'_> {
    fn drop(&mut self) {
        let (primary, last_seen) = position(self.policy, &self.slot.acc);
        if self.slot.rank.same_position(primary, last_seen) {
            return;
        }

        self.index.remove(&self.slot.rank);
        let fresh = Rank { primary, last_seen, key: self.slot.rank.key.clone() };
        self.index.insert(fresh.clone());
        self.slot.rank = fresh;
    }
}
