//! Shared in-memory object cache
//!
//! A fixed-budget cache split into 16 independently locked shards. Each
//! shard owns a flat byte arena and a 4-way associative directory of
//! entries keyed by 16-byte MD5 digests. Cached items live back to back
//! in the arena; the entries form a doubly-linked list ordered by
//! offset (linked by index, never by pointer), which makes the arena a
//! ring the insertion window slides through. To make room, the window
//! walks over the entries in front of it and either drops them or moves
//! them behind itself, using a randomized least-frequently-used rule:
//! an entry survives if its hit count beats a threshold drawn uniformly
//! from [0, 2 x (average hit count + 1)), and every survivor's hit
//! count halves over time so old popularity decays.
//!
//! The design trades precision for cheap, bounded bookkeeping: no
//! global LRU list to maintain on every read, no per-item allocation,
//! and enumeration is deliberately unsupported.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Entries per directory group (associativity).
const GROUP_SIZE: usize = 4;

/// Key digest width.
const KEY_SIZE: usize = 16;

/// Arena offsets are aligned to this.
const ITEM_ALIGNMENT: u64 = 16;

/// Number of independently locked shards.
const CACHE_SEGMENTS: usize = 16;

/// Sentinel entry index.
const NO_INDEX: u32 = u32::MAX;

/// Sentinel offset marking an unused directory entry.
const NO_OFFSET: u64 = u64::MAX;

type CacheKey = [u8; KEY_SIZE];

fn align(value: u64) -> u64 {
    (value + ITEM_ALIGNMENT - 1) & !(ITEM_ALIGNMENT - 1)
}

#[derive(Clone, Copy)]
struct Entry {
    key: CacheKey,
    /// Position in the arena; `NO_OFFSET` marks the slot unused.
    offset: u64,
    size: u32,
    hit_count: u32,
    /// Next/previous entry index in offset order.
    next: u32,
    previous: u32,
}

impl Entry {
    const UNUSED: Entry = Entry {
        key: [0; KEY_SIZE],
        offset: NO_OFFSET,
        size: 0,
        hit_count: 0,
        next: NO_INDEX,
        previous: NO_INDEX,
    };

    fn is_used(&self) -> bool {
        self.offset != NO_OFFSET
    }
}

/// Aggregate usage counters, summed over all shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub used_entries: u64,
    pub data_used: u64,
    pub total_reads: u64,
    pub total_hits: u64,
    pub total_writes: u64,
}

struct Shard {
    group_count: u32,
    directory: Vec<Entry>,

    /// Entry with the lowest offset, head of the offset-ordered list.
    first: u32,
    /// Entry with the highest offset.
    last: u32,
    /// First entry behind the insertion window.
    next: u32,

    data: Vec<u8>,
    /// Start of the insertion window.
    current_data: u64,
    data_used: u64,
    used_entries: u64,

    /// Sum of all entries' hit counts; the eviction threshold derives
    /// its average from this.
    hit_count: u64,
    total_reads: u64,
    total_hits: u64,
    total_writes: u64,

    rng: SmallRng,
}

impl Shard {
    fn new(data_size: u64, group_count: u32, seed: u64) -> Self {
        Self {
            group_count,
            directory: vec![Entry::UNUSED; group_count as usize * GROUP_SIZE],
            first: NO_INDEX,
            last: NO_INDEX,
            next: NO_INDEX,
            data: vec![0; data_size as usize],
            current_data: 0,
            data_used: 0,
            used_entries: 0,
            hit_count: 0,
            total_reads: 0,
            total_hits: 0,
            total_writes: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn group_of(&self, key: &CacheKey) -> usize {
        // The shard was picked from the digest's first byte; use a
        // different part for the group so they don't correlate.
        let selector = u32::from_le_bytes([key[4], key[5], key[6], key[7]]);
        (selector % self.group_count) as usize * GROUP_SIZE
    }

    /// Remove an entry from the list and give its space up.
    fn drop_entry(&mut self, idx: u32) {
        let entry = self.directory[idx as usize];

        if self.first == idx {
            self.first = entry.next;
        }
        if self.last == idx {
            self.last = entry.previous;
        }
        // Keep the insertion window valid when its boundary entry goes.
        if self.next == idx {
            self.next = entry.next;
        }
        if entry.previous != NO_INDEX {
            self.directory[entry.previous as usize].next = entry.next;
        }
        if entry.next != NO_INDEX {
            self.directory[entry.next as usize].previous = entry.previous;
        }

        self.data_used -= u64::from(entry.size);
        self.used_entries -= 1;
        self.hit_count -= u64::from(entry.hit_count);
        self.directory[idx as usize] = Entry {
            key: entry.key,
            ..Entry::UNUSED
        };
    }

    /// Link a freshly filled entry into the offset-ordered list, right
    /// before the window boundary (its offset is the window start).
    fn insert_entry(&mut self, idx: u32) {
        let size = self.directory[idx as usize].size;
        if self.next == NO_INDEX {
            // Append at the end of the list.
            let previous = self.last;
            self.directory[idx as usize].previous = previous;
            self.directory[idx as usize].next = NO_INDEX;
            if previous == NO_INDEX {
                self.first = idx;
            } else {
                self.directory[previous as usize].next = idx;
            }
            self.last = idx;
        } else {
            let next = self.next;
            let previous = self.directory[next as usize].previous;
            self.directory[idx as usize].previous = previous;
            self.directory[idx as usize].next = next;
            if previous == NO_INDEX {
                self.first = idx;
            } else {
                self.directory[previous as usize].next = idx;
            }
            self.directory[next as usize].previous = idx;
        }
        self.used_entries += 1;
        self.data_used += u64::from(size);
    }

    /// Move the window-boundary entry to the window start, keeping the
    /// list (still offset-ordered) untouched, and advance the boundary
    /// past it. Surviving a scan still costs the entry half its hits,
    /// so even pinned-hot items decay over time.
    fn move_entry(&mut self, idx: u32) {
        let entry = self.directory[idx as usize];
        let (from, to) = (entry.offset as usize, self.current_data as usize);
        // May overlap when the window is smaller than the entry;
        // copy_within has memmove semantics.
        self.data.copy_within(from..from + entry.size as usize, to);
        self.directory[idx as usize].offset = self.current_data;
        self.current_data += align(u64::from(entry.size));
        self.next = entry.next;
        self.let_entry_age(idx);
    }

    /// Halve an entry's hit count so past popularity decays.
    fn let_entry_age(&mut self, idx: u32) {
        let aged = self.directory[idx as usize].hit_count / 2;
        self.hit_count -= u64::from(self.directory[idx as usize].hit_count - aged);
        self.directory[idx as usize].hit_count = aged;
    }

    /// Scan `key`'s directory group for its entry.
    fn lookup_entry(&self, key: &CacheKey) -> Option<u32> {
        let group = self.group_of(key);
        (group..group + GROUP_SIZE)
            .find(|&i| {
                let entry = &self.directory[i];
                entry.is_used() && entry.key == *key
            })
            .map(|i| i as u32)
    }

    /// Pick the slot a new entry for `key` will occupy: an unused group
    /// member, or the group's least-hit entry after dropping it (aging
    /// the survivors so stale popularity cannot pin a slot).
    fn allocate_slot(&mut self, key: &CacheKey) -> u32 {
        let group = self.group_of(key);
        let empty = (0..GROUP_SIZE).find(|&i| !self.directory[group + i].is_used());
        let slot = match empty {
            Some(i) => (group + i) as u32,
            None => {
                let victim = (0..GROUP_SIZE)
                    .min_by_key(|&i| self.directory[group + i].hit_count)
                    .unwrap_or(0);
                for i in 0..GROUP_SIZE {
                    if i != victim {
                        self.let_entry_age((group + i) as u32);
                    }
                }
                self.drop_entry((group + victim) as u32);
                (group + victim) as u32
            }
        };
        self.directory[slot as usize].key = *key;
        slot
    }

    /// Grow the insertion window until `size` bytes fit, dropping or
    /// relocating the entries in front of it. Gives up once the dropped
    /// volume exceeds half the requested size, or after a full
    /// fruitless pass over the ring.
    fn ensure_data_insertable(&mut self, size: u64) -> bool {
        let mut drop_size = 0u64;
        let mut wrapped = false;

        loop {
            // First offset behind the insertion window.
            let end = if self.next == NO_INDEX {
                self.data.len() as u64
            } else {
                self.directory[self.next as usize].offset
            };
            if end >= self.current_data + size {
                return true;
            }

            // Don't be too eager: of the larger items, accept only
            // those whose cost stays below twice their size.
            if 2 * drop_size > size {
                return false;
            }

            if self.next == NO_INDEX {
                // Reached the end of the arena; restart at the front.
                if wrapped {
                    return false;
                }
                wrapped = true;
                self.current_data = 0;
                self.next = self.first;
                continue;
            }

            let idx = self.next;
            let entry = self.directory[idx as usize];

            // Keep very small entries as long as they are a minority;
            // they are probably header-like and important.
            if u64::from(entry.size) * self.used_entries < self.data_used / 8 {
                self.move_entry(idx);
                continue;
            }

            let average_hits = if self.used_entries == 0 {
                0
            } else {
                self.hit_count / self.used_entries
            };
            let threshold = (average_hits + 1) * u64::from(self.rng.gen_range(0u32..4096)) / 2048;
            if u64::from(entry.hit_count) >= threshold {
                self.move_entry(idx);
            } else {
                drop_size += u64::from(entry.size);
                self.drop_entry(idx);
            }
        }
    }

    fn is_cachable(&self, size: usize) -> bool {
        size < self.data.len() / 4 && size <= u32::MAX as usize
    }

    fn set(&mut self, key: &CacheKey, data: &[u8]) {
        // If the key is already cached, the old item always vanishes,
        // even when the new one does not fit.
        if let Some(idx) = self.lookup_entry(key) {
            self.drop_entry(idx);
        }

        // Reserve the aligned footprint so the next insertion cannot
        // overlap this entry's tail padding.
        let aligned = align(data.len() as u64);
        if !self.is_cachable(data.len()) || !self.ensure_data_insertable(aligned) {
            return;
        }

        let idx = self.allocate_slot(key);
        let offset = self.current_data;
        self.directory[idx as usize].offset = offset;
        self.directory[idx as usize].size = data.len() as u32;
        self.directory[idx as usize].hit_count = 0;
        self.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        self.insert_entry(idx);
        self.current_data += align(data.len() as u64);
        self.total_writes += 1;
    }

    fn get(&mut self, key: &CacheKey) -> Option<Vec<u8>> {
        self.total_reads += 1;
        let idx = self.lookup_entry(key)?;
        let entry = &mut self.directory[idx as usize];
        entry.hit_count += 1;
        let (offset, size) = (entry.offset as usize, entry.size as usize);
        self.hit_count += 1;
        self.total_hits += 1;
        Some(self.data[offset..offset + size].to_vec())
    }
}

/// The shared cache. Budgets are fixed at construction; keys are MD5
/// digests produced by `CacheView`.
pub struct MemBufferCache {
    shards: Vec<Mutex<Shard>>,
}

impl MemBufferCache {
    /// `total_size` is the data budget in bytes, `directory_size` the
    /// budget for entry bookkeeping; both are split evenly over the
    /// shards and clamped to workable minimums.
    pub fn new(total_size: usize, directory_size: usize) -> Self {
        Self::with_seed(total_size, directory_size, 0x6d656d62)
    }

    /// Like `new`, with a deterministic eviction RNG seed.
    pub fn with_seed(total_size: usize, directory_size: usize, seed: u64) -> Self {
        let data_per_shard = align((total_size / CACHE_SEGMENTS).max(1024) as u64);
        let entry_size = std::mem::size_of::<Entry>();
        let groups_per_shard =
            ((directory_size / CACHE_SEGMENTS) / (GROUP_SIZE * entry_size)).max(1) as u32;

        let shards = (0..CACHE_SEGMENTS)
            .map(|i| {
                Mutex::new(Shard::new(
                    data_per_shard,
                    groups_per_shard,
                    seed.wrapping_add(i as u64),
                ))
            })
            .collect();
        Self { shards }
    }

    fn shard_of(&self, key: &CacheKey) -> &Mutex<Shard> {
        &self.shards[key[0] as usize % self.shards.len()]
    }

    fn set_raw(&self, key: &CacheKey, data: &[u8]) {
        self.shard_of(key)
            .lock()
            .expect("cache shard lock poisoned")
            .set(key, data);
    }

    /// Full copy out under the shard lock; deserialization happens
    /// outside it.
    fn get_raw(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.shard_of(key)
            .lock()
            .expect("cache shard lock poisoned")
            .get(key)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for shard in &self.shards {
            let shard = shard.lock().expect("cache shard lock poisoned");
            stats.used_entries += shard.used_entries;
            stats.data_used += shard.data_used;
            stats.total_reads += shard.total_reads;
            stats.total_hits += shard.total_hits;
            stats.total_writes += shard.total_writes;
        }
        stats
    }
}

/// A typed, namespaced front end to a shared `MemBufferCache`.
///
/// Values are bincode-serialized before the shard lock is taken and
/// deserialized after it is released, so the lock only covers byte
/// copies. Keys are digested together with the view's namespace, so
/// views never collide. There is no way to enumerate a view's content.
pub struct CacheView<T> {
    cache: Arc<MemBufferCache>,
    prefix: CacheKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CacheView<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            prefix: self.prefix,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> CacheView<T> {
    pub fn new(cache: Arc<MemBufferCache>, namespace: &str) -> Self {
        Self {
            cache,
            prefix: Md5::digest(namespace.as_bytes()).into(),
            _marker: PhantomData,
        }
    }

    fn digest(&self, key: &[u8]) -> CacheKey {
        let mut hasher = Md5::new();
        hasher.update(self.prefix);
        hasher.update(key);
        hasher.finalize().into()
    }

    pub fn get(&self, key: &[u8]) -> Option<T> {
        let data = self.cache.get_raw(&self.digest(key))?;
        match bincode::deserialize(&data) {
            Ok(value) => Some(value),
            Err(err) => {
                // A miss is always a legal answer; don't let a stale or
                // incompatible encoding take the caller down.
                tracing::warn!(error = %err, "discarding undeserializable cache entry");
                None
            }
        }
    }

    pub fn set(&self, key: &[u8], value: &T) {
        match bincode::serialize(value) {
            Ok(data) => self.cache.set_raw(&self.digest(key), &data),
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize value for caching");
            }
        }
    }
}
