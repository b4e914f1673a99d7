//! Bounded cache of decoded chunk payloads with LRU eviction.
//!
//! The [`ChunkCache`] is keyed by linear chunk index and bounded both by a
//! slot count and by a byte budget. Recency is a logical tick incremented
//! on every access, so eviction order is fully deterministic: the entry
//! with the smallest `(last_access, linear_index)` goes first.
//!
//! Entries written through [`ChunkCache::get_chunk_mut`] are marked dirty.
//! A dirty entry that gets evicted is parked and handed back by
//! [`ChunkCache::take_evicted`] so the owner can encode and persist it.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::FormatError;

/// Default number of cache slots.
pub const DEFAULT_SLOT_COUNT: usize = 521;

/// Default byte budget for decoded chunk payloads (1 MiB).
pub const DEFAULT_BYTE_BUDGET: usize = 1024 * 1024;

/// Upper bound on configurable slots.
pub const MAX_SLOT_COUNT: usize = 1 << 24;

/// Cache sizing. Built through [`ChunkCacheConfig::new`] (or deserialized,
/// which runs the same validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCacheConfig")]
pub struct ChunkCacheConfig {
    slot_count: usize,
    byte_budget: usize,
}

#[derive(Deserialize)]
struct RawCacheConfig {
    #[serde(default = "default_slot_count")]
    slot_count: usize,
    #[serde(default = "default_byte_budget")]
    byte_budget: usize,
}

fn default_slot_count() -> usize {
    DEFAULT_SLOT_COUNT
}

fn default_byte_budget() -> usize {
    DEFAULT_BYTE_BUDGET
}

impl TryFrom<RawCacheConfig> for ChunkCacheConfig {
    type Error = FormatError;

    fn try_from(raw: RawCacheConfig) -> Result<Self, Self::Error> {
        ChunkCacheConfig::new(raw.slot_count, raw.byte_budget)
    }
}

impl ChunkCacheConfig {
    /// Validate and build a configuration. `slot_count == 0` disables
    /// caching.
    pub fn new(slot_count: usize, byte_budget: usize) -> Result<Self, FormatError> {
        if slot_count > MAX_SLOT_COUNT {
            return Err(FormatError::InvalidCacheConfig(format!(
                "slot count {slot_count} exceeds the maximum of {MAX_SLOT_COUNT}"
            )));
        }
        if byte_budget > isize::MAX as usize {
            return Err(FormatError::InvalidCacheConfig(format!(
                "byte budget {byte_budget} is not addressable"
            )));
        }
        Ok(Self {
            slot_count,
            byte_budget,
        })
    }

    /// A configuration that never retains anything.
    pub fn disabled() -> Self {
        Self {
            slot_count: 0,
            byte_budget: 0,
        }
    }

    /// Maximum resident chunk count.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Maximum resident payload bytes.
    pub fn byte_budget(&self) -> usize {
        self.byte_budget
    }
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            byte_budget: DEFAULT_BYTE_BUDGET,
        }
    }
}

/// Counters describing cache behavior since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Loads returned to the caller without being retained.
    pub bypassed: u64,
}

/// A dirty payload pushed out of the cache before it was flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedChunk {
    pub linear_index: u64,
    pub data: Vec<u8>,
}

/// Mutable access to a chunk payload.
#[derive(Debug)]
pub enum ChunkSlot<'a> {
    /// The payload lives in the cache and is now marked dirty.
    Resident(&'a mut [u8]),
    /// The payload could not be retained; the caller owns it and must
    /// persist it itself.
    Bypassed(Vec<u8>),
}

struct CacheEntry {
    data: Vec<u8>,
    last_access: u64,
    dirty: bool,
}

/// Per-dataset chunk cache.
pub struct ChunkCache {
    config: ChunkCacheConfig,
    entries: HashMap<u64, CacheEntry>,
    consumed: usize,
    tick: u64,
    evicted: Vec<EvictedChunk>,
    stats: CacheStats,
}

enum Fetched<'a> {
    Resident(&'a mut CacheEntry),
    Bypassed(Vec<u8>),
}

impl ChunkCache {
    /// Create an empty cache.
    pub fn new(config: ChunkCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::with_capacity(config.slot_count.min(64)),
            consumed: 0,
            tick: 0,
            evicted: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> ChunkCacheConfig {
        self.config
    }

    /// Return the decoded payload of chunk `linear`, invoking `loader` on a
    /// miss. A failed load leaves the cache untouched.
    ///
    /// A payload larger than the byte budget (or any payload when the cache
    /// is disabled) is returned owned and not retained; every such access
    /// re-invokes `loader`.
    pub fn get_chunk<F>(&mut self, linear: u64, loader: F) -> Result<Cow<'_, [u8]>, FormatError>
    where
        F: FnOnce() -> Result<Vec<u8>, FormatError>,
    {
        Ok(match self.fetch(linear, loader)? {
            Fetched::Resident(entry) => Cow::Borrowed(entry.data.as_slice()),
            Fetched::Bypassed(data) => Cow::Owned(data),
        })
    }

    /// Like [`ChunkCache::get_chunk`], but for modification. A resident
    /// payload is marked dirty.
    pub fn get_chunk_mut<F>(&mut self, linear: u64, loader: F) -> Result<ChunkSlot<'_>, FormatError>
    where
        F: FnOnce() -> Result<Vec<u8>, FormatError>,
    {
        Ok(match self.fetch(linear, loader)? {
            Fetched::Resident(entry) => {
                entry.dirty = true;
                ChunkSlot::Resident(entry.data.as_mut_slice())
            }
            Fetched::Bypassed(data) => ChunkSlot::Bypassed(data),
        })
    }

    fn fetch<F>(&mut self, linear: u64, loader: F) -> Result<Fetched<'_>, FormatError>
    where
        F: FnOnce() -> Result<Vec<u8>, FormatError>,
    {
        self.tick += 1;
        let tick = self.tick;

        let loaded = if self.entries.contains_key(&linear) {
            self.stats.hits += 1;
            trace!(chunk = linear, "chunk cache hit");
            None
        } else if let Some(pos) = self.evicted.iter().position(|e| e.linear_index == linear) {
            // a parked payload already fit once; take it back as dirty
            self.stats.misses += 1;
            trace!(chunk = linear, "reclaiming parked chunk");
            let data = self.evicted.remove(pos).data;
            self.make_room(data.len());
            self.consumed += data.len();
            Some((data, true))
        } else {
            self.stats.misses += 1;
            trace!(chunk = linear, "chunk cache miss");
            let data = loader()?;
            if self.config.slot_count == 0 || data.len() > self.config.byte_budget {
                self.stats.bypassed += 1;
                return Ok(Fetched::Bypassed(data));
            }
            self.make_room(data.len());
            self.consumed += data.len();
            Some((data, false))
        };

        let entry = self.entries.entry(linear).or_insert_with(move || {
            let (data, dirty) = loaded.unwrap_or_default();
            CacheEntry {
                data,
                last_access: tick,
                dirty,
            }
        });
        entry.last_access = tick;
        Ok(Fetched::Resident(entry))
    }

    fn make_room(&mut self, incoming: usize) {
        while !self.entries.is_empty()
            && (self.entries.len() >= self.config.slot_count
                || self.config.byte_budget - self.consumed < incoming)
        {
            self.evict_lru();
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(&linear, e)| (e.last_access, linear))
            .map(|(&linear, _)| linear);
        let Some(linear) = victim else { return };
        if let Some(entry) = self.entries.remove(&linear) {
            self.consumed -= entry.data.len();
            self.stats.evictions += 1;
            debug!(chunk = linear, dirty = entry.dirty, bytes = entry.data.len(), "evicting chunk");
            if entry.dirty {
                self.evicted.push(EvictedChunk {
                    linear_index: linear,
                    data: entry.data,
                });
            }
        }
    }

    /// Dirty payloads evicted since the last call.
    pub fn take_evicted(&mut self) -> Vec<EvictedChunk> {
        std::mem::take(&mut self.evicted)
    }

    /// Park payloads the owner failed to persist, ahead of anything evicted
    /// since they were taken.
    pub fn restore_evicted(&mut self, chunks: Vec<EvictedChunk>) {
        if chunks.is_empty() {
            return;
        }
        let newer = std::mem::replace(&mut self.evicted, chunks);
        self.evicted.extend(newer);
    }

    /// Whether chunk `linear` is resident or parked after a dirty eviction.
    pub fn holds(&self, linear: u64) -> bool {
        self.entries.contains_key(&linear) || self.evicted.iter().any(|e| e.linear_index == linear)
    }

    /// Borrow a resident payload without touching its recency.
    pub fn peek(&self, linear: u64) -> Option<&[u8]> {
        self.entries.get(&linear).map(|e| e.data.as_slice())
    }

    /// Whether chunk `linear` is resident.
    pub fn contains(&self, linear: u64) -> bool {
        self.entries.contains_key(&linear)
    }

    /// Whether chunk `linear` is resident and modified since its last flush.
    pub fn is_dirty(&self, linear: u64) -> bool {
        self.entries.get(&linear).is_some_and(|e| e.dirty)
    }

    /// Linear indices of dirty resident entries, ascending.
    pub fn dirty_indices(&self) -> Vec<u64> {
        let mut dirty: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(&k, _)| k)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    /// Number of dirty chunks, resident or parked after eviction.
    pub fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count() + self.evicted.len()
    }

    /// Mark a resident entry as persisted.
    pub fn mark_clean(&mut self, linear: u64) {
        if let Some(entry) = self.entries.get_mut(&linear) {
            entry.dirty = false;
        }
    }

    /// Linear indices of resident entries, ascending.
    pub fn resident_indices(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of resident payload sizes.
    pub fn consumed_bytes(&self) -> usize {
        self.consumed
    }

    /// Access counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("config", &self.config)
            .field("resident", &self.entries.len())
            .field("consumed", &self.consumed)
            .field("stats", &self.stats)
            .finish()
    }
}
