//! Interning pool for abc (bytecode archive) file paths.
//!
//! Record tables never store path strings; they store small stable
//! [`ApEntityId`]s allocated by this pool. Merging two pools produces a
//! [`PoolRemap`] that the caller MUST apply to every id parsed against the
//! merged-in pool's id space — pool merge first, table merge second, always in
//! that order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ApError, Result};

/// A small stable integer identifying one abc file within a pool.
///
/// Allocated on first insertion, stable for the pool's lifetime, never reused:
/// pools are append-only and cleared only in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApEntityId(pub u32);

impl ApEntityId {
    /// Returns the raw numeric id.
    pub const fn value(self) -> u32 {
        self.0
    }
}

/// One interned pool entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbcFileEntry {
    /// Canonicalized bytecode-archive path, the stable cross-run key.
    pub normalized_desc: String,
}

/// Id translation produced by [`AbcFilePool::merge`].
///
/// Ids absent from the map resolve to themselves, so a remap from a merge that
/// deduplicated nothing new is a cheap identity.
#[derive(Debug, Default, Clone)]
pub struct PoolRemap {
    map: HashMap<ApEntityId, ApEntityId>,
}

impl PoolRemap {
    /// Translates an id from the merged-in pool's space into the receiver's.
    pub fn resolve(&self, id: ApEntityId) -> ApEntityId {
        self.map.get(&id).copied().unwrap_or(id)
    }

    /// Whether any id actually changes under this remap.
    pub fn is_identity(&self) -> bool {
        self.map.iter().all(|(from, to)| from == to)
    }

    fn insert(&mut self, from: ApEntityId, to: ApEntityId) {
        self.map.insert(from, to);
    }
}

/// Ordered, deduplicating collection of `(ApEntityId -> normalized path)`.
#[derive(Debug, Default, Clone)]
pub struct AbcFilePool {
    entries: BTreeMap<ApEntityId, AbcFileEntry>,
    by_name: HashMap<String, ApEntityId>,
    next_id: u32,
}

impl AbcFilePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a normalized path, returning the existing id when present.
    pub fn try_add(&mut self, normalized_desc: &str) -> ApEntityId {
        if let Some(&id) = self.by_name.get(normalized_desc) {
            return id;
        }
        let id = ApEntityId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            AbcFileEntry {
                normalized_desc: normalized_desc.to_owned(),
            },
        );
        self.by_name.insert(normalized_desc.to_owned(), id);
        id
    }

    /// Looks up an entry by id. Out-of-range or stale ids yield `None`,
    /// never a crash.
    pub fn get_entry(&self, id: ApEntityId) -> Option<&AbcFileEntry> {
        self.entries.get(&id)
    }

    /// Reverse lookup by normalized name.
    pub fn get_entry_id_by_normalized_name(&self, name: &str) -> Option<ApEntityId> {
        self.by_name.get(name).copied()
    }

    /// Number of interned entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ApEntityId, &AbcFileEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    /// Merges `other` into `self`, deduplicating by normalized name.
    ///
    /// Every id valid in `other` gets an entry in the returned remap pointing
    /// at the id now valid in `self`; names present in both pools resolve to
    /// the single pre-existing id. Record data parsed against `other`'s id
    /// space must be translated through the remap before it is merged.
    pub fn merge(&mut self, other: &AbcFilePool) -> PoolRemap {
        let mut remap = PoolRemap::default();
        for (other_id, entry) in other.iter() {
            let this_id = self.try_add(&entry.normalized_desc);
            remap.insert(other_id, this_id);
        }
        remap
    }

    /// Empties the pool.
    ///
    /// Only the owning decoder may call this; decoders holding the pool as
    /// external must leave it untouched (see `ProfileDecoder::clear`).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_name.clear();
        self.next_id = 0;
    }

    /// Serializes the pool as a section payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let flat: Vec<(u32, &str)> = self
            .entries
            .iter()
            .map(|(id, e)| (id.value(), e.normalized_desc.as_str()))
            .collect();
        bincode::serde::encode_to_vec(&flat, bincode::config::standard())
            .map_err(|e| ApError::Serialization(e.to_string()))
    }

    /// Rebuilds a pool from a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (flat, _): (Vec<(u32, String)>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ApError::Serialization(e.to_string()))?;
        let mut pool = Self::new();
        for (raw_id, name) in flat {
            let id = ApEntityId(raw_id);
            if pool.entries.contains_key(&id) || pool.by_name.contains_key(&name) {
                return Err(ApError::Format("Duplicate abc pool entry".into()));
            }
            pool.by_name.insert(name.clone(), id);
            pool.entries.insert(id, AbcFileEntry { normalized_desc: name });
            pool.next_id = pool.next_id.max(raw_id.saturating_add(1));
        }
        Ok(pool)
    }
}

/// A pool shared between decoders.
///
/// The decoder that created the pool owns it (`external_pool == false`) and is
/// the only one allowed to clear it; sharing decoders hold the same `Arc` with
/// the flag set and skip destructive operations.
pub type SharedAbcPool = Arc<RwLock<AbcFilePool>>;

/// Wraps a fresh pool for sharing.
pub fn new_shared_pool() -> SharedAbcPool {
    Arc::new(RwLock::new(AbcFilePool::new()))
}
