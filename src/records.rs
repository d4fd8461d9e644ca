//! The profile payload tables: per-bytecode-file checksums, per-record method
//! tables, hidden-class transition trees and prototype-transition pools.
//!
//! Table payloads are bincode-encoded and live inside sections described by
//! the file header. All ids inside a payload are relative to the abc pool the
//! payload was parsed against; merging tables from another pool's id space
//! requires the [`PoolRemap`] produced by the pool merge.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ApError, Result};
use crate::pool::{ApEntityId, PoolRemap};
use crate::types::{MethodId, ProfileType};

/// Per-bytecode-file checksum records.
///
/// Used to validate a loaded profile against the bytecode actually running:
/// a profile sampled from different bytecode is stale and must be ignored,
/// not trusted.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PandaFileInfos {
    checksums: BTreeSet<u32>,
}

impl PandaFileInfos {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the checksum of one bytecode file.
    pub fn add(&mut self, checksum: u32) {
        self.checksums.insert(checksum);
    }

    /// Whether a runtime bytecode checksum was seen by the sampling run.
    pub fn sample(&self, checksum: u32) -> bool {
        self.checksums.contains(&checksum)
    }

    /// Number of recorded files.
    pub fn len(&self) -> usize {
        self.checksums.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.checksums.is_empty()
    }

    /// Iterates recorded checksums in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.checksums.iter().copied()
    }

    /// Union merge with another table.
    pub fn merge(&mut self, other: &PandaFileInfos) {
        self.checksums.extend(other.checksums.iter().copied());
    }

    /// Empties the table.
    pub fn clear(&mut self) {
        self.checksums.clear();
    }

    /// Serializes the table as a section payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ApError::Serialization(e.to_string()))
    }

    /// Rebuilds the table from a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(infos, _)| infos)
            .map_err(|e| ApError::Serialization(e.to_string()))
    }
}

/// One edge of a hidden-class transition tree: adding `key` to the shape
/// `from` produced the shape `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HClassTransition {
    /// Shape before the property addition.
    pub from: ProfileType,
    /// Property key that triggered the transition.
    pub key: String,
    /// Shape after the property addition.
    pub to: ProfileType,
}

/// A hidden-class transition tree rooted at one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HClassTreeDesc {
    /// The root shape all transitions in this tree descend from.
    pub root: ProfileType,
    /// Observed transitions, deduplicated.
    pub transitions: Vec<HClassTransition>,
}

impl HClassTreeDesc {
    /// Creates an empty tree for a root shape.
    pub fn new(root: ProfileType) -> Self {
        Self {
            root,
            transitions: Vec::new(),
        }
    }

    /// Adds a transition edge unless an identical edge is already recorded.
    pub fn add_transition(&mut self, transition: HClassTransition) {
        if !self.transitions.contains(&transition) {
            self.transitions.push(transition);
        }
    }

    fn remap_abc_ids(&mut self, remap: &PoolRemap) {
        self.root.remap_abc_id(remap);
        for t in &mut self.transitions {
            t.from.remap_abc_id(remap);
            t.to.remap_abc_id(remap);
        }
    }

    fn merge(&mut self, other: &HClassTreeDesc) {
        for t in &other.transitions {
            self.add_transition(t.clone());
        }
    }
}

/// One observed prototype transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoTransition {
    /// Prototype shape before the swap.
    pub from: ProfileType,
    /// Prototype shape after the swap.
    pub to: ProfileType,
}

/// Sample data for one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodProfile {
    /// The method's id within its abc file.
    pub method_id: MethodId,
    /// Source-level method name, for diagnostics and text export.
    pub name: String,
    /// Content checksum of the method's bytecode, meaningful only when the
    /// header carries the `METHOD_CHECKSUM` capability.
    pub checksum: u32,
    /// How many samples landed in this method.
    pub sample_count: u32,
    /// Dominant observed type at the method's hottest site.
    pub type_info: ProfileType,
}

impl MethodProfile {
    fn merge(&mut self, other: &MethodProfile) {
        self.sample_count = self.sample_count.saturating_add(other.sample_count);
        if self.type_info.is_none() {
            self.type_info = other.type_info;
        }
        if self.name.is_empty() {
            self.name = other.name.clone();
        }
    }
}

/// Identifies one source record: which abc file it lives in and its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Owning abc file.
    pub abc_id: ApEntityId,
    /// Record (module/class) name inside that file.
    pub record_name: String,
}

impl RecordKey {
    /// Builds a key.
    pub fn new(abc_id: ApEntityId, record_name: &str) -> Self {
        Self {
            abc_id,
            record_name: record_name.to_owned(),
        }
    }
}

/// Everything sampled for one record.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordProfile {
    /// Method table keyed by method id.
    pub methods: BTreeMap<MethodId, MethodProfile>,
    /// Hidden-class transition trees rooted in this record.
    pub hclass_trees: Vec<HClassTreeDesc>,
    /// Prototype-transition pool.
    pub proto_transitions: Vec<ProtoTransition>,
}

impl RecordProfile {
    fn remap_abc_ids(&mut self, remap: &PoolRemap) {
        for method in self.methods.values_mut() {
            method.type_info.remap_abc_id(remap);
        }
        for tree in &mut self.hclass_trees {
            tree.remap_abc_ids(remap);
        }
        for proto in &mut self.proto_transitions {
            proto.from.remap_abc_id(remap);
            proto.to.remap_abc_id(remap);
        }
    }

    fn merge(&mut self, other: &RecordProfile) {
        for (id, method) in &other.methods {
            match self.methods.get_mut(id) {
                Some(existing) => existing.merge(method),
                None => {
                    self.methods.insert(*id, method.clone());
                }
            }
        }
        for tree in &other.hclass_trees {
            match self.hclass_trees.iter_mut().find(|t| t.root == tree.root) {
                Some(existing) => existing.merge(tree),
                None => self.hclass_trees.push(tree.clone()),
            }
        }
        for proto in &other.proto_transitions {
            if !self.proto_transitions.contains(proto) {
                self.proto_transitions.push(proto.clone());
            }
        }
    }
}

/// The record tables: `(abc id, record name) -> record profile`.
///
/// [`RecordSimpleInfos`] and [`RecordDetailInfos`] are thin views over this
/// core; both must stay pool-remap-aware on merge.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInfos {
    records: BTreeMap<RecordKey, RecordProfile>,
}

impl RecordInfos {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges sample data for one method.
    pub fn update(&mut self, key: &RecordKey, method: MethodProfile) {
        let record = self.records.entry(key.clone()).or_default();
        match record.methods.get_mut(&method.method_id) {
            Some(existing) => existing.merge(&method),
            None => {
                record.methods.insert(method.method_id, method);
            }
        }
    }

    /// Adds a hidden-class transition tree to a record.
    pub fn add_hclass_tree(&mut self, key: &RecordKey, tree: HClassTreeDesc) {
        let record = self.records.entry(key.clone()).or_default();
        match record.hclass_trees.iter_mut().find(|t| t.root == tree.root) {
            Some(existing) => existing.merge(&tree),
            None => record.hclass_trees.push(tree),
        }
    }

    /// Adds a prototype transition to a record.
    pub fn add_proto_transition(&mut self, key: &RecordKey, proto: ProtoTransition) {
        let record = self.records.entry(key.clone()).or_default();
        if !record.proto_transitions.contains(&proto) {
            record.proto_transitions.push(proto);
        }
    }

    /// Looks up one record.
    pub fn get(&self, key: &RecordKey) -> Option<&RecordProfile> {
        self.records.get(key)
    }

    /// Looks up one method profile.
    pub fn get_method(&self, key: &RecordKey, method_id: MethodId) -> Option<&MethodProfile> {
        self.records.get(key).and_then(|r| r.methods.get(&method_id))
    }

    /// Verifies a method's recorded content checksum against what the
    /// bytecode oracle reports. A method absent from the profile does not
    /// match.
    pub fn match_checksum(&self, key: &RecordKey, method_id: MethodId, checksum: u32) -> bool {
        self.get_method(key, method_id)
            .map(|m| m.checksum == checksum)
            .unwrap_or(false)
    }

    /// Number of records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Total number of method entries across all records.
    pub fn method_count(&self) -> usize {
        self.records.values().map(|r| r.methods.len()).sum()
    }

    /// Iterates records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &RecordProfile)> {
        self.records.iter()
    }

    /// Merges `other` into `self`, translating every abc id in `other`
    /// (record keys and every [`ProfileType`] qualifier) through `remap`
    /// first. The remap must come from merging `other`'s abc pool into the
    /// pool `self` is keyed against.
    pub fn merge(&mut self, other: &RecordInfos, remap: &PoolRemap) {
        for (key, record) in &other.records {
            let mut record = record.clone();
            record.remap_abc_ids(remap);
            let key = RecordKey {
                abc_id: remap.resolve(key.abc_id),
                record_name: key.record_name.clone(),
            };
            match self.records.get_mut(&key) {
                Some(existing) => existing.merge(&record),
                None => {
                    self.records.insert(key, record);
                }
            }
        }
    }

    /// Drops every method below the hotness threshold, then drops records
    /// left empty. Used to build the compile-time simple view.
    pub fn retain_hot(&mut self, hotness_threshold: u32) {
        for record in self.records.values_mut() {
            record.methods.retain(|_, m| m.sample_count >= hotness_threshold);
        }
        self.records.retain(|_, r| {
            !r.methods.is_empty() || !r.hclass_trees.is_empty() || !r.proto_transitions.is_empty()
        });
    }

    /// Empties the table.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Serializes the table as a section payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ApError::Serialization(e.to_string()))
    }

    /// Rebuilds the table from a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(infos, _)| infos)
            .map_err(|e| ApError::Serialization(e.to_string()))
    }
}

/// The reduced, query-optimized view used at compile time.
///
/// Built by [`crate::decoder::ProfileDecoder::load`]; methods below the
/// decoder's hotness threshold are dropped at parse time.
#[derive(Debug, Default, Clone)]
pub struct RecordSimpleInfos {
    core: RecordInfos,
    hotness_threshold: u32,
}

impl RecordSimpleInfos {
    /// Creates an empty view with a threshold.
    pub fn new(hotness_threshold: u32) -> Self {
        Self {
            core: RecordInfos::new(),
            hotness_threshold,
        }
    }

    /// Builds the view from a full payload, keeping only hot methods.
    pub fn from_payload(mut payload: RecordInfos, hotness_threshold: u32) -> Self {
        payload.retain_hot(hotness_threshold);
        Self {
            core: payload,
            hotness_threshold,
        }
    }

    /// The configured hotness threshold.
    pub fn hotness_threshold(&self) -> u32 {
        self.hotness_threshold
    }

    /// Read access to the underlying table.
    pub fn core(&self) -> &RecordInfos {
        &self.core
    }

    /// Inserts or merges sample data for one method.
    pub fn update(&mut self, key: &RecordKey, method: MethodProfile) {
        self.core.update(key, method);
    }

    /// Adds a hidden-class transition tree to a record.
    pub fn add_hclass_tree(&mut self, key: &RecordKey, tree: HClassTreeDesc) {
        self.core.add_hclass_tree(key, tree);
    }

    /// Adds a prototype transition to a record.
    pub fn add_proto_transition(&mut self, key: &RecordKey, proto: ProtoTransition) {
        self.core.add_proto_transition(key, proto);
    }

    /// Checksum verification, see [`RecordInfos::match_checksum`].
    pub fn match_checksum(&self, key: &RecordKey, method_id: MethodId, checksum: u32) -> bool {
        self.core.match_checksum(key, method_id, checksum)
    }

    /// Pool-remap-aware merge, see [`RecordInfos::merge`].
    pub fn merge(&mut self, other: &RecordSimpleInfos, remap: &PoolRemap) {
        self.core.merge(&other.core, remap);
    }

    /// Empties the view.
    pub fn clear(&mut self) {
        self.core.clear();
    }
}

/// The exhaustive view used for dump, merge and text export.
#[derive(Debug, Default, Clone)]
pub struct RecordDetailInfos {
    core: RecordInfos,
}

impl RecordDetailInfos {
    /// Creates an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a full payload without filtering.
    pub fn from_payload(payload: RecordInfos) -> Self {
        Self { core: payload }
    }

    /// Read access to the underlying table.
    pub fn core(&self) -> &RecordInfos {
        &self.core
    }

    /// Mutable access for dump tooling building a profile from scratch.
    pub fn core_mut(&mut self) -> &mut RecordInfos {
        &mut self.core
    }

    /// Inserts or merges sample data for one method.
    pub fn update(&mut self, key: &RecordKey, method: MethodProfile) {
        self.core.update(key, method);
    }

    /// Adds a hidden-class transition tree to a record.
    pub fn add_hclass_tree(&mut self, key: &RecordKey, tree: HClassTreeDesc) {
        self.core.add_hclass_tree(key, tree);
    }

    /// Adds a prototype transition to a record.
    pub fn add_proto_transition(&mut self, key: &RecordKey, proto: ProtoTransition) {
        self.core.add_proto_transition(key, proto);
    }

    /// Checksum verification, see [`RecordInfos::match_checksum`].
    pub fn match_checksum(&self, key: &RecordKey, method_id: MethodId, checksum: u32) -> bool {
        self.core.match_checksum(key, method_id, checksum)
    }

    /// Pool-remap-aware merge, see [`RecordInfos::merge`].
    pub fn merge(&mut self, other: &RecordDetailInfos, remap: &PoolRemap) {
        self.core.merge(&other.core, remap);
    }

    /// Empties the view.
    pub fn clear(&mut self) {
        self.core.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::AbcFilePool;
    use crate::types::ProfileTypeKind;

    fn method(id: u32, count: u32, checksum: u32) -> MethodProfile {
        MethodProfile {
            method_id: MethodId(id),
            name: format!("func_{id}"),
            checksum,
            sample_count: count,
            type_info: ProfileType::none(),
        }
    }

    #[test]
    fn update_merges_sample_counts() {
        let mut infos = RecordInfos::new();
        let key = RecordKey::new(ApEntityId(0), "entry");
        infos.update(&key, method(1, 10, 0xAB));
        infos.update(&key, method(1, 5, 0xAB));
        assert_eq!(
            infos.get_method(&key, MethodId(1)).map(|m| m.sample_count),
            Some(15)
        );
        assert_eq!(infos.method_count(), 1);
    }

    #[test]
    fn retain_hot_drops_cold_methods_and_empty_records() {
        let mut infos = RecordInfos::new();
        let key = RecordKey::new(ApEntityId(0), "entry");
        infos.update(&key, method(1, 100, 0));
        infos.update(&key, method(2, 1, 0));
        let cold = RecordKey::new(ApEntityId(0), "cold");
        infos.update(&cold, method(3, 1, 0));

        let simple = RecordSimpleInfos::from_payload(infos, 10);
        assert!(simple.core().get_method(&key, MethodId(1)).is_some());
        assert!(simple.core().get_method(&key, MethodId(2)).is_none());
        assert!(simple.core().get(&cold).is_none());
    }

    #[test]
    fn merge_translates_keys_and_type_qualifiers() {
        let mut pool_a = AbcFilePool::new();
        pool_a.try_add("main.abc");
        let mut pool_b = AbcFilePool::new();
        let b_abc = pool_b.try_add("worker.abc");

        let mut a = RecordInfos::new();
        let mut b = RecordInfos::new();
        let b_key = RecordKey::new(b_abc, "Worker");
        let mut m = method(4, 20, 0);
        m.type_info = ProfileType::new(ProfileTypeKind::Class, 9, Some(b_abc));
        b.update(&b_key, m);

        let remap = pool_a.merge(&pool_b);
        a.merge(&b, &remap);

        let a_abc = pool_a
            .get_entry_id_by_normalized_name("worker.abc")
            .expect("merged entry");
        let a_key = RecordKey::new(a_abc, "Worker");
        let merged = a.get_method(&a_key, MethodId(4)).expect("merged method");
        assert_eq!(merged.type_info.abc_id, Some(a_abc));
        // Nothing is left keyed against B's id space.
        assert!(a.iter().all(|(k, _)| pool_a.get_entry(k.abc_id).is_some()));
    }

    #[test]
    fn checksum_match_requires_presence_and_equality() {
        let mut infos = RecordInfos::new();
        let key = RecordKey::new(ApEntityId(0), "entry");
        infos.update(&key, method(1, 10, 0xFEED));
        assert!(infos.match_checksum(&key, MethodId(1), 0xFEED));
        assert!(!infos.match_checksum(&key, MethodId(1), 0xDEAD));
        assert!(!infos.match_checksum(&key, MethodId(2), 0xFEED));
    }

    #[test]
    fn hclass_tree_merge_deduplicates_edges() {
        let root = ProfileType::new(ProfileTypeKind::Class, 1, None);
        let edge = HClassTransition {
            from: root,
            key: "x".into(),
            to: ProfileType::new(ProfileTypeKind::Class, 2, None),
        };
        let mut infos = RecordInfos::new();
        let key = RecordKey::new(ApEntityId(0), "entry");
        let mut tree = HClassTreeDesc::new(root);
        tree.add_transition(edge.clone());
        infos.add_hclass_tree(&key, tree.clone());
        infos.add_hclass_tree(&key, tree);
        let record = infos.get(&key).expect("record");
        assert_eq!(record.hclass_trees.len(), 1);
        assert_eq!(record.hclass_trees[0].transitions, vec![edge]);
    }

    #[test]
    fn payload_round_trip() {
        let mut infos = RecordInfos::new();
        let key = RecordKey::new(ApEntityId(3), "entry");
        infos.update(&key, method(1, 10, 0xAB));
        infos.add_proto_transition(
            &key,
            ProtoTransition {
                from: ProfileType::new(ProfileTypeKind::Prototype, 1, Some(ApEntityId(3))),
                to: ProfileType::new(ProfileTypeKind::Prototype, 2, Some(ApEntityId(3))),
            },
        );
        let bytes = infos.encode().expect("encode");
        let back = RecordInfos::decode(&bytes).expect("decode");
        assert_eq!(back, infos);
    }
}
