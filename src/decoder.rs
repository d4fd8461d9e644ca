//! The Read-Side Engine.
//!
//! `ProfileDecoder` memory-maps an `.ap` file, validates the header, loads the
//! abc pool and record tables, then releases the mapping. It is the aggregate
//! root of the crate: the AOT compiler queries it, the offline merge tool
//! accumulates into it.
//!
//! Design rules carried by every query method: an unloaded or unverified
//! decoder behaves exactly like "no profiling information available" —
//! `match_method` says yes to everything, data queries come back empty, and
//! mutation queries are no-ops. A stale or absent profile must never fail a
//! compilation.
//!
//! A decoder instance is single-writer: callers serialize access during
//! `load*`/`merge`, typically by confining the decoder to one compile session.

use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, error};
use memmap2::{Mmap, MmapMut};

use crate::error::{ApError, Result};
use crate::header::{
    CapabilityFlags, ProfileHeader, SectionKind, SectionMeta, CURRENT_VERSION,
    HEADER_BASE_SIZE, MIN_COMPATIBLE_VERSION,
};
use crate::compression::decompress_by_id;
use crate::pool::{new_shared_pool, AbcFilePool, ApEntityId, PoolRemap, SharedAbcPool};
use crate::records::{
    HClassTreeDesc, MethodProfile, PandaFileInfos, ProtoTransition, RecordDetailInfos,
    RecordInfos, RecordKey, RecordSimpleInfos,
};
use crate::types::{MethodId, ProfileType};
use crate::writer::content_hash;

/// Required extension for profile containers.
pub const AP_EXTENSION: &str = "ap";

/// Which payload view a load populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// Read-only mapping, hotness-filtered simple view (compile path).
    Simple,
    /// Read-write mapping, exhaustive detail view (merge tooling path).
    Full,
}

/// Outcome of [`ProfileDecoder::mismatch_report`]: which profiled methods the
/// compiler never matched against, a staleness diagnostic.
#[derive(Debug, Default, Clone)]
pub struct MismatchReport {
    /// Methods present in the loaded profile.
    pub profile_methods: usize,
    /// Methods the compiler matched (via `match_and_mark_method`).
    pub matched_methods: usize,
    /// Profiled methods never matched.
    pub mismatched: Vec<(RecordKey, MethodId)>,
}

/// Decoder and merger for `.ap` profile containers.
#[derive(Debug)]
pub struct ProfileDecoder {
    in_path: PathBuf,
    hotness_threshold: u32,
    header: Option<ProfileHeader>,
    panda_file_infos: PandaFileInfos,
    record_simple: RecordSimpleInfos,
    record_detail: Option<RecordDetailInfos>,
    abc_pool: SharedAbcPool,
    external_pool: bool,
    marked: BTreeSet<(RecordKey, MethodId)>,
    is_loaded: bool,
    is_verify_success: bool,
}

impl Default for ProfileDecoder {
    fn default() -> Self {
        Self::new("", 1)
    }
}

impl ProfileDecoder {
    /// Creates an empty decoder for a profile path and hotness threshold.
    ///
    /// An empty path means "no profile configured" — `load_and_verify` treats
    /// that as full-compiler mode rather than an error.
    pub fn new(path: impl Into<PathBuf>, hotness_threshold: u32) -> Self {
        Self {
            in_path: path.into(),
            hotness_threshold,
            header: None,
            panda_file_infos: PandaFileInfos::new(),
            record_simple: RecordSimpleInfos::new(hotness_threshold),
            record_detail: None,
            abc_pool: new_shared_pool(),
            external_pool: false,
            marked: BTreeSet::new(),
            is_loaded: false,
            is_verify_success: false,
        }
    }

    /// The configured profile path.
    pub fn in_path(&self) -> &Path {
        &self.in_path
    }

    /// The configured hotness threshold.
    pub fn hotness_threshold(&self) -> u32 {
        self.hotness_threshold
    }

    /// Whether a full parse has succeeded since the last `clear`.
    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    /// Whether the loaded profile passed bytecode-checksum verification.
    pub fn is_verify_success(&self) -> bool {
        self.is_verify_success
    }

    /// The parsed header, when loaded.
    pub fn header(&self) -> Option<&ProfileHeader> {
        self.header.as_ref()
    }

    /// The per-bytecode-file checksum table.
    pub fn panda_file_infos(&self) -> &PandaFileInfos {
        &self.panda_file_infos
    }

    /// The compile-time simple view.
    pub fn record_simple_infos(&self) -> &RecordSimpleInfos {
        &self.record_simple
    }

    /// The exhaustive detail view, populated by `load_full`/`init_merge_data`.
    pub fn record_detail_infos(&self) -> Option<&RecordDetailInfos> {
        self.record_detail.as_ref()
    }

    /// The working abc pool handle (shared when supplied externally).
    pub fn abc_pool(&self) -> SharedAbcPool {
        SharedAbcPool::clone(&self.abc_pool)
    }

    // ---- Load ----

    /// Loads the profile read-only and builds the hotness-filtered simple
    /// view. Re-loading an already-loaded decoder clears it first.
    pub fn load(&mut self, external_pool: Option<SharedAbcPool>) -> Result<()> {
        self.load_inner(external_pool, LoadMode::Simple)
    }

    /// Loads the profile through a read-write mapping and builds both the
    /// detail and simple views. This is the merge-tooling path; the decoder is
    /// marked verified on success, runtime checksum verification belongs to
    /// the compile path.
    pub fn load_full(&mut self, external_pool: Option<SharedAbcPool>) -> Result<()> {
        self.load_inner(external_pool, LoadMode::Full)
    }

    fn load_inner(&mut self, external_pool: Option<SharedAbcPool>, mode: LoadMode) -> Result<()> {
        if self.is_loaded {
            self.clear();
        }
        if let Some(pool) = external_pool {
            self.abc_pool = pool;
            self.external_pool = true;
        }

        let path = self.in_path.clone();
        let result = self.load_ap_binary_file(&path, mode);
        match &result {
            Ok(()) => {
                self.is_loaded = true;
                if mode == LoadMode::Full {
                    self.is_verify_success = true;
                }
                debug!(
                    "loaded profile {:?}: {} records, {} methods",
                    path,
                    self.record_simple.core().record_count(),
                    self.record_simple.core().method_count()
                );
            }
            Err(e) => {
                // Leave the decoder in a clean Empty state; a hostile file
                // must not leave half-parsed tables behind.
                error!("failed to load profile {:?}: {e}", path);
                self.reset_tables();
            }
        }
        result
    }

    /// Maps the file and parses it. The mapping lives only inside this call:
    /// every exit path, including parse failure, unmaps.
    fn load_ap_binary_file(&mut self, path: &Path, mode: LoadMode) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(ApError::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no profile path configured",
            ))));
        }
        if path.extension().and_then(|e| e.to_str()) != Some(AP_EXTENSION) {
            return Err(ApError::Format(format!(
                "Profile path {path:?} does not end in .{AP_EXTENSION}"
            )));
        }

        match mode {
            LoadMode::Simple => {
                let file = File::open(path)?;
                let file_size = file.metadata()?.len();
                if file_size < HEADER_BASE_SIZE as u64 {
                    return Err(ApError::Format("File smaller than header".into()));
                }
                // Safety: mapped files can be modified by other processes; we
                // accept the standard mmap trade-off and never trust the bytes.
                #[allow(unsafe_code)]
                let mmap = unsafe { Mmap::map(&file)? };
                self.parse_buffer(&mmap, mode)
            }
            LoadMode::Full => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                let file_size = file.metadata()?.len();
                if file_size < HEADER_BASE_SIZE as u64 {
                    return Err(ApError::Format("File smaller than header".into()));
                }
                #[allow(unsafe_code)]
                let mmap = unsafe { MmapMut::map_mut(&file)? };
                self.parse_buffer(&mmap, mode)
            }
        }
    }

    fn parse_buffer(&mut self, buf: &[u8], mode: LoadMode) -> Result<()> {
        let header = ProfileHeader::parse_from_bytes(buf)?;
        if !header.compatible_verify(MIN_COMPATIBLE_VERSION) {
            return Err(ApError::Format(format!(
                "Incompatible profile version {}.{}",
                header.version.major, header.version.minor
            )));
        }

        let body = &buf[header.byte_size()..header.file_size as usize];
        let actual = content_hash(body);
        if actual != header.checksum {
            return Err(ApError::Format(format!(
                "Body checksum mismatch: header {:#x}, computed {actual:#x}",
                header.checksum
            )));
        }

        let panda_file_infos = match self.section_payload(buf, &header, SectionKind::PandaFileInfo)? {
            Some(bytes) => PandaFileInfos::decode(&bytes)?,
            None => PandaFileInfos::new(),
        };

        // Even a plain load merges the file's own abc pool into the working
        // pool; this is how two files' pools combine when a shared external
        // pool is in play, not only on explicit `merge`.
        let remap = if header.supports_profile_type_with_abc_id() {
            let bytes = self
                .section_payload(buf, &header, SectionKind::AbcFilePool)?
                .ok_or_else(|| {
                    ApError::Format("Header claims abc ids but pool section is missing".into())
                })?;
            let temp_pool = AbcFilePool::decode(&bytes)?;
            let mut working = self
                .abc_pool
                .write()
                .map_err(|_| ApError::Internal("abc pool lock poisoned".into()))?;
            working.merge(&temp_pool)
        } else {
            PoolRemap::default()
        };

        let raw_payload = match self.section_payload(buf, &header, SectionKind::RecordPayload)? {
            Some(bytes) => RecordInfos::decode(&bytes)?,
            None => RecordInfos::new(),
        };
        let mut payload = RecordInfos::new();
        payload.merge(&raw_payload, &remap);

        self.panda_file_infos = panda_file_infos;
        if mode == LoadMode::Full {
            self.record_detail = Some(RecordDetailInfos::from_payload(payload.clone()));
        }
        self.record_simple = RecordSimpleInfos::from_payload(payload, self.hotness_threshold);
        self.header = Some(header);
        Ok(())
    }

    /// Extracts and decompresses one section body. `Ok(None)` when the header
    /// declares no section of this kind (absent optional sections are legal).
    fn section_payload(
        &self,
        buf: &[u8],
        header: &ProfileHeader,
        kind: SectionKind,
    ) -> Result<Option<Vec<u8>>> {
        let Some(desc) = header.section(kind) else {
            return Ok(None);
        };
        if desc.size < 1 {
            return Err(ApError::Format(format!(
                "Section {} too small for its meta byte",
                desc.kind
            )));
        }
        // Ranges were bounds-checked against file_size during header parse.
        let start = desc.offset as usize;
        let end = (desc.offset + desc.size) as usize;
        let meta = SectionMeta::from_byte(buf[start]);
        let body = &buf[start + 1..end];
        decompress_by_id(meta.compression_method(), body).map(|c| Some(c.into_owned()))
    }

    // ---- Verify ----

    /// Verifies one runtime bytecode checksum against the loaded profile and
    /// records the outcome. Returns the verification result.
    pub fn verify(&mut self, checksum: u32) -> bool {
        if !self.is_loaded {
            self.is_verify_success = false;
            return false;
        }
        self.is_verify_success = self.panda_file_infos.sample(checksum);
        self.is_verify_success
    }

    /// Loads (if needed) and verifies every runtime checksum in the map.
    ///
    /// With an empty configured path this short-circuits to success without
    /// any I/O: no profile file is not an error, the compiler simply runs in
    /// full (unprofiled) mode.
    pub fn load_and_verify(
        &mut self,
        file_checksums: &HashMap<String, u32>,
        external_pool: Option<SharedAbcPool>,
    ) -> bool {
        if self.in_path.as_os_str().is_empty() {
            return true;
        }
        if !self.is_loaded && self.load(external_pool).is_err() {
            return false;
        }
        self.is_verify_success = file_checksums
            .values()
            .all(|checksum| self.panda_file_infos.sample(*checksum));
        self.is_verify_success
    }

    // ---- Clear ----

    /// Tears down all owned state. Safe to call repeatedly from any state.
    ///
    /// A shared external pool is left untouched; only a pool this decoder
    /// created is cleared.
    pub fn clear(&mut self) {
        self.reset_tables();
        if !self.external_pool {
            if let Ok(mut pool) = self.abc_pool.write() {
                pool.clear();
            }
        }
    }

    fn reset_tables(&mut self) {
        self.header = None;
        self.panda_file_infos.clear();
        self.record_simple = RecordSimpleInfos::new(self.hotness_threshold);
        self.record_detail = None;
        self.marked.clear();
        self.is_loaded = false;
        self.is_verify_success = false;
    }

    // ---- Merge ----

    /// Prepares an empty-but-loaded decoder as an accumulation target for
    /// repeated [`merge`](Self::merge) calls, without reading any file.
    pub fn init_merge_data(&mut self) {
        self.clear();
        self.abc_pool = new_shared_pool();
        self.external_pool = false;
        self.header = Some(ProfileHeader::new(
            CURRENT_VERSION,
            CapabilityFlags::from_bits(CapabilityFlags::KNOWN_MASK),
        ));
        self.record_detail = Some(RecordDetailInfos::new());
        self.is_loaded = true;
        self.is_verify_success = true;
    }

    /// Merges another decoder's tables into this one.
    ///
    /// No-op unless both sides are loaded and verified. The other pool is
    /// merged into ours first; the resulting remap is then applied to the
    /// incoming record tables, so every id reachable from the merged tables
    /// resolves in our pool. The version/capability field keeps the most
    /// capable of the two headers and never downgrades.
    pub fn merge(&mut self, other: &ProfileDecoder) {
        if !self.usable() || !other.usable() {
            return;
        }
        if let (Some(mine), Some(theirs)) = (self.header.as_mut(), other.header.as_ref()) {
            if theirs.version > mine.version {
                mine.version = theirs.version;
            }
            mine.flags = mine.flags.union(theirs.flags);
        }
        self.panda_file_infos.merge(&other.panda_file_infos);

        let remap = if SharedAbcPool::ptr_eq(&self.abc_pool, &other.abc_pool) {
            PoolRemap::default()
        } else {
            let Ok(mut mine) = self.abc_pool.write() else { return };
            let Ok(theirs) = other.abc_pool.read() else { return };
            mine.merge(&theirs)
        };

        self.record_simple.merge(&other.record_simple, &remap);
        if let (Some(mine), Some(theirs)) =
            (self.record_detail.as_mut(), other.record_detail.as_ref())
        {
            mine.merge(theirs, &remap);
        }
        debug!(
            "merged profile {:?} into {:?}",
            other.in_path, self.in_path
        );
    }

    // ---- Query surface ----
    //
    // Every query degrades to a permissive default when the decoder is not
    // loaded or not verified.

    fn usable(&self) -> bool {
        self.is_loaded && self.is_verify_success
    }

    /// Resolves a (file desc, record name) pair into a table key.
    ///
    /// Without the abc-id capability the file association is implicit
    /// (single-file mode) and all records live under id 0.
    fn record_key(&self, file_desc: &str, record_name: &str) -> Option<RecordKey> {
        let with_abc_id = self
            .header
            .as_ref()
            .map(|h| h.supports_profile_type_with_abc_id())
            .unwrap_or(false);
        if !with_abc_id {
            return Some(RecordKey::new(ApEntityId(0), record_name));
        }
        let pool = self.abc_pool.read().ok()?;
        let abc_id = pool.get_entry_id_by_normalized_name(file_desc)?;
        Some(RecordKey::new(abc_id, record_name))
    }

    /// Whether a method has (hot) profile data. `true` when no trustworthy
    /// profile is loaded: no profile means everything matches.
    pub fn match_method(&self, file_desc: &str, record_name: &str, method_id: MethodId) -> bool {
        if !self.usable() {
            return true;
        }
        self.record_key(file_desc, record_name)
            .and_then(|key| self.record_simple.core().get_method(&key, method_id))
            .is_some()
    }

    /// Like [`match_method`](Self::match_method), additionally marking matched
    /// methods for the mismatch report. Marking is skipped entirely when no
    /// trustworthy profile is loaded.
    pub fn match_and_mark_method(
        &mut self,
        file_desc: &str,
        record_name: &str,
        method_id: MethodId,
    ) -> bool {
        if !self.usable() {
            return true;
        }
        let Some(key) = self.record_key(file_desc, record_name) else {
            return false;
        };
        if self.record_simple.core().get_method(&key, method_id).is_some() {
            self.marked.insert((key, method_id));
            true
        } else {
            false
        }
    }

    /// Verifies a method's content checksum against the profile. Permissive
    /// (`true`) when unloaded/unverified or when the file predates per-method
    /// checksums.
    pub fn match_method_checksum(
        &self,
        file_desc: &str,
        record_name: &str,
        method_id: MethodId,
        checksum: u32,
    ) -> bool {
        if !self.usable() {
            return true;
        }
        let supports = self
            .header
            .as_ref()
            .map(|h| h.supports_method_checksum())
            .unwrap_or(false);
        if !supports {
            return true;
        }
        self.record_key(file_desc, record_name)
            .map(|key| self.record_simple.match_checksum(&key, method_id, checksum))
            .unwrap_or(false)
    }

    /// Profiled methods the compiler never matched. Empty when no trustworthy
    /// profile is loaded.
    pub fn mismatch_report(&self) -> MismatchReport {
        if !self.usable() {
            return MismatchReport::default();
        }
        let mut report = MismatchReport::default();
        for (key, record) in self.record_simple.core().iter() {
            for method_id in record.methods.keys() {
                report.profile_methods += 1;
                if self.marked.contains(&(key.clone(), *method_id)) {
                    report.matched_methods += 1;
                } else {
                    report.mismatched.push((key.clone(), *method_id));
                }
            }
        }
        report
    }

    /// The hidden-class transition tree rooted at `root`, if profiled.
    pub fn hclass_tree_desc(&self, root: ProfileType) -> Option<HClassTreeDesc> {
        if !self.usable() {
            return None;
        }
        self.record_simple
            .core()
            .iter()
            .flat_map(|(_, record)| record.hclass_trees.iter())
            .find(|tree| tree.root == root)
            .cloned()
    }

    /// Visits every hidden-class transition tree. No-op when unusable.
    pub fn for_each_hclass_tree(&self, mut f: impl FnMut(&RecordKey, &HClassTreeDesc)) {
        if !self.usable() {
            return;
        }
        for (key, record) in self.record_simple.core().iter() {
            for tree in &record.hclass_trees {
                f(key, tree);
            }
        }
    }

    /// Visits every prototype transition. No-op when unusable.
    pub fn for_each_proto_transition(&self, mut f: impl FnMut(&RecordKey, &ProtoTransition)) {
        if !self.usable() {
            return;
        }
        for (key, record) in self.record_simple.core().iter() {
            for proto in &record.proto_transitions {
                f(key, proto);
            }
        }
    }

    /// Dominant observed type for a method. [`ProfileType::none`] when absent
    /// or when no trustworthy profile is loaded.
    pub fn type_info(&self, file_desc: &str, record_name: &str, method_id: MethodId) -> ProfileType {
        if !self.usable() {
            return ProfileType::none();
        }
        self.record_key(file_desc, record_name)
            .and_then(|key| self.record_simple.core().get_method(&key, method_id))
            .map(|m| m.type_info)
            .unwrap_or_else(ProfileType::none)
    }

    /// Inserts or merges sample data for one method (merge-tooling path).
    /// No-op when the decoder is not loaded and verified.
    pub fn update(&mut self, file_desc: &str, record_name: &str, method: MethodProfile) {
        if !self.usable() {
            return;
        }
        let abc_id = {
            let Ok(mut pool) = self.abc_pool.write() else { return };
            pool.try_add(file_desc)
        };
        let key = RecordKey::new(abc_id, record_name);
        self.record_simple.update(&key, method.clone());
        if let Some(detail) = self.record_detail.as_mut() {
            detail.update(&key, method);
        }
    }

    /// Adds a hidden-class transition tree (merge-tooling path). No-op when
    /// the decoder is not loaded and verified.
    pub fn update_hclass_tree(&mut self, file_desc: &str, record_name: &str, tree: HClassTreeDesc) {
        if !self.usable() {
            return;
        }
        let abc_id = {
            let Ok(mut pool) = self.abc_pool.write() else { return };
            pool.try_add(file_desc)
        };
        let key = RecordKey::new(abc_id, record_name);
        if let Some(detail) = self.record_detail.as_mut() {
            detail.add_hclass_tree(&key, tree.clone());
        }
        self.record_simple.add_hclass_tree(&key, tree);
    }

    /// Adds a prototype transition (merge-tooling path). No-op when the
    /// decoder is not loaded and verified.
    pub fn update_proto_transition(
        &mut self,
        file_desc: &str,
        record_name: &str,
        proto: ProtoTransition,
    ) {
        if !self.usable() {
            return;
        }
        let abc_id = {
            let Ok(mut pool) = self.abc_pool.write() else { return };
            pool.try_add(file_desc)
        };
        let key = RecordKey::new(abc_id, record_name);
        if let Some(detail) = self.record_detail.as_mut() {
            detail.add_proto_transition(&key, proto.clone());
        }
        self.record_simple.add_proto_transition(&key, proto);
    }

    /// Records one bytecode-file checksum (merge-tooling path). No-op when
    /// the decoder is not loaded and verified.
    pub fn update_panda_file_info(&mut self, checksum: u32) {
        if !self.usable() {
            return;
        }
        self.panda_file_infos.add(checksum);
    }

    /// Serializes the loaded state as a human-readable text dump. Fails on an
    /// unloaded decoder or an unwritable path; not designed for reload.
    pub fn save_ap_text_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::inspector::ApInspector::save_text(self, path)
    }
}
