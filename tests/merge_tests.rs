#![allow(missing_docs)]

use std::path::Path;

use approf::pool::new_shared_pool;
use approf::records::MethodProfile;
use approf::writer::{content_hash, ProfileWriter};
use approf::{
    ApMerger, CapabilityFlags, MethodId, ProfileDecoder, ProfileHeader, ProfileType, Version,
};

fn method(id: u32, count: u32) -> MethodProfile {
    MethodProfile {
        method_id: MethodId(id),
        name: format!("func_{id}"),
        checksum: 0,
        sample_count: count,
        type_info: ProfileType::none(),
    }
}

fn write_profile(path: &Path, entries: &[(&str, &str, u32, u32)], checksum: u32) {
    let mut acc = ProfileDecoder::new("", 1);
    acc.init_merge_data();
    acc.update_panda_file_info(checksum);
    for (abc, record, method_id, count) in entries {
        acc.update(abc, record, method(*method_id, *count));
    }
    ProfileWriter::default().save(path, &acc).expect("save profile");
}

/// Header-only `.ap` file with a chosen version and capability set.
fn write_minimal(path: &Path, version: Version, flag_bits: u32) {
    let mut header = ProfileHeader::new(version, CapabilityFlags::from_bits(flag_bits));
    header.file_size = header.byte_size() as u64;
    header.checksum = content_hash(&[]);
    std::fs::write(path, header.to_bytes()).expect("write header");
}

#[test]
fn merged_tables_resolve_in_the_accumulator_pool() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.ap");
    let b = dir.path().join("b.ap");
    // Overlapping (shared.abc) and non-overlapping (only_a/only_b) entries,
    // interned in different orders so raw ids collide across files.
    write_profile(
        &a,
        &[("only_a.abc", "A", 1, 10), ("shared.abc", "S", 2, 5)],
        0xA,
    );
    write_profile(
        &b,
        &[("shared.abc", "S", 2, 7), ("only_b.abc", "B", 3, 20)],
        0xB,
    );

    let merged = ApMerger::merge_files(&[a, b], 1)?;

    // Every id reachable from the merged record tables still resolves to the
    // expected normalized name.
    let pool = merged.abc_pool();
    let pool = pool.read().expect("pool lock");
    let mut seen_names = Vec::new();
    for (key, _) in merged.record_simple_infos().core().iter() {
        let entry = pool.get_entry(key.abc_id).expect("dangling abc id after merge");
        seen_names.push(entry.normalized_desc.clone());
    }
    seen_names.sort();
    assert_eq!(seen_names, ["only_a.abc", "only_b.abc", "shared.abc"]);
    // Names present in both inputs share one id.
    assert_eq!(pool.len(), 3);
    drop(pool);

    // Overlapping method samples summed across inputs.
    assert_eq!(
        merged.type_info("shared.abc", "S", MethodId(2)),
        ProfileType::none()
    );
    let shared_key = {
        let pool = merged.abc_pool();
        let pool = pool.read().expect("pool lock");
        approf::records::RecordKey::new(
            pool.get_entry_id_by_normalized_name("shared.abc").expect("shared id"),
            "S",
        )
    };
    assert_eq!(
        merged
            .record_simple_infos()
            .core()
            .get_method(&shared_key, MethodId(2))
            .map(|m| m.sample_count),
        Some(12)
    );

    // Panda-file checksums unioned.
    assert!(merged.panda_file_infos().sample(0xA));
    assert!(merged.panda_file_infos().sample(0xB));
    Ok(())
}

#[test]
fn merge_round_trips_through_a_written_file() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.ap");
    let b = dir.path().join("b.ap");
    write_profile(&a, &[("m.abc", "R", 1, 30)], 0x1);
    write_profile(&b, &[("m.abc", "R", 1, 12)], 0x2);

    let out = dir.path().join("merged.ap");
    ApMerger::merge_to_file(&[a, b], &out, 1)?;

    let mut decoder = ProfileDecoder::new(&out, 1);
    decoder.load_full(None)?;
    let pool = decoder.abc_pool();
    let pool = pool.read().expect("pool lock");
    let key = approf::records::RecordKey::new(
        pool.get_entry_id_by_normalized_name("m.abc").expect("m.abc id"),
        "R",
    );
    drop(pool);
    assert_eq!(
        decoder
            .record_simple_infos()
            .core()
            .get_method(&key, MethodId(1))
            .map(|m| m.sample_count),
        Some(42)
    );
    Ok(())
}

#[test]
fn merge_never_downgrades_version_or_capabilities() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let low_path = dir.path().join("low.ap");
    let high_path = dir.path().join("high.ap");
    // No abc-id bit: these files carry no pool section.
    write_minimal(&low_path, Version::new(1, 0), 0);
    write_minimal(
        &high_path,
        Version::new(1, 2),
        CapabilityFlags::METHOD_CHECKSUM | CapabilityFlags::AOT_COMPATIBLE,
    );

    // Low into high: high keeps its version and capabilities.
    let mut high = ProfileDecoder::new(&high_path, 1);
    high.load_full(None)?;
    let mut low = ProfileDecoder::new(&low_path, 1);
    low.load_full(None)?;
    high.merge(&low);
    let header = high.header().expect("header");
    assert_eq!(header.version, Version::new(1, 2));
    assert!(header.supports_method_checksum());
    assert!(header.is_compatible_with_aot_file());

    // High into low: low's compatibility field upgrades.
    let mut high = ProfileDecoder::new(&high_path, 1);
    high.load_full(None)?;
    let mut low = ProfileDecoder::new(&low_path, 1);
    low.load_full(None)?;
    low.merge(&high);
    let header = low.header().expect("header");
    assert_eq!(header.version, Version::new(1, 2));
    assert!(header.supports_method_checksum());
    assert!(header.is_compatible_with_aot_file());
    Ok(())
}

#[test]
fn merge_is_a_no_op_when_either_side_is_unusable() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("src.ap");
    write_profile(&path, &[("m.abc", "R", 1, 30)], 0x1);

    let mut source = ProfileDecoder::new(&path, 1);
    source.load_full(None)?;

    // Target never loaded.
    let mut target = ProfileDecoder::new("", 1);
    target.merge(&source);
    assert_eq!(target.record_simple_infos().core().record_count(), 0);
    assert!(target.header().is_none());

    // Source loaded but unverified.
    let mut target = ProfileDecoder::new("", 1);
    target.init_merge_data();
    let mut unverified = ProfileDecoder::new(&path, 1);
    unverified.load(None)?; // compile path: not verified yet
    target.merge(&unverified);
    assert_eq!(target.record_simple_infos().core().record_count(), 0);
    Ok(())
}

#[test]
fn decoders_sharing_an_external_pool_share_one_id_space() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.ap");
    let b = dir.path().join("b.ap");
    write_profile(&a, &[("shared.abc", "S", 1, 10)], 0xA);
    write_profile(&b, &[("shared.abc", "S", 2, 20)], 0xB);

    let pool = new_shared_pool();
    let mut da = ProfileDecoder::new(&a, 1);
    da.load_full(Some(pool.clone()))?;
    let mut db = ProfileDecoder::new(&b, 1);
    db.load_full(Some(pool.clone()))?;

    // Both loads interned into the same pool: one entry, one id space.
    assert_eq!(pool.read().expect("pool lock").len(), 1);
    da.merge(&db);
    let key = approf::records::RecordKey::new(
        pool.read()
            .expect("pool lock")
            .get_entry_id_by_normalized_name("shared.abc")
            .expect("shared id"),
        "S",
    );
    assert!(da
        .record_simple_infos()
        .core()
        .get_method(&key, MethodId(2))
        .is_some());

    // Clearing a sharer must leave the external pool intact.
    db.clear();
    assert_eq!(pool.read().expect("pool lock").len(), 1);
    Ok(())
}
