#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use approf::records::{HClassTransition, HClassTreeDesc, MethodProfile, ProtoTransition};
use approf::writer::ProfileWriter;
use approf::{MethodId, ProfileDecoder, ProfileType, ProfileTypeKind};

fn method(id: u32, count: u32, checksum: u32) -> MethodProfile {
    MethodProfile {
        method_id: MethodId(id),
        name: format!("func_{id}"),
        checksum,
        sample_count: count,
        type_info: ProfileType::new(ProfileTypeKind::Class, id * 10, None),
    }
}

/// Builds a small profile with two abc files, one hot and one cold method,
/// a hidden-class tree and a proto transition, then saves it as `name`.
fn write_profile(dir: &Path, name: &str) -> PathBuf {
    let mut acc = ProfileDecoder::new("", 1);
    acc.init_merge_data();
    acc.update_panda_file_info(0xC0FFEE);
    acc.update("main.abc", "EntryPoint", method(1, 100, 0xAA11));
    acc.update("main.abc", "EntryPoint", method(2, 1, 0xBB22)); // cold
    acc.update("lib.abc", "Helper", method(7, 40, 0xCC33));

    let root = ProfileType::new(ProfileTypeKind::Class, 5, None);
    let mut tree = HClassTreeDesc::new(root);
    tree.add_transition(HClassTransition {
        from: root,
        key: "x".into(),
        to: ProfileType::new(ProfileTypeKind::Class, 6, None),
    });
    acc.update_hclass_tree("main.abc", "EntryPoint", tree);
    acc.update_proto_transition(
        "main.abc",
        "EntryPoint",
        ProtoTransition {
            from: ProfileType::new(ProfileTypeKind::Prototype, 1, None),
            to: ProfileType::new(ProfileTypeKind::Prototype, 2, None),
        },
    );

    let path = dir.join(name);
    ProfileWriter::default()
        .save(&path, &acc)
        .expect("save profile");
    path
}

#[test]
fn load_verify_and_query() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "basic.ap");

    let mut decoder = ProfileDecoder::new(path, 10);
    decoder.load(None)?;
    assert!(decoder.is_loaded());
    assert!(!decoder.is_verify_success());
    assert!(decoder.verify(0xC0FFEE));
    assert!(decoder.is_verify_success());

    // Hot method present, cold one filtered by the threshold of 10.
    assert!(decoder.match_method("main.abc", "EntryPoint", MethodId(1)));
    assert!(!decoder.match_method("main.abc", "EntryPoint", MethodId(2)));
    assert!(decoder.match_method("lib.abc", "Helper", MethodId(7)));
    assert!(!decoder.match_method("missing.abc", "Nope", MethodId(1)));

    assert_eq!(
        decoder.type_info("main.abc", "EntryPoint", MethodId(1)),
        ProfileType::new(ProfileTypeKind::Class, 10, None)
    );

    assert!(decoder.match_method_checksum("main.abc", "EntryPoint", MethodId(1), 0xAA11));
    assert!(!decoder.match_method_checksum("main.abc", "EntryPoint", MethodId(1), 0xDEAD));

    let root = ProfileType::new(ProfileTypeKind::Class, 5, None);
    let tree = decoder.hclass_tree_desc(root).expect("hclass tree");
    assert_eq!(tree.transitions.len(), 1);

    let mut protos = 0;
    decoder.for_each_proto_transition(|_, _| protos += 1);
    assert_eq!(protos, 1);
    Ok(())
}

#[test]
fn load_is_idempotent_after_reload() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "twice.ap");

    let mut twice = ProfileDecoder::new(&path, 10);
    twice.load(None)?;
    twice.load(None)?; // implies clear: nothing double-counted

    let mut once = ProfileDecoder::new(&path, 10);
    once.clear();
    once.load(None)?;

    assert_eq!(
        twice.record_simple_infos().core().method_count(),
        once.record_simple_infos().core().method_count()
    );
    let key_count = |d: &ProfileDecoder| d.record_simple_infos().core().record_count();
    assert_eq!(key_count(&twice), key_count(&once));
    for (key, record) in once.record_simple_infos().core().iter() {
        let other = twice
            .record_simple_infos()
            .core()
            .get(key)
            .expect("record present after reload");
        assert_eq!(other, record);
    }
    Ok(())
}

#[test]
fn unverified_or_unloaded_decoder_is_permissive() {
    let mut decoder = ProfileDecoder::new("", 1);

    // For all inputs, including empty strings and id 0.
    assert!(decoder.match_method("", "", MethodId(0)));
    assert!(decoder.match_and_mark_method("", "", MethodId(0)));
    assert!(decoder.match_method_checksum("a.abc", "R", MethodId(3), 0));
    assert!(decoder.type_info("a.abc", "R", MethodId(3)).is_none());
    assert!(decoder
        .hclass_tree_desc(ProfileType::new(ProfileTypeKind::Class, 1, None))
        .is_none());
    let mut visits = 0;
    decoder.for_each_hclass_tree(|_, _| visits += 1);
    decoder.for_each_proto_transition(|_, _| visits += 1);
    assert_eq!(visits, 0);

    // Mutation queries are no-ops.
    decoder.update("a.abc", "R", method(1, 50, 0));
    assert!(decoder.record_simple_infos().core().record_count() == 0);

    let report = decoder.mismatch_report();
    assert_eq!(report.profile_methods, 0);
    assert!(report.mismatched.is_empty());
}

#[test]
fn failed_verification_degrades_to_no_profile() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "stale.ap");

    let mut decoder = ProfileDecoder::new(path, 10);
    decoder.load(None)?;
    assert!(!decoder.verify(0xBAD));
    // Stale profile: ignore it, never fail compilation.
    assert!(decoder.match_method("main.abc", "EntryPoint", MethodId(999)));
    assert!(decoder.type_info("main.abc", "EntryPoint", MethodId(1)).is_none());
    Ok(())
}

#[test]
fn empty_path_short_circuits_without_io() {
    let mut decoder = ProfileDecoder::new("", 4);
    assert!(decoder.load_and_verify(&HashMap::new(), None));

    let mut checksums = HashMap::new();
    checksums.insert("main.abc".to_string(), 0x1234u32);
    assert!(decoder.load_and_verify(&checksums, None));
    assert!(!decoder.is_loaded());
}

#[test]
fn load_and_verify_checks_every_runtime_checksum() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "lv.ap");

    let mut checksums = HashMap::new();
    checksums.insert("main.abc".to_string(), 0xC0FFEEu32);

    let mut decoder = ProfileDecoder::new(&path, 10);
    assert!(decoder.load_and_verify(&checksums, None));
    assert!(decoder.is_verify_success());

    checksums.insert("other.abc".to_string(), 0xBEEF);
    let mut decoder = ProfileDecoder::new(&path, 10);
    assert!(!decoder.load_and_verify(&checksums, None));
    assert!(decoder.is_loaded());
    assert!(!decoder.is_verify_success());
    Ok(())
}

#[test]
fn rejects_wrong_extension_and_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let txt = dir.path().join("profile.txt");
    std::fs::write(&txt, b"not a profile").expect("write");

    let mut decoder = ProfileDecoder::new(&txt, 1);
    assert!(decoder.load(None).is_err());
    assert!(!decoder.is_loaded());

    let mut decoder = ProfileDecoder::new(dir.path().join("absent.ap"), 1);
    assert!(decoder.load(None).is_err());
    assert!(!decoder.is_loaded());
}

#[test]
fn mismatch_report_tracks_unmatched_methods() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "mark.ap");

    let mut decoder = ProfileDecoder::new(path, 10);
    decoder.load(None)?;
    decoder.verify(0xC0FFEE);

    assert!(decoder.match_and_mark_method("main.abc", "EntryPoint", MethodId(1)));
    let report = decoder.mismatch_report();
    assert_eq!(report.profile_methods, 2); // hot methods only
    assert_eq!(report.matched_methods, 1);
    assert_eq!(report.mismatched.len(), 1);
    assert_eq!(report.mismatched[0].1, MethodId(7));
    Ok(())
}

#[test]
fn text_export_describes_the_profile() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "text.ap");

    let mut decoder = ProfileDecoder::new(path, 1);
    decoder.load_full(None)?;

    let out = dir.path().join("dump.txt");
    approf::inspector::ApInspector::save_text(&decoder, &out)?;
    let text = std::fs::read_to_string(&out)?;
    assert!(text.contains("func_1"));
    assert!(text.contains("main.abc"));
    assert!(text.contains("hclass-tree"));

    // Unloaded decoders cannot be exported.
    let empty = ProfileDecoder::new("", 1);
    assert!(approf::inspector::ApInspector::save_text(&empty, &out).is_err());
    Ok(())
}

#[test]
fn full_load_keeps_cold_methods_in_detail_view() -> approf::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_profile(dir.path(), "detail.ap");

    let mut decoder = ProfileDecoder::new(path, 10);
    decoder.load_full(None)?;
    let detail = decoder.record_detail_infos().expect("detail view");
    assert_eq!(detail.core().method_count(), 3);
    // The simple view still filters by the threshold.
    assert_eq!(decoder.record_simple_infos().core().method_count(), 2);
    Ok(())
}
