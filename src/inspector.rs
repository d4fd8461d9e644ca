//! Tools for inspecting loaded profiles.
//!
//! Renders a human-readable text dump of a decoder (header, bytecode-file
//! checksums, abc pool, record tables) for diagnostics. The dump is not
//! designed for round-trip reload.

use std::fmt::Write as _;
use std::path::Path;

use crate::decoder::ProfileDecoder;
use crate::error::{ApError, Result};

/// The profile inspector tool.
#[derive(Debug)]
pub struct ApInspector;

impl ApInspector {
    /// Renders a loaded decoder as text. Fails on an unloaded decoder.
    pub fn render_text(decoder: &ProfileDecoder) -> Result<String> {
        let header = decoder
            .header()
            .ok_or_else(|| ApError::Format("Decoder is not loaded".into()))?;

        let mut out = String::new();
        let w = &mut out;
        let fmt_err = |e: std::fmt::Error| ApError::Internal(e.to_string());

        writeln!(w, "[header]").map_err(fmt_err)?;
        writeln!(w, "version: {}.{}", header.version.major, header.version.minor)
            .map_err(fmt_err)?;
        writeln!(w, "flags: {:#06x}", header.flags.bits()).map_err(fmt_err)?;
        writeln!(
            w,
            "profile-type-with-abc-id: {}",
            header.supports_profile_type_with_abc_id()
        )
        .map_err(fmt_err)?;
        writeln!(w, "method-checksum: {}", header.supports_method_checksum()).map_err(fmt_err)?;
        writeln!(w, "aot-compatible: {}", header.is_compatible_with_aot_file()).map_err(fmt_err)?;

        writeln!(w, "\n[panda-file-infos]").map_err(fmt_err)?;
        for checksum in decoder.panda_file_infos().iter() {
            writeln!(w, "checksum: {checksum:#010x}").map_err(fmt_err)?;
        }

        writeln!(w, "\n[abc-file-pool]").map_err(fmt_err)?;
        {
            let pool = decoder
                .abc_pool();
            let pool = pool
                .read()
                .map_err(|_| ApError::Internal("abc pool lock poisoned".into()))?;
            for (id, entry) in pool.iter() {
                writeln!(w, "{}: {}", id.value(), entry.normalized_desc).map_err(fmt_err)?;
            }
        }

        writeln!(w, "\n[records]").map_err(fmt_err)?;
        // Prefer the exhaustive view when the decoder carries one.
        let core = decoder
            .record_detail_infos()
            .map(|d| d.core())
            .unwrap_or_else(|| decoder.record_simple_infos().core());
        for (key, record) in core.iter() {
            writeln!(w, "record {} (abc {})", key.record_name, key.abc_id.value())
                .map_err(fmt_err)?;
            for method in record.methods.values() {
                writeln!(
                    w,
                    "  method {} '{}' samples={} checksum={:#010x}",
                    method.method_id.value(),
                    method.name,
                    method.sample_count,
                    method.checksum
                )
                .map_err(fmt_err)?;
            }
            for tree in &record.hclass_trees {
                writeln!(
                    w,
                    "  hclass-tree root=({:?} {}) edges={}",
                    tree.root.kind,
                    tree.root.id,
                    tree.transitions.len()
                )
                .map_err(fmt_err)?;
            }
            if !record.proto_transitions.is_empty() {
                writeln!(w, "  proto-transitions: {}", record.proto_transitions.len())
                    .map_err(fmt_err)?;
            }
        }
        Ok(out)
    }

    /// Writes the text dump to a file (the decoder's `SaveAPTextFile`).
    pub fn save_text<P: AsRef<Path>>(decoder: &ProfileDecoder, path: P) -> Result<()> {
        let text = Self::render_text(decoder)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
