//! The offline merge entry point.
//!
//! Concatenates profiles from multiple processes/workers: each input is
//! loaded in parallel through the full (detail) path, then folded into an
//! `init_merge_data` accumulator whose pool-id space absorbs every input.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::decoder::ProfileDecoder;
use crate::error::Result;
use crate::inspector::ApInspector;
use crate::writer::ProfileWriter;

/// The offline `.ap` merge tool surface.
#[derive(Debug)]
pub struct ApMerger;

impl ApMerger {
    /// Loads every input `.ap` file and merges them into one accumulator
    /// decoder. Inputs load in parallel; the fold itself is sequential so id
    /// remapping stays deterministic in input order.
    pub fn merge_files<P: AsRef<Path> + Sync>(
        inputs: &[P],
        hotness_threshold: u32,
    ) -> Result<ProfileDecoder> {
        let loaded: Vec<ProfileDecoder> = inputs
            .par_iter()
            .map(|path| {
                let mut decoder =
                    ProfileDecoder::new(PathBuf::from(path.as_ref()), hotness_threshold);
                decoder.load_full(None)?;
                Ok(decoder)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut accumulator = ProfileDecoder::new("", hotness_threshold);
        accumulator.init_merge_data();
        for decoder in &loaded {
            accumulator.merge(decoder);
        }
        Ok(accumulator)
    }

    /// Merges the inputs and writes the result as a binary `.ap` file.
    pub fn merge_to_file<P: AsRef<Path> + Sync>(
        inputs: &[P],
        output: &Path,
        hotness_threshold: u32,
    ) -> Result<()> {
        let accumulator = Self::merge_files(inputs, hotness_threshold)?;
        ProfileWriter::default().save(output, &accumulator)
    }

    /// Merges the inputs and writes a human-readable text dump.
    pub fn merge_to_text<P: AsRef<Path> + Sync>(
        inputs: &[P],
        output: &Path,
        hotness_threshold: u32,
    ) -> Result<()> {
        let accumulator = Self::merge_files(inputs, hotness_threshold)?;
        ApInspector::save_text(&accumulator, output)
    }
}
