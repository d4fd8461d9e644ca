//! The Write-Side Engine: encoding decoders back into `.ap` bytes.
//!
//! Used by the offline merge tool to persist an accumulator decoder and by
//! dump tooling. The writer serializes the exhaustive detail view; a decoder
//! loaded through the simple (compile-time) path has already dropped cold
//! methods and cannot be written back faithfully.

use std::fs::File;
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use twox_hash::XxHash64;

use crate::compression::{Compressor, NoCompression};
use crate::decoder::ProfileDecoder;
use crate::error::{ApError, Result};
use crate::header::{ProfileHeader, SectionDescriptor, SectionKind, SectionMeta};

/// XxHash64 (seed 0) content hash used for the header body checksum.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// A thread-safe writer that appends data to a file and tracks the current
/// offset. Writing is inherently sequential, so a Mutex is the right tool.
#[derive(Debug)]
pub struct SeqWriter {
    inner: Mutex<WriterState>,
}

#[derive(Debug)]
struct WriterState {
    writer: BufWriter<File>,
    current_offset: u64,
}

impl SeqWriter {
    /// Creates a new SeqWriter. The file is truncated on creation.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Mutex::new(WriterState {
                writer: BufWriter::new(file),
                current_offset: 0,
            }),
        })
    }

    /// Atomically writes a complete buffer to the file.
    /// Returns the offset where the writing started.
    pub fn write_all(&self, buffer: &[u8]) -> Result<u64> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| ApError::Internal("SeqWriter Mutex poisoned".into()))?;

        let start_offset = state.current_offset;
        state.writer.write_all(buffer)?;
        state.current_offset += buffer.len() as u64;
        Ok(start_offset)
    }

    /// Flushes the buffer to disk.
    pub fn flush(&self) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| ApError::Internal("SeqWriter Mutex poisoned".into()))?;
        state.writer.flush()?;
        Ok(())
    }

    /// Returns the current file cursor position.
    pub fn current_offset(&self) -> Result<u64> {
        let state = self
            .inner
            .lock()
            .map_err(|_| ApError::Internal("SeqWriter Mutex poisoned".into()))?;
        Ok(state.current_offset)
    }
}

/// Binary encoder for `.ap` containers.
#[derive(Debug)]
pub struct ProfileWriter<'a> {
    compressor: &'a dyn Compressor,
}

impl Default for ProfileWriter<'_> {
    fn default() -> Self {
        Self {
            compressor: &NoCompression,
        }
    }
}

impl<'a> ProfileWriter<'a> {
    /// Creates a writer using the given section compressor.
    pub fn with_compressor(compressor: &'a dyn Compressor) -> Self {
        Self { compressor }
    }

    /// Encodes a loaded decoder's state as a complete `.ap` byte image.
    ///
    /// The decoder must be loaded with a detail view (`load_full` or
    /// `init_merge_data`); the header's version and capability flags are
    /// carried over unchanged.
    pub fn encode(&self, decoder: &ProfileDecoder) -> Result<Vec<u8>> {
        let header_src = decoder
            .header()
            .ok_or_else(|| ApError::Format("Decoder is not loaded".into()))?;
        let detail = decoder
            .record_detail_infos()
            .ok_or_else(|| ApError::Format("Decoder has no detail view to write".into()))?;

        let mut sections: Vec<(SectionKind, Vec<u8>)> = Vec::new();
        sections.push((
            SectionKind::PandaFileInfo,
            self.section_bytes(&decoder.panda_file_infos().encode()?)?,
        ));
        if header_src.supports_profile_type_with_abc_id() {
            let pool = decoder
                .abc_pool()
                .read()
                .map_err(|_| ApError::Internal("abc pool lock poisoned".into()))?
                .encode()?;
            sections.push((SectionKind::AbcFilePool, self.section_bytes(&pool)?));
        }
        sections.push((
            SectionKind::RecordPayload,
            self.section_bytes(&detail.core().encode()?)?,
        ));

        let mut header = ProfileHeader::new(header_src.version, header_src.flags);
        // Two passes: descriptors need the final header size, which depends on
        // the descriptor count, so fix the count first.
        for (kind, _) in &sections {
            header.sections.push(SectionDescriptor {
                kind: *kind as u32,
                offset: 0,
                size: 0,
            });
        }
        let mut offset = header.byte_size() as u64;
        let mut body = Vec::new();
        for (i, (_, bytes)) in sections.iter().enumerate() {
            header.sections[i].offset = offset;
            header.sections[i].size = bytes.len() as u64;
            offset += bytes.len() as u64;
            body.extend_from_slice(bytes);
        }
        header.file_size = offset;
        header.checksum = content_hash(&body);

        let mut out = header.to_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Encodes and writes the decoder to a `.ap` file.
    pub fn save(&self, path: &Path, decoder: &ProfileDecoder) -> Result<()> {
        let bytes = self.encode(decoder)?;
        let writer = SeqWriter::create(path)?;
        writer.write_all(&bytes)?;
        writer.flush()
    }

    /// `[SectionMeta][compressed payload]`
    fn section_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let compressed = self.compressor.compress(payload)?;
        let mut out = Vec::with_capacity(1 + compressed.len());
        out.push(SectionMeta::new(self.compressor.id()).as_u8());
        out.extend_from_slice(&compressed);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(content_hash(b""), content_hash(b""));
    }

    #[test]
    fn encode_requires_a_loaded_decoder() {
        let decoder = ProfileDecoder::default();
        assert!(ProfileWriter::default().encode(&decoder).is_err());
    }
}
