//! Defines the physical binary layout of `.ap` profile containers.
//!
//! # Layout
//! The file starts with a fixed header followed by a self-describing section
//! table; the header is the single source of truth for where every section
//! lives, so new sections can be appended and ignored by older readers.
//!
//! File: `[FileHeader + SectionTable] [Section 0] [Section 1] ...`
//!
//! ## Section Anatomy
//! Each section is self-contained:
//! `[ SectionMeta (1 byte) ] [ Compressed Payload ]`
//!
//! The header is never overlaid on mapped memory: [`ProfileHeader::parse_from_bytes`]
//! validates field-by-field and builds an owned value, because `.ap` files are
//! untrusted input.

use crate::error::{ApError, Result};

/// Magic bytes identifying the profile container: "APF1".
pub const MAGIC_BYTES: [u8; 4] = *b"APF1";

/// The fixed size of the header before the section table.
/// Magic(4) + Major(2) + Minor(2) + Flags(4) + FileSize(8) + Checksum(8) + Count(4) + Reserved(4) = 36
pub const HEADER_BASE_SIZE: usize = 36;

/// Upper bound on declared sections. A hostile header cannot make us allocate
/// an unbounded table.
pub const MAX_SECTIONS: u32 = 64;

/// Container format version, `major.minor`.
///
/// Same-major files are mutually readable; capability bits live in
/// [`CapabilityFlags`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Incompatible layout changes.
    pub major: u16,
    /// Backward-compatible additions within a major line.
    pub minor: u16,
}

/// The version this crate writes.
pub const CURRENT_VERSION: Version = Version { major: 1, minor: 2 };

/// The oldest version this crate fully decodes.
pub const MIN_COMPATIBLE_VERSION: Version = Version { major: 1, minor: 0 };

impl Version {
    /// Creates a version value.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Monotonic compatibility within a major line: `self` satisfies `min`
    /// when the majors match and `self` is at least `min`.
    pub fn compatible_with(&self, min: Version) -> bool {
        self.major == min.major && self.minor >= min.minor
    }
}

/// Capability bits carried in the header flags word.
///
/// Deliberately independent of [`Version`]: a capability can be probed without
/// knowing which minor release introduced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    /// Record payloads qualify every [`crate::types::ProfileType`] with an abc-file id.
    pub const PROFILE_TYPE_WITH_ABC_ID: u32 = 1 << 0;
    /// Method entries carry a per-method content checksum.
    pub const METHOD_CHECKSUM: u32 = 1 << 1;
    /// The payload is usable by the AOT compiler (not merge-only data).
    pub const AOT_COMPATIBLE: u32 = 1 << 2;

    /// All bits this crate understands.
    pub const KNOWN_MASK: u32 =
        Self::PROFILE_TYPE_WITH_ABC_ID | Self::METHOD_CHECKSUM | Self::AOT_COMPATIBLE;

    /// Creates flags from a raw bit word. Unknown bits are preserved.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bit word.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Tests a capability bit.
    pub const fn contains(&self, mask: u32) -> bool {
        (self.0 & mask) == mask
    }

    /// Union of two flag sets (used when merging profiles: capabilities never
    /// downgrade).
    pub const fn union(&self, other: CapabilityFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Section kinds known to this crate. Unknown kinds are skipped by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SectionKind {
    /// Per-bytecode-file checksum records.
    PandaFileInfo = 1,
    /// The abc-file interning pool (present only with
    /// [`CapabilityFlags::PROFILE_TYPE_WITH_ABC_ID`]).
    AbcFilePool = 2,
    /// The record/method/type payload tables.
    RecordPayload = 3,
}

impl SectionKind {
    /// Maps a raw kind tag; `None` for kinds this reader does not know.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::PandaFileInfo),
            2 => Some(Self::AbcFilePool),
            3 => Some(Self::RecordPayload),
            _ => None,
        }
    }
}

/// One entry of the section table: where a section lives inside the file.
#[derive(Debug, Clone, Copy)]
pub struct SectionDescriptor {
    /// Raw section kind tag (kept raw so unknown sections survive rewrites).
    pub kind: u32,
    /// Absolute byte offset from the start of the file.
    pub offset: u64,
    /// Section length in bytes, including the leading [`SectionMeta`] byte.
    pub size: u64,
}

impl SectionDescriptor {
    /// The size in bytes of a serialized descriptor.
    pub const SIZE: usize = 20; // 4 kind + 8 offset + 8 size

    /// Serializes to a fixed-size byte array (Little Endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.kind.to_le_bytes());
        buf[4..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..20].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Deserializes from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ApError::Format("Buffer too small for SectionDescriptor".into()));
        }
        let kind = u32::from_le_bytes(bytes[0..4].try_into().unwrap_or([0; 4]));
        let offset = u64::from_le_bytes(bytes[4..12].try_into().unwrap_or([0; 8]));
        let size = u64::from_le_bytes(bytes[12..20].try_into().unwrap_or([0; 8]));
        Ok(Self { kind, offset, size })
    }
}

/// Per-section configuration byte stored at the start of each section body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionMeta(u8);

impl SectionMeta {
    const COMPRESSION_MASK: u8 = 0b0000_0111; // Bits 0-2

    /// Creates a new SectionMeta.
    pub fn new(compression_id: u8) -> Self {
        Self(compression_id & Self::COMPRESSION_MASK)
    }

    /// Decodes the byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the compression algorithm ID (0-7).
    pub fn compression_method(&self) -> u8 {
        self.0 & Self::COMPRESSION_MASK
    }

    /// Returns the raw byte representation.
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// The parsed, owned `.ap` file header.
#[derive(Debug, Clone)]
pub struct ProfileHeader {
    /// Container format version.
    pub version: Version,
    /// Capability bits, independent of the version integer.
    pub flags: CapabilityFlags,
    /// Declared total byte length of the file.
    pub file_size: u64,
    /// XxHash64 (seed 0) of every byte after the section table.
    pub checksum: u64,
    /// The section table.
    pub sections: Vec<SectionDescriptor>,
}

impl ProfileHeader {
    /// Builds a header for freshly written or merge-accumulator data.
    pub fn new(version: Version, flags: CapabilityFlags) -> Self {
        Self {
            version,
            flags,
            file_size: 0,
            checksum: 0,
            sections: Vec::new(),
        }
    }

    /// Total serialized header size (base + section table).
    pub fn byte_size(&self) -> usize {
        HEADER_BASE_SIZE + self.sections.len() * SectionDescriptor::SIZE
    }

    /// Parses and validates a header from the start of a mapped buffer.
    ///
    /// Pure parsing, no I/O. Any structural violation (bad magic, truncated
    /// buffer, oversized section table, section ranges outside the declared
    /// file size) is an [`ApError::Format`]; the buffer is never trusted.
    pub fn parse_from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_BASE_SIZE {
            return Err(ApError::Format("File smaller than header".into()));
        }
        if buf[0..4] != MAGIC_BYTES {
            return Err(ApError::Format("Invalid magic bytes".into()));
        }

        let major = u16::from_le_bytes(buf[4..6].try_into().unwrap_or([0; 2]));
        let minor = u16::from_le_bytes(buf[6..8].try_into().unwrap_or([0; 2]));
        let flags = u32::from_le_bytes(buf[8..12].try_into().unwrap_or([0; 4]));
        let file_size = u64::from_le_bytes(buf[12..20].try_into().unwrap_or([0; 8]));
        let checksum = u64::from_le_bytes(buf[20..28].try_into().unwrap_or([0; 8]));
        let section_count = u32::from_le_bytes(buf[28..32].try_into().unwrap_or([0; 4]));
        // buf[32..36] reserved

        if section_count > MAX_SECTIONS {
            return Err(ApError::Format(format!(
                "Section count {section_count} exceeds limit {MAX_SECTIONS}"
            )));
        }
        let table_end = HEADER_BASE_SIZE + section_count as usize * SectionDescriptor::SIZE;
        if buf.len() < table_end {
            return Err(ApError::Format("Truncated section table".into()));
        }
        if file_size > buf.len() as u64 {
            return Err(ApError::Format(format!(
                "Declared size {file_size} exceeds mapped length {}",
                buf.len()
            )));
        }
        if file_size < table_end as u64 {
            return Err(ApError::Format("Declared size smaller than header".into()));
        }

        let mut sections = Vec::with_capacity(section_count as usize);
        for i in 0..section_count as usize {
            let entry_start = HEADER_BASE_SIZE + i * SectionDescriptor::SIZE;
            let desc = SectionDescriptor::from_bytes(&buf[entry_start..entry_start + SectionDescriptor::SIZE])?;
            let end = desc.offset.checked_add(desc.size).ok_or_else(|| {
                ApError::Format("Section range overflows u64".into())
            })?;
            if desc.offset < table_end as u64 || end > file_size {
                return Err(ApError::Format(format!(
                    "Section {} range [{}, {}) outside file body",
                    desc.kind, desc.offset, end
                )));
            }
            sections.push(desc);
        }

        Ok(Self {
            version: Version { major, minor },
            flags: CapabilityFlags::from_bits(flags),
            file_size,
            checksum,
            sections,
        })
    }

    /// Serializes the header and section table (Little Endian).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.byte_size());
        buf.extend_from_slice(&MAGIC_BYTES);
        buf.extend_from_slice(&self.version.major.to_le_bytes());
        buf.extend_from_slice(&self.version.minor.to_le_bytes());
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());
        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&(self.sections.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        for desc in &self.sections {
            buf.extend_from_slice(&desc.to_bytes());
        }
        buf
    }

    /// Finds the first section of a known kind.
    pub fn section(&self, kind: SectionKind) -> Option<&SectionDescriptor> {
        self.sections.iter().find(|d| d.kind == kind as u32)
    }

    /// Whether `other` satisfies this header's minimum-compatibility contract.
    ///
    /// Policy: same major line, minor at least as new as `other` requires.
    pub fn compatible_verify(&self, other: Version) -> bool {
        self.version.compatible_with(other)
    }

    /// Whether record payloads qualify profile types with an abc-file id.
    pub fn supports_profile_type_with_abc_id(&self) -> bool {
        self.flags.contains(CapabilityFlags::PROFILE_TYPE_WITH_ABC_ID)
    }

    /// Whether method entries carry content checksums.
    pub fn supports_method_checksum(&self) -> bool {
        self.flags.contains(CapabilityFlags::METHOD_CHECKSUM)
    }

    /// Whether the payload may feed AOT compilation (vs merge-only data).
    pub fn is_compatible_with_aot_file(&self) -> bool {
        self.flags.contains(CapabilityFlags::AOT_COMPATIBLE)
    }
}
