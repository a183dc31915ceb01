//! On-disk structures of the Hailstorm cluster format
//!
//! All multi-byte integers are little-endian and every structure is packed:
//! the base header is 16 bytes, the full `HSC0` header 64, the path
//! descriptor 8, a chunk descriptor 32 and a resource descriptor 36. The
//! codecs here translate between those packed records and the typed structs;
//! validation of whole clusters lives in [`crate::read`].

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::{HAILSTORM_HEADER_VERSION_V0, HAILSTORM_MAGIC};

/// Compression type values standardized by the format. Values 1-15 are
/// application specific when the [`COMPRESSION_APP_SPECIFIC`] flag is set.
pub const COMPRESSION_NONE: u8 = 0;
pub const COMPRESSION_ZLIB: u8 = 1;
pub const COMPRESSION_ZSTD: u8 = 2;
pub const COMPRESSION_QOI: u8 = 3;
pub const COMPRESSION_QOA: u8 = 4;
pub const COMPRESSION_APP_SPECIFIC: u8 = 16;

/// Chunk flag: the chunk is part of a bigger resource spanning multiple
/// chunks that needs to be loaded together.
pub const CHUNK_FLAG_PARTIAL: u8 = 0x1;
/// Chunk flag: spans multiple chunks that can be loaded independently.
/// Implies [`CHUNK_FLAG_PARTIAL`].
pub const CHUNK_FLAG_STREAMED: u8 = 0x3;

/// The kind of content stored in a chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// Contents undefined by the format, filled through the custom-chunk
    /// write callback.
    #[default]
    AppSpecific = 0,
    /// Only resource metadata records.
    Metadata = 1,
    /// Only resource blobs.
    FileData = 2,
    /// Metadata records and blobs interleaved.
    Mixed = 3,
}

impl ChunkType {
    /// Decode from the low two bits of the packed chunk byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::AppSpecific,
            1 => Self::Metadata,
            2 => Self::FileData,
            _ => Self::Mixed,
        }
    }

    /// `true` when resource blobs may be stored in this chunk.
    pub fn holds_data(self) -> bool {
        matches!(self, Self::FileData | Self::Mixed)
    }

    /// `true` when resource metadata may be stored in this chunk.
    pub fn holds_metadata(self) -> bool {
        matches!(self, Self::Metadata | Self::Mixed)
    }
}

/// The preferred loading strategy for a chunk. A hint for readers, never
/// interpreted by this library.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkPersistence {
    /// One-use data that can be released soon after loading.
    #[default]
    Temporary = 0,
    /// On-demand loading, unloadable when unused.
    Regular = 1,
    /// Keep loaded when memory allows, to reduce repeated loads.
    LoadIfPossible = 2,
    /// Accessed constantly, should never be unloaded.
    LoadAlways = 3,
}

impl ChunkPersistence {
    /// Decode from a two-bit field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Temporary,
            1 => Self::Regular,
            2 => Self::LoadIfPossible,
            _ => Self::LoadAlways,
        }
    }
}

/// The 16 byte header prefix shared by every format revision.
///
/// Loading `header_size` bytes from the start of a cluster is enough to
/// decode the full header, all descriptor tables and the path data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HailstormHeaderBase {
    pub magic: u32,
    pub header_version: u32,
    pub header_size: u64,
}

impl HailstormHeaderBase {
    pub const SIZE: usize = 16;

    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            magic: r.read_u32::<LittleEndian>()?,
            header_version: r.read_u32::<LittleEndian>()?,
            header_size: r.read_u64::<LittleEndian>()?,
        })
    }
}

/// The full `HSC0` cluster header, 64 bytes on disk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormHeader {
    /// Total bytes from the file start through the end of the path data;
    /// equal to the offset of the first chunk payload.
    pub header_size: u64,
    /// Byte size of this entire cluster, payloads included.
    pub offset_next: u64,
    /// Absolute offset where the first chunk's payload region begins.
    pub offset_data: u64,
    /// Producer semantic version, informational.
    pub version: [u8; 3],
    /// All chunk payloads are encrypted separately.
    pub is_encrypted: bool,
    /// This pack only extends a base pack.
    pub is_expansion: bool,
    /// This pack only updates resources of an existing pack.
    pub is_patch: bool,
    /// Contents are pre-baked and directly consumable.
    pub is_baked: bool,
    pub count_chunks: u16,
    pub count_resources: u16,
    /// When non-zero, a power of two >= 4096 that every chunk offset is
    /// rounded up to. Zero means no slicing.
    pub pack_slice_alignment: u32,
    /// Application-assigned pack identifier.
    pub pack_id: u32,
    pub pack_expansion_ver: u16,
    pub pack_patch_ver: u16,
    /// Opaque application values.
    pub app_custom_values: [u32; 2],
}

impl HailstormHeader {
    pub const SIZE: usize = 64;

    /// Decode a header positioned at the start of `r`. The magic and
    /// version fields are read but not validated here.
    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let base = HailstormHeaderBase::parse(r)?;
        let offset_next = r.read_u64::<LittleEndian>()?;
        let offset_data = r.read_u64::<LittleEndian>()?;
        let mut version = [0u8; 3];
        r.read_exact(&mut version)?;
        let flags = r.read_u8()?;
        let count_chunks = r.read_u16::<LittleEndian>()?;
        let count_resources = r.read_u16::<LittleEndian>()?;
        let pack_slice_alignment = r.read_u32::<LittleEndian>()?;
        let pack_id = r.read_u32::<LittleEndian>()?;
        let pack_expansion_ver = r.read_u16::<LittleEndian>()?;
        let pack_patch_ver = r.read_u16::<LittleEndian>()?;
        let _reserved = r.read_u32::<LittleEndian>()?;
        let app_custom_values = [
            r.read_u32::<LittleEndian>()?,
            r.read_u32::<LittleEndian>()?,
        ];

        Ok(Self {
            header_size: base.header_size,
            offset_next,
            offset_data,
            version,
            is_encrypted: flags & 0x1 != 0,
            is_expansion: flags & 0x2 != 0,
            is_patch: flags & 0x4 != 0,
            is_baked: flags & 0x8 != 0,
            count_chunks,
            count_resources,
            pack_slice_alignment,
            pack_id,
            pack_expansion_ver,
            pack_patch_ver,
            app_custom_values,
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&HAILSTORM_MAGIC.to_le_bytes());
        out.extend_from_slice(&HAILSTORM_HEADER_VERSION_V0.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.offset_next.to_le_bytes());
        out.extend_from_slice(&self.offset_data.to_le_bytes());
        out.extend_from_slice(&self.version);

        let flags = u8::from(self.is_encrypted)
            | u8::from(self.is_expansion) << 1
            | u8::from(self.is_patch) << 2
            | u8::from(self.is_baked) << 3;
        out.push(flags);

        out.extend_from_slice(&self.count_chunks.to_le_bytes());
        out.extend_from_slice(&self.count_resources.to_le_bytes());
        out.extend_from_slice(&self.pack_slice_alignment.to_le_bytes());
        out.extend_from_slice(&self.pack_id.to_le_bytes());
        out.extend_from_slice(&self.pack_expansion_ver.to_le_bytes());
        out.extend_from_slice(&self.pack_patch_ver.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        for value in self.app_custom_values {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Locates the path data block. Optional, the block may be absent from a
/// header-only read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormPaths {
    /// Absolute byte offset of the path block.
    pub offset: u32,
    /// Byte length of the path block, zero-padded to a multiple of 8.
    pub size: u32,
}

impl HailstormPaths {
    pub const SIZE: usize = 8;

    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            offset: r.read_u32::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }
}

/// A contiguous region of the cluster holding metadata and/or blobs for a
/// subset of resources; the unit of loading and persistence hinting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormChunk {
    /// Absolute offset of the chunk payload, always a multiple of 8.
    pub offset: u64,
    /// Payload size on disk. During planning this holds the chunk's
    /// capacity instead.
    pub size: u64,
    /// Alignment of the chunk payload. Every resource stored inside has an
    /// alignment requirement no larger than this.
    pub align: u32,
    pub kind: ChunkType,
    pub persistence: ChunkPersistence,
    /// Partial/streamed markers, low 4 bits used.
    pub flags: u8,
    /// Opaque application value.
    pub app_custom_value: u32,
    /// Number of resources whose data or metadata lives in this chunk.
    pub count_entries: u32,
}

impl HailstormChunk {
    pub const SIZE: usize = 32;

    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let offset = r.read_u64::<LittleEndian>()?;
        let size = r.read_u64::<LittleEndian>()?;
        let align = r.read_u32::<LittleEndian>()?;
        let packed = r.read_u8()?;
        let mut _reserved = [0u8; 3];
        r.read_exact(&mut _reserved)?;
        let app_custom_value = r.read_u32::<LittleEndian>()?;
        let count_entries = r.read_u32::<LittleEndian>()?;

        Ok(Self {
            offset,
            size,
            align,
            kind: ChunkType::from_bits(packed),
            persistence: ChunkPersistence::from_bits(packed >> 2),
            flags: (packed >> 4) & 0xF,
            app_custom_value,
            count_entries,
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.align.to_le_bytes());
        out.push(self.kind as u8 | (self.persistence as u8) << 2 | (self.flags & 0xF) << 4);
        out.extend_from_slice(&[0u8; 3]); // reserved
        out.extend_from_slice(&self.app_custom_value.to_le_bytes());
        out.extend_from_slice(&self.count_entries.to_le_bytes());
    }
}

/// Locates one resource's blob, metadata and path within the cluster.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormResource {
    /// Index of the chunk storing the blob.
    pub chunk: u32,
    /// Index of the chunk storing the metadata record.
    pub meta_chunk: u32,
    /// Blob offset relative to its chunk payload.
    pub offset: u32,
    /// Blob size as stored.
    pub size: u32,
    /// Decompressed blob size; equals `size` when uncompressed.
    pub size_origin: u32,
    /// Metadata offset relative to its chunk payload, a multiple of 8.
    pub meta_offset: u32,
    pub meta_size: u32,
    /// Byte offset of the path string within the path block.
    pub path_offset: u32,
    /// Path length, excluding the trailing NUL.
    pub path_size: u16,
    /// One of the `COMPRESSION_*` values, 5 bits.
    pub compression_type: u8,
    /// Compression level when the algorithm supports one, 3 bits.
    pub compression_level: u8,
    /// Free-form decompression parameter.
    pub compression_param: u8,
}

impl HailstormResource {
    pub const SIZE: usize = 36;

    pub fn parse<R: Read>(r: &mut R) -> io::Result<Self> {
        let chunk = r.read_u32::<LittleEndian>()?;
        let meta_chunk = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u32::<LittleEndian>()?;
        let size = r.read_u32::<LittleEndian>()?;
        let size_origin = r.read_u32::<LittleEndian>()?;
        let meta_offset = r.read_u32::<LittleEndian>()?;
        let meta_size = r.read_u32::<LittleEndian>()?;
        let path_offset = r.read_u32::<LittleEndian>()?;
        let path_size = r.read_u16::<LittleEndian>()?;
        let compression = r.read_u8()?;
        let compression_param = r.read_u8()?;

        Ok(Self {
            chunk,
            meta_chunk,
            offset,
            size,
            size_origin,
            meta_offset,
            meta_size,
            path_offset,
            path_size,
            compression_type: compression & 0x1F,
            compression_level: compression >> 5,
            compression_param,
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.chunk.to_le_bytes());
        out.extend_from_slice(&self.meta_chunk.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.size_origin.to_le_bytes());
        out.extend_from_slice(&self.meta_offset.to_le_bytes());
        out.extend_from_slice(&self.meta_size.to_le_bytes());
        out.extend_from_slice(&self.path_offset.to_le_bytes());
        out.extend_from_slice(&self.path_size.to_le_bytes());
        out.push(self.compression_type & 0x1F | self.compression_level << 5);
        out.push(self.compression_param);
    }
}
