//! Cluster header decoding

use std::io::Cursor;
use tracing::debug;

use crate::error::{ReadError, ReadResult};
use crate::format::{
    HailstormChunk, HailstormHeader, HailstormHeaderBase, HailstormPaths, HailstormResource,
};
use crate::layout::GIB;
use crate::{HAILSTORM_HEADER_VERSION_V0, HAILSTORM_MAGIC};

/// Decoded view of a cluster's header data.
///
/// Produced by [`read_header`]. The descriptor tables are decoded into owned
/// vectors; the path block stays a borrowed slice of the input and is empty
/// when the input did not include path data.
#[derive(Debug)]
pub struct HailstormData<'a> {
    pub header: HailstormHeader,
    pub paths: HailstormPaths,
    pub chunks: Vec<HailstormChunk>,
    pub resources: Vec<HailstormResource>,
    pub paths_data: &'a [u8],
}

impl HailstormData<'_> {
    /// The path string of `resource`, or `None` when the path block is
    /// absent or the descriptor points outside of it.
    pub fn resource_path(&self, resource: &HailstormResource) -> Option<&str> {
        let start = resource.path_offset as usize;
        let end = start + resource.path_size as usize;
        let bytes = self.paths_data.get(start..end)?;
        std::str::from_utf8(bytes).ok()
    }
}

/// Decode a cluster from `data`, which must contain at least the whole
/// header data block.
///
/// The input is never mutated; all descriptor tables are validated to fit
/// within it before decoding. Resource payloads are not touched.
pub fn read_header(data: &[u8]) -> ReadResult<HailstormData<'_>> {
    if data.len() < HailstormHeaderBase::SIZE {
        return Err(ReadError::InvalidPackData);
    }

    let base = HailstormHeaderBase::parse(&mut Cursor::new(data))
        .map_err(|_| ReadError::InvalidPackData)?;
    if base.magic != HAILSTORM_MAGIC
        || base.header_version != HAILSTORM_HEADER_VERSION_V0
        || base.header_size >= GIB
    {
        return Err(ReadError::InvalidPackData);
    }

    if (data.len() as u64) < base.header_size {
        return Err(ReadError::IncompleteHeaderData);
    }

    if data.len() < HailstormHeader::SIZE + HailstormPaths::SIZE {
        return Err(ReadError::IncompleteHeaderData);
    }
    let mut cursor = Cursor::new(data);
    let header =
        HailstormHeader::parse(&mut cursor).map_err(|_| ReadError::IncompleteHeaderData)?;

    if header.count_chunks == 0 {
        return Err(ReadError::EmptyPack);
    }

    let paths =
        HailstormPaths::parse(&mut cursor).map_err(|_| ReadError::IncompleteHeaderData)?;

    // Both tables follow the path descriptor back to back.
    let tables_end = HailstormHeader::SIZE
        + HailstormPaths::SIZE
        + header.count_chunks as usize * HailstormChunk::SIZE
        + header.count_resources as usize * HailstormResource::SIZE;
    if data.len() < tables_end {
        return Err(ReadError::IncompleteHeaderData);
    }

    let mut chunks = Vec::with_capacity(header.count_chunks as usize);
    for _ in 0..header.count_chunks {
        chunks.push(
            HailstormChunk::parse(&mut cursor).map_err(|_| ReadError::IncompleteHeaderData)?,
        );
    }

    let mut resources = Vec::with_capacity(header.count_resources as usize);
    for _ in 0..header.count_resources {
        resources.push(
            HailstormResource::parse(&mut cursor)
                .map_err(|_| ReadError::IncompleteHeaderData)?,
        );
    }

    // Check, without overflowing, that the payload region is addressable
    // with the platform size type.
    let last_chunk = chunks.last().expect("count_chunks was validated above");
    let payload_end = last_chunk
        .offset
        .checked_add(last_chunk.size)
        .ok_or(ReadError::LargePackNotSupported)?;
    if usize::try_from(payload_end).is_err() {
        return Err(ReadError::LargePackNotSupported);
    }

    // Expose the path block only when the input actually contains it; a
    // header-only read yields an empty view.
    let paths_data = if paths.size as usize <= data.len() - tables_end {
        let start = paths.offset as usize;
        data.get(start..start + paths.size as usize).unwrap_or(&[])
    } else {
        &[]
    };

    debug!(
        chunks = header.count_chunks,
        resources = header.count_resources,
        paths_bytes = paths_data.len(),
        "decoded cluster header"
    );

    Ok(HailstormData {
        header,
        paths,
        chunks,
        resources,
        paths_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChunkType;

    /// A minimal valid cluster: one empty mixed chunk, no resources.
    fn minimal_cluster() -> Vec<u8> {
        let chunk = HailstormChunk {
            offset: 112,
            size: 0,
            align: 8,
            kind: ChunkType::Mixed,
            ..HailstormChunk::default()
        };
        let paths = HailstormPaths {
            offset: 104,
            size: 8,
        };
        let header = HailstormHeader {
            header_size: 112,
            offset_next: 112,
            offset_data: 112,
            count_chunks: 1,
            count_resources: 0,
            ..HailstormHeader::default()
        };

        let mut out = Vec::new();
        header.encode_into(&mut out);
        paths.encode_into(&mut out);
        chunk.encode_into(&mut out);
        out.extend_from_slice(&[0u8; 8]); // empty path block
        out
    }

    #[test]
    fn decodes_a_minimal_cluster() {
        let bytes = minimal_cluster();
        let parsed = read_header(&bytes).unwrap();
        assert_eq!(parsed.header.count_chunks, 1);
        assert_eq!(parsed.chunks.len(), 1);
        assert!(parsed.resources.is_empty());
        assert_eq!(parsed.paths_data.len(), 8);
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(read_header(&[]), Err(ReadError::InvalidPackData)));
        let bytes = minimal_cluster();
        assert!(matches!(
            read_header(&bytes[..12]),
            Err(ReadError::InvalidPackData)
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_cluster();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            read_header(&bytes),
            Err(ReadError::InvalidPackData)
        ));
    }

    #[test]
    fn rejects_bad_header_version() {
        let mut bytes = minimal_cluster();
        bytes[4] = b'X';
        assert!(matches!(
            read_header(&bytes),
            Err(ReadError::InvalidPackData)
        ));
    }

    #[test]
    fn rejects_implausible_header_size() {
        let mut bytes = minimal_cluster();
        bytes[8..16].copy_from_slice(&(2u64 * 1024 * 1024 * 1024).to_le_bytes());
        assert!(matches!(
            read_header(&bytes),
            Err(ReadError::InvalidPackData)
        ));
    }

    #[test]
    fn rejects_truncated_header_data() {
        let bytes = minimal_cluster();
        assert!(matches!(
            read_header(&bytes[..bytes.len() - 16]),
            Err(ReadError::IncompleteHeaderData)
        ));
    }

    #[test]
    fn rejects_chunkless_packs() {
        let mut bytes = minimal_cluster();
        bytes[36..38].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(read_header(&bytes), Err(ReadError::EmptyPack)));
    }
}
