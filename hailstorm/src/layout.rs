//! Byte-layout arithmetic for cluster regions

use crate::format::{HailstormChunk, HailstormHeader, HailstormPaths, HailstormResource};

/// Minimum alignment of every metadata record within its chunk.
pub(crate) const METADATA_ALIGN: usize = 8;

/// Alignment of every chunk payload within the cluster.
pub(crate) const CHUNK_BOUNDARY_ALIGN: usize = 8;

pub(crate) const GIB: u64 = 1024 * 1024 * 1024;

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub(crate) const fn align_to(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value + (value.wrapping_neg() & (alignment - 1))
}

/// Absolute offsets of every region in a planned cluster.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClusterOffsets {
    pub paths_info: usize,
    pub chunks: usize,
    pub resources: usize,
    pub paths_data: usize,
    pub data: usize,
}

/// Compute the region offsets and the total byte size of a cluster with the
/// given planned chunks and (already 8-aligned) path-block size.
///
/// Chunks are laid out contiguously after the path data, each starting at a
/// multiple of 8.
pub(crate) fn cluster_layout(
    count_resources: usize,
    chunks: &[HailstormChunk],
    paths_size: u32,
) -> (ClusterOffsets, usize) {
    let mut size = HailstormHeader::SIZE;

    let paths_info = size;
    size += HailstormPaths::SIZE;

    let chunks_offset = size;
    size += chunks.len() * HailstormChunk::SIZE;

    let resources = size;
    size += count_resources * HailstormResource::SIZE;

    let paths_data = align_to(size, CHUNK_BOUNDARY_ALIGN);
    let data = paths_data + paths_size as usize;

    let total = data
        + chunks
            .iter()
            .map(|chunk| align_to(chunk.size as usize, CHUNK_BOUNDARY_ALIGN))
            .sum::<usize>();

    (
        ClusterOffsets {
            paths_info,
            chunks: chunks_offset,
            resources,
            paths_data,
            data,
        },
        total,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChunkType;

    #[test]
    fn align_to_rounds_up_to_powers_of_two() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 8), 8);
        assert_eq!(align_to(8, 8), 8);
        assert_eq!(align_to(9, 4), 12);
        assert_eq!(align_to(4095, 4096), 4096);
        assert_eq!(align_to(13, 1), 13);
    }

    #[test]
    fn layout_places_regions_back_to_back() {
        let chunks = [
            HailstormChunk {
                size: 8,
                align: 8,
                kind: ChunkType::Mixed,
                ..HailstormChunk::default()
            },
            HailstormChunk {
                size: 20,
                align: 4,
                kind: ChunkType::FileData,
                ..HailstormChunk::default()
            },
        ];

        let (offsets, total) = cluster_layout(1, &chunks, 16);
        assert_eq!(offsets.paths_info, 64);
        assert_eq!(offsets.chunks, 72);
        assert_eq!(offsets.resources, 72 + 2 * 32);
        // resource table ends at 136 + 36 = 172, rounded up to 176
        assert_eq!(offsets.paths_data, 176);
        assert_eq!(offsets.data, 192);
        // 8 + (20 rounded to 24) payload bytes
        assert_eq!(total, 192 + 8 + 24);
    }
}
