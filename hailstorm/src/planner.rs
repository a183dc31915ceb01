//! First-pass chunk planning
//!
//! The planner walks the resource list once and decides, for every resource,
//! which chunk its blob and its metadata record land in. Chunk selection and
//! creation are delegated to a caller [`ChunkStrategy`]; whenever the
//! strategy asks for a new chunk (or a selected chunk runs out of capacity)
//! the chunk list grows and selection restarts for the same resource, so the
//! strategy always sees the chunk set it will be judged against.

use tracing::debug;

use crate::format::{ChunkType, HailstormChunk};
use crate::layout::{align_to, METADATA_ALIGN};
use crate::writer::{HailstormWriteData, HailstormWriteParams};
use crate::DataView;

/// Default capacity of chunks produced by [`DefaultChunkStrategy`], 32 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Chunk destinations selected for one resource.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormWriteChunkRef {
    /// Chunk index where the blob should be stored.
    pub data_chunk: u16,
    /// Chunk index where the metadata record should be stored. Ignored when
    /// a metadata mapping routes this resource to an already stored record.
    pub meta_chunk: u16,
    /// Create a new chunk, using `data_chunk` as its base definition.
    pub data_create: bool,
    /// Create a new chunk, using `meta_chunk` as its base definition.
    pub meta_create: bool,
}

/// Heuristics steering how resources are distributed over chunks.
///
/// `select_chunk` picks destinations from the existing chunk set;
/// `create_chunk` defines a new chunk when selection requested one or the
/// selected chunk has no room left. After every creation the planner re-runs
/// selection for the same resource against the grown chunk list.
pub trait ChunkStrategy {
    /// Pick the destination chunks for one resource.
    fn select_chunk(
        &mut self,
        resource_meta: DataView<'_>,
        resource_data: DataView<'_>,
        chunks: &[HailstormChunk],
    ) -> HailstormWriteChunkRef;

    /// Define a new chunk. `base_chunk` is the currently selected chunk (or
    /// an all-zero chunk when the cluster starts without any), letting the
    /// definition derive from what it is replacing.
    ///
    /// Chunks created for blob destinations must be of type
    /// [`ChunkType::FileData`] or [`ChunkType::Mixed`]; chunks created for
    /// metadata destinations must be [`ChunkType::Metadata`].
    fn create_chunk(
        &mut self,
        resource_meta: DataView<'_>,
        resource_data: DataView<'_>,
        base_chunk: HailstormChunk,
    ) -> HailstormChunk;
}

/// The built-in strategy: mixed 32 MiB chunks with regular persistence,
/// always filling the most recently created chunk. A resource too large for
/// an empty default chunk gets an exclusive chunk sized to fit it exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChunkStrategy;

impl ChunkStrategy for DefaultChunkStrategy {
    fn select_chunk(
        &mut self,
        _resource_meta: DataView<'_>,
        _resource_data: DataView<'_>,
        chunks: &[HailstormChunk],
    ) -> HailstormWriteChunkRef {
        // Pick the last chunk; when it is too small the planner asks for a
        // new chunk and repeats the selection.
        let last_chunk = (chunks.len() - 1) as u16;
        HailstormWriteChunkRef {
            data_chunk: last_chunk,
            meta_chunk: last_chunk,
            ..HailstormWriteChunkRef::default()
        }
    }

    fn create_chunk(
        &mut self,
        resource_meta: DataView<'_>,
        resource_data: DataView<'_>,
        mut base_chunk: HailstormChunk,
    ) -> HailstormChunk {
        use crate::format::ChunkPersistence;

        if base_chunk.size == 0 {
            base_chunk.align = 8;
            base_chunk.kind = ChunkType::Mixed;
            base_chunk.persistence = ChunkPersistence::Regular;
            base_chunk.size = DEFAULT_CHUNK_SIZE as u64;
        }

        // The metadata record lands first, the blob follows at its own
        // alignment.
        let exclusive_size =
            align_to(resource_meta.size(), resource_data.align()) + resource_data.size();
        if exclusive_size > DEFAULT_CHUNK_SIZE {
            base_chunk.size = exclusive_size as u64;
            base_chunk.align = resource_data.align().max(METADATA_ALIGN) as u32;
        }
        base_chunk
    }
}

/// Everything the first pass learned about the cluster being written.
#[derive(Debug)]
pub(crate) struct WritePlan {
    /// All chunks, sizes reduced to their aligned used byte counts.
    pub chunks: Vec<HailstormChunk>,
    /// Final chunk destinations per resource.
    pub refs: Vec<HailstormWriteChunkRef>,
    /// Path block size, already rounded up to a multiple of 8.
    pub paths_size: u32,
    /// At least one data view is deferred; the synchronous path needs a
    /// resource writer.
    pub requires_resource_writer: bool,
}

/// `true` when an entry of `size`/`align` still fits the chunk's capacity
/// after the bytes already accounted for.
fn entry_fits(chunk: &HailstormChunk, used: usize, size: usize, align: usize) -> bool {
    align_to(used, align) + size <= chunk.size as usize
}

pub(crate) fn plan_cluster(
    params: &mut HailstormWriteParams<'_>,
    write_data: &HailstormWriteData<'_>,
) -> WritePlan {
    let res_count = write_data.paths.len();
    let has_mapping = !write_data.metadata_mapping.is_empty();

    for chunk in params.initial_chunks {
        assert!(
            (chunk.align as usize).is_power_of_two(),
            "initial chunk alignments must be powers of two"
        );
    }

    let mut chunks: Vec<HailstormChunk> =
        Vec::with_capacity((params.estimated_chunk_count as usize).max(params.initial_chunks.len()));
    chunks.extend_from_slice(params.initial_chunks);
    // App-specific chunks never accumulate resource bytes; their declared
    // size is their content size and must survive the final sizing pass.
    let mut sizes: Vec<usize> = chunks
        .iter()
        .map(|chunk| match chunk.kind {
            ChunkType::AppSpecific => chunk.size as usize,
            _ => 0,
        })
        .collect();

    if chunks.is_empty() {
        let empty = DataView::deferred(0, METADATA_ALIGN);
        let first = params
            .strategy
            .create_chunk(empty, empty, HailstormChunk::default());
        append_created(&mut chunks, &mut sizes, first);
    }

    let mut refs = vec![HailstormWriteChunkRef::default(); res_count];
    // Tracks, per metadata record, the first resource that stored it.
    let mut metatracker = vec![u32::MAX; write_data.metadata_mapping.len()];
    // The leading block is reserved, keeping the path block non-empty and
    // zero-terminated even for clusters without paths.
    let mut paths_size = 8usize;
    let mut requires_resource_writer = false;

    let mut idx = 0;
    while idx < res_count {
        let meta_idx = if has_mapping {
            write_data.metadata_mapping[idx] as usize
        } else {
            idx
        };
        let meta = write_data.metadata[meta_idx];
        let data = write_data.data[idx];

        // Even one deferred data view forces the callback requirement.
        requires_resource_writer |= data.is_deferred();

        let mut chunk_ref = params.strategy.select_chunk(meta, data, &chunks);

        let mut shared_metadata = false;
        if !chunk_ref.data_create && !chunk_ref.meta_create {
            assert!(
                (chunk_ref.data_chunk as usize) < chunks.len()
                    && (chunk_ref.meta_chunk as usize) < chunks.len(),
                "chunk selection returned an out-of-range chunk index"
            );

            // A mapped metadata record already stored by an earlier resource
            // pins the metadata chunk to that resource's choice.
            if has_mapping && metatracker[meta_idx] != u32::MAX {
                shared_metadata = true;
                chunk_ref.meta_chunk = refs[metatracker[meta_idx] as usize].meta_chunk;
            }

            let data_chunk = chunk_ref.data_chunk as usize;
            let meta_chunk = chunk_ref.meta_chunk as usize;
            let meta_size = if shared_metadata { 0 } else { meta.size() };

            // Check capacity, accounting for the alignment pads the new
            // entries would require.
            if data_chunk == meta_chunk {
                let after_meta = align_to(sizes[data_chunk], METADATA_ALIGN) + meta_size;
                chunk_ref.data_create |=
                    !entry_fits(&chunks[data_chunk], after_meta, data.size(), data.align());
            } else {
                chunk_ref.data_create |=
                    !entry_fits(&chunks[data_chunk], sizes[data_chunk], data.size(), data.align());
                if !shared_metadata {
                    chunk_ref.meta_create |= !entry_fits(
                        &chunks[meta_chunk],
                        sizes[meta_chunk],
                        meta_size,
                        METADATA_ALIGN,
                    );
                }
            }
        }

        if chunk_ref.data_create {
            let base = chunks[chunk_ref.data_chunk as usize];
            let new_chunk = params.strategy.create_chunk(meta, data, base);
            assert!(
                new_chunk.kind.holds_data(),
                "chunks created for blob destinations must hold data"
            );
            debug!(
                index = chunks.len(),
                kind = ?new_chunk.kind,
                capacity = new_chunk.size,
                "created chunk"
            );
            append_created(&mut chunks, &mut sizes, new_chunk);
        }

        if chunk_ref.meta_create {
            assert!(
                !shared_metadata,
                "shared metadata never creates a new chunk"
            );
            let base = chunks[chunk_ref.meta_chunk as usize];
            let new_chunk = params.strategy.create_chunk(meta, data, base);
            assert!(
                new_chunk.kind == ChunkType::Metadata,
                "chunks created for metadata destinations must be metadata-only"
            );
            debug!(
                index = chunks.len(),
                kind = ?new_chunk.kind,
                capacity = new_chunk.size,
                "created chunk"
            );
            append_created(&mut chunks, &mut sizes, new_chunk);
        }

        // When chunks were created, redo the selection for this resource.
        if chunk_ref.data_create || chunk_ref.meta_create {
            continue;
        }

        // Update the tracker only once a final chunk pair is locked in.
        if has_mapping && metatracker[meta_idx] == u32::MAX {
            metatracker[meta_idx] = idx as u32;
        }

        let data_chunk = chunk_ref.data_chunk as usize;
        let meta_chunk = chunk_ref.meta_chunk as usize;
        assert!(
            chunks[data_chunk].kind.holds_data(),
            "selected data chunk cannot hold resource data"
        );
        assert!(
            chunks[meta_chunk].kind.holds_metadata(),
            "selected metadata chunk cannot hold resource metadata"
        );

        refs[idx] = chunk_ref;
        chunks[data_chunk].count_entries += 1;

        if !shared_metadata {
            // A mixed chunk counts the resource once.
            if data_chunk != meta_chunk {
                chunks[meta_chunk].count_entries += 1;
            }
            sizes[meta_chunk] = align_to(sizes[meta_chunk], METADATA_ALIGN) + meta.size();
        }
        sizes[data_chunk] = align_to(sizes[data_chunk], data.align()) + data.size();

        paths_size += write_data.paths[idx].len() + 1;
        idx += 1;
    }

    // The path block and every chunk keep their alignment padding.
    let paths_size = align_to(paths_size, 8);
    assert!(u32::try_from(paths_size).is_ok(), "path block exceeds 4 GiB");
    for (chunk, used) in chunks.iter_mut().zip(&sizes) {
        chunk.size = align_to(*used, chunk.align as usize) as u64;
    }

    WritePlan {
        chunks,
        refs,
        paths_size: paths_size as u32,
        requires_resource_writer,
    }
}

fn append_created(
    chunks: &mut Vec<HailstormChunk>,
    sizes: &mut Vec<usize>,
    mut chunk: HailstormChunk,
) {
    chunk.offset = 0;
    chunk.count_entries = 0;
    assert!(
        chunks.len() < u16::MAX as usize,
        "cluster cannot hold more than 65535 chunks"
    );
    chunks.push(chunk);
    sizes.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::HailstormWriteData;

    fn plan(
        strategy: &mut dyn ChunkStrategy,
        write_data: &HailstormWriteData<'_>,
    ) -> WritePlan {
        let mut params = HailstormWriteParams::new(strategy);
        plan_cluster(&mut params, write_data)
    }

    #[test]
    fn single_resource_fills_one_mixed_chunk() {
        let blob = [1u8, 2, 3, 4];
        let meta = [0xAAu8; 4];
        let write_data = HailstormWriteData {
            paths: &["a"],
            data: &[DataView::new(&blob, 4)],
            metadata: &[DataView::new(&meta, 4)],
            ..HailstormWriteData::default()
        };

        let mut strategy = DefaultChunkStrategy;
        let plan = plan(&mut strategy, &write_data);

        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].kind, ChunkType::Mixed);
        assert_eq!(plan.chunks[0].align, 8);
        // 4 metadata bytes, blob at offset 4, rounded up to the chunk align
        assert_eq!(plan.chunks[0].size, 8);
        assert_eq!(plan.chunks[0].count_entries, 1);
        // reserved leading block + "a" + NUL, rounded to 8
        assert_eq!(plan.paths_size, 16);
        assert!(!plan.requires_resource_writer);
    }

    #[test]
    fn deferred_views_require_a_resource_writer() {
        let meta = [0u8; 8];
        let write_data = HailstormWriteData {
            paths: &["streamed"],
            data: &[DataView::deferred(1024, 8)],
            metadata: &[DataView::new(&meta, 8)],
            ..HailstormWriteData::default()
        };

        let mut strategy = DefaultChunkStrategy;
        let plan = plan(&mut strategy, &write_data);
        assert!(plan.requires_resource_writer);
    }

    #[test]
    fn full_chunks_spill_into_created_ones() {
        /// Mixed chunks with a tiny fixed capacity.
        struct SmallChunks;
        impl ChunkStrategy for SmallChunks {
            fn select_chunk(
                &mut self,
                meta: DataView<'_>,
                data: DataView<'_>,
                chunks: &[HailstormChunk],
            ) -> HailstormWriteChunkRef {
                DefaultChunkStrategy.select_chunk(meta, data, chunks)
            }

            fn create_chunk(
                &mut self,
                _meta: DataView<'_>,
                _data: DataView<'_>,
                mut base: HailstormChunk,
            ) -> HailstormChunk {
                base.align = 8;
                base.kind = ChunkType::Mixed;
                base.size = 64;
                base
            }
        }

        let blob = [7u8; 24];
        let meta = [1u8; 8];
        let views = [DataView::new(&blob, 8); 3];
        let metas = [DataView::new(&meta, 8); 3];
        let write_data = HailstormWriteData {
            paths: &["a", "b", "c"],
            data: &views,
            metadata: &metas,
            ..HailstormWriteData::default()
        };

        let mut strategy = SmallChunks;
        let plan = plan(&mut strategy, &write_data);

        // Two resources per 64 byte chunk (8 meta + 24 data each).
        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(plan.refs[0].data_chunk, 0);
        assert_eq!(plan.refs[1].data_chunk, 0);
        assert_eq!(plan.refs[2].data_chunk, 1);
        assert_eq!(plan.chunks[0].count_entries, 2);
        assert_eq!(plan.chunks[1].count_entries, 1);
    }

    #[test]
    fn oversized_resources_get_an_exclusive_chunk() {
        let meta = [0u8; 16];
        let write_data = HailstormWriteData {
            paths: &["big"],
            data: &[DataView::deferred(DEFAULT_CHUNK_SIZE + 1, 8)],
            metadata: &[DataView::new(&meta, 8)],
            ..HailstormWriteData::default()
        };

        let mut strategy = DefaultChunkStrategy;
        let plan = plan(&mut strategy, &write_data);

        // The seeded default chunk stays empty, the resource lands in an
        // exclusive chunk sized to fit it exactly.
        assert_eq!(plan.chunks.len(), 2);
        assert_eq!(plan.chunks[0].size, 0);
        assert_eq!(plan.refs[0].data_chunk, 1);
        assert_eq!(
            plan.chunks[1].size as usize,
            align_to(16 + DEFAULT_CHUNK_SIZE + 1, 8)
        );
    }

    #[test]
    fn shared_metadata_counts_and_sizes_once() {
        let blob_a = [1u8; 8];
        let blob_b = [2u8; 8];
        let meta = [9u8; 16];
        let write_data = HailstormWriteData {
            paths: &["a", "b"],
            data: &[DataView::new(&blob_a, 8), DataView::new(&blob_b, 8)],
            metadata: &[DataView::new(&meta, 8)],
            metadata_mapping: &[0, 0],
            ..HailstormWriteData::default()
        };

        let mut strategy = DefaultChunkStrategy;
        let plan = plan(&mut strategy, &write_data);

        assert_eq!(plan.chunks.len(), 1);
        // Both blobs, one metadata record: 16 + 8 + 8 bytes used.
        assert_eq!(plan.chunks[0].size, 32);
        assert_eq!(plan.chunks[0].count_entries, 2);
        assert_eq!(plan.refs[0].meta_chunk, plan.refs[1].meta_chunk);
    }
}
