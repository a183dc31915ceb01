//! Second-pass cluster emission
//!
//! Writing is plan-then-emit: the planner decides where every blob and
//! metadata record lives, the layout computer turns the plan into absolute
//! offsets, and the emitter replays the resource list as positioned writes
//! through a sink. The emitter is the same code for both public write
//! operations, only the sink differs.

use tracing::debug;

use crate::error::{WriteError, WriteResult};
use crate::format::{
    ChunkType, HailstormChunk, HailstormHeader, HailstormPaths, HailstormResource,
};
use crate::layout::{align_to, cluster_layout, ClusterOffsets, CHUNK_BOUNDARY_ALIGN, METADATA_ALIGN};
use crate::planner::{plan_cluster, ChunkStrategy, WritePlan};
use crate::sink::{AsyncSink, BufferSink, ClusterSink, ClusterWriteSink, ResourceWriter};
use crate::DataView;

/// Identity carried in the cluster header: pack id, expansion/patch chain
/// position, producer version and the content flags. All values are
/// informational to this library and default to a plain base pack.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HailstormPackInfo {
    /// Producer semantic version.
    pub version: [u8; 3],
    pub is_encrypted: bool,
    pub is_expansion: bool,
    pub is_patch: bool,
    pub is_baked: bool,
    /// Application-assigned pack identifier; patch and expansion packs set
    /// this to the id of the pack they update.
    pub pack_id: u32,
    pub pack_expansion_ver: u16,
    pub pack_patch_ver: u16,
}

/// Everything to be stored in a cluster.
///
/// The `paths`, `data` and (absent a mapping) `metadata` lists run parallel,
/// one entry per resource. A non-empty `metadata_mapping` routes resource
/// `i` to `metadata[metadata_mapping[i]]`, letting many resources share one
/// record. Shared records are written once, by their first resource.
#[derive(Debug, Clone, Copy)]
pub struct HailstormWriteData<'a> {
    /// One path per resource. Any string identifier works; URI-style paths
    /// are the convention.
    pub paths: &'a [&'a str],
    /// One blob view per resource. Deferred views are streamed through the
    /// resource writer (or the async sink) during emission.
    pub data: &'a [DataView<'a>],
    /// Metadata records; always resident.
    pub metadata: &'a [DataView<'a>],
    /// Optional table mapping each resource to its metadata record.
    pub metadata_mapping: &'a [u32],
    /// Header identity values.
    pub pack_info: HailstormPackInfo,
    /// Opaque values copied into the header.
    pub custom_values: [u32; 2],
}

impl Default for HailstormWriteData<'_> {
    fn default() -> Self {
        Self {
            paths: &[],
            data: &[],
            metadata: &[],
            metadata_mapping: &[],
            pack_info: HailstormPackInfo::default(),
            custom_values: [0; 2],
        }
    }
}

/// Control surface of a synchronous cluster write.
pub struct HailstormWriteParams<'a> {
    /// Chunk selection/creation heuristics driving the planner.
    pub strategy: &'a mut dyn ChunkStrategy,
    /// Chunks present before planning starts. The list is not curated;
    /// empty chunks end up in the cluster as-is. This is also the only way
    /// to put app-specific chunks into a cluster.
    pub initial_chunks: &'a [HailstormChunk],
    /// Expected number of chunks in the final cluster, sizes the planner's
    /// scratch allocations.
    pub estimated_chunk_count: u32,
    /// Producer of deferred resource bytes and app-specific chunk payloads.
    pub resource_writer: Option<&'a mut dyn ResourceWriter>,
}

impl<'a> HailstormWriteParams<'a> {
    pub fn new(strategy: &'a mut dyn ChunkStrategy) -> Self {
        Self {
            strategy,
            initial_chunks: &[],
            estimated_chunk_count: 0,
            resource_writer: None,
        }
    }

    pub fn with_resource_writer(mut self, writer: &'a mut dyn ResourceWriter) -> Self {
        self.resource_writer = Some(writer);
        self
    }
}

/// Control surface of an asynchronous cluster write: the synchronous params
/// plus the caller's positioned-write sink.
pub struct HailstormAsyncWriteParams<'a> {
    pub base: HailstormWriteParams<'a>,
    pub sink: &'a mut dyn ClusterWriteSink,
}

/// Create a new cluster and return its bytes as one owned buffer.
///
/// Chunk selection is delegated to the strategy in `params`; the layout,
/// alignment, descriptor tables and the path block are handled here. On
/// failure (a resource writer refusing a write) the partially written
/// buffer is dropped and no result is observable.
///
/// # Panics
///
/// Panics when the write data lists disagree in size, when a deferred data
/// view is present without a resource writer, or when the strategy violates
/// its contract. Correct callers cannot trigger these.
pub fn write_cluster<'a>(
    params: &'a mut HailstormWriteParams<'a>,
    write_data: &HailstormWriteData<'_>,
) -> WriteResult<Vec<u8>> {
    validate_write_data(write_data);

    let mut plan = plan_cluster(params, write_data);
    let (offsets, total) = cluster_layout(write_data.paths.len(), &plan.chunks, plan.paths_size);
    if plan.requires_resource_writer {
        assert!(
            params.resource_writer.is_some(),
            "deferred data views require a resource writer"
        );
    }
    debug!(
        total,
        chunks = plan.chunks.len(),
        resources = write_data.paths.len(),
        "writing cluster into an owned buffer"
    );

    let mut sink = BufferSink::new(total, params.resource_writer.as_deref_mut());
    let produced = emit_cluster(&mut sink, write_data, &mut plan, &offsets, total)?;
    Ok(produced.expect("the buffer sink owns the cluster memory"))
}

/// Create a new cluster as a stream of positioned writes to the caller's
/// sink callbacks.
///
/// Write requests carry absolute offsets and are not guaranteed to be issued
/// in offset order. The sink is opened with the total cluster size before
/// the first write and closed exactly once on every exit path.
///
/// # Panics
///
/// Same contract violations as [`write_cluster`].
pub fn write_cluster_async(
    params: &mut HailstormAsyncWriteParams<'_>,
    write_data: &HailstormWriteData<'_>,
) -> WriteResult<()> {
    validate_write_data(write_data);

    let mut plan = plan_cluster(&mut params.base, write_data);
    let (offsets, total) = cluster_layout(write_data.paths.len(), &plan.chunks, plan.paths_size);
    debug!(
        total,
        chunks = plan.chunks.len(),
        resources = write_data.paths.len(),
        "writing cluster through async sink"
    );

    let mut sink = AsyncSink::open(&mut *params.sink, total as u64)?;
    match emit_cluster(&mut sink, write_data, &mut plan, &offsets, total) {
        Ok(_) => Ok(()),
        Err(err) => {
            // The operation is abandoned but the sink still gets its close.
            let _ = sink.close_once();
            Err(err)
        }
    }
}

fn validate_write_data(write_data: &HailstormWriteData<'_>) {
    let count = write_data.paths.len();
    assert_eq!(
        count,
        write_data.data.len(),
        "every resource path requires a matching data view"
    );
    if write_data.metadata_mapping.is_empty() {
        assert_eq!(
            count,
            write_data.metadata.len(),
            "without a metadata mapping every resource requires its own metadata view"
        );
    } else {
        assert!(
            count <= write_data.metadata_mapping.len(),
            "the metadata mapping must cover every resource"
        );
    }
    assert!(
        count <= u16::MAX as usize,
        "a cluster cannot hold more than 65535 resources"
    );
    for (idx, path) in write_data.paths.iter().enumerate() {
        assert!(
            path.len() <= u16::MAX as usize,
            "path of resource {idx} exceeds the maximum length"
        );
    }
    for (idx, meta) in write_data.metadata.iter().enumerate() {
        assert!(!meta.is_deferred(), "metadata view {idx} must be resident");
    }
}

fn ensure(accepted: bool, offset: u64) -> WriteResult<()> {
    if accepted {
        Ok(())
    } else {
        Err(WriteError::WriteRejected(offset))
    }
}

/// Drive the second pass through `sink`. Aborts on the first refused write;
/// scratch state is dropped on every path.
fn emit_cluster<S: ClusterSink>(
    sink: &mut S,
    write_data: &HailstormWriteData<'_>,
    plan: &mut WritePlan,
    offsets: &ClusterOffsets,
    total: usize,
) -> WriteResult<Option<Vec<u8>>> {
    let res_count = write_data.paths.len();
    let has_mapping = !write_data.metadata_mapping.is_empty();
    let info = write_data.pack_info;

    assert!(
        u32::try_from(offsets.paths_data).is_ok(),
        "header region exceeds the path descriptor's range"
    );

    let header = HailstormHeader {
        header_size: offsets.data as u64,
        offset_next: total as u64,
        offset_data: offsets.data as u64,
        version: info.version,
        is_encrypted: info.is_encrypted,
        is_expansion: info.is_expansion,
        is_patch: info.is_patch,
        is_baked: info.is_baked,
        count_chunks: plan.chunks.len() as u16,
        count_resources: res_count as u16,
        pack_slice_alignment: 0,
        pack_id: info.pack_id,
        pack_expansion_ver: info.pack_expansion_ver,
        pack_patch_ver: info.pack_patch_ver,
        app_custom_values: write_data.custom_values,
    };
    let paths_info = HailstormPaths {
        offset: offsets.paths_data as u32,
        size: plan.paths_size,
    };

    // Chunk payloads are laid out contiguously, each starting at a multiple
    // of 8.
    let mut payload_cursor = offsets.data;
    for chunk in &mut plan.chunks {
        chunk.offset = payload_cursor as u64;
        payload_cursor = align_to(payload_cursor + chunk.size as usize, CHUNK_BOUNDARY_ALIGN);
    }

    let mut encoded = Vec::with_capacity(plan.chunks.len() * HailstormChunk::SIZE);
    header.encode_into(&mut encoded);
    ensure(sink.write_bytes(&encoded, 0), 0)?;

    encoded.clear();
    paths_info.encode_into(&mut encoded);
    ensure(
        sink.write_bytes(&encoded, offsets.paths_info as u64),
        offsets.paths_info as u64,
    )?;

    encoded.clear();
    for chunk in &plan.chunks {
        chunk.encode_into(&mut encoded);
    }
    ensure(
        sink.write_bytes(&encoded, offsets.chunks as u64),
        offsets.chunks as u64,
    )?;

    // Scratch for the resource table and the path block; per-chunk used
    // counters and the metadata tracker start over for the second pass.
    let mut resources = vec![HailstormResource::default(); res_count];
    let mut paths_block = vec![0u8; plan.paths_size as usize];
    let mut used = vec![0usize; plan.chunks.len()];
    let mut metatracker = vec![u32::MAX; write_data.metadata_mapping.len()];
    let mut paths_cursor = 0usize;

    for idx in 0..res_count {
        let chunk_ref = plan.refs[idx];
        let data_chunk = chunk_ref.data_chunk as usize;
        let meta_chunk = chunk_ref.meta_chunk as usize;

        // For mapped metadata, remember which resource stored the record
        // first; later resources only copy its location.
        let (meta_idx, previous) = if has_mapping {
            let mapped = write_data.metadata_mapping[idx] as usize;
            (mapped, std::mem::replace(&mut metatracker[mapped], idx as u32))
        } else {
            (idx, u32::MAX)
        };

        let (meta_offset, meta_size) = if previous == u32::MAX {
            let meta = write_data.metadata[meta_idx];
            let offset = align_to(used[meta_chunk], METADATA_ALIGN);
            let absolute = plan.chunks[meta_chunk].offset + offset as u64;
            ensure(sink.write_metadata(write_data, meta_idx, absolute), absolute)?;
            used[meta_chunk] = offset + meta.size();
            (offset as u32, meta.size() as u32)
        } else {
            let first = &resources[previous as usize];
            (first.meta_offset, first.meta_size)
        };

        let data = write_data.data[idx];
        let chunk = plan.chunks[data_chunk];
        assert!(
            data.align() <= chunk.align as usize,
            "resource alignment exceeds its chunk's alignment"
        );
        let offset = align_to(used[data_chunk], data.align());
        let absolute = chunk.offset + offset as u64;
        ensure(sink.write_resource(write_data, idx, absolute), absolute)?;
        used[data_chunk] = offset + data.size();

        let path = write_data.paths[idx];
        paths_block[paths_cursor..paths_cursor + path.len()].copy_from_slice(path.as_bytes());
        paths_block[paths_cursor + path.len()] = 0;

        resources[idx] = HailstormResource {
            chunk: chunk_ref.data_chunk as u32,
            meta_chunk: chunk_ref.meta_chunk as u32,
            offset: offset as u32,
            size: data.size() as u32,
            size_origin: data.size() as u32,
            meta_offset,
            meta_size,
            path_offset: paths_cursor as u32,
            path_size: path.len() as u16,
            ..HailstormResource::default()
        };
        paths_cursor += path.len() + 1;
    }

    // App-specific chunks are filled last, once all resources landed.
    for chunk in plan.chunks.iter().filter(|c| c.kind == ChunkType::AppSpecific) {
        ensure(
            sink.write_custom_chunk(write_data, chunk, chunk.offset),
            chunk.offset,
        )?;
    }

    // The path block tail past `paths_cursor` is already zero-filled.
    encoded.clear();
    for resource in &resources {
        resource.encode_into(&mut encoded);
    }
    ensure(
        sink.write_bytes(&encoded, offsets.resources as u64),
        offsets.resources as u64,
    )?;
    ensure(
        sink.write_bytes(&paths_block, offsets.paths_data as u64),
        offsets.paths_data as u64,
    )?;

    sink.finalize()
}
