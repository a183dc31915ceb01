//! Hailstorm cluster reading and writing
//!
//! A Hailstorm cluster is a single binary archive that groups many named
//! resources (blob + metadata pairs) into fixed-layout *chunks*. The file
//! starts with a small header block followed by the path table and the chunk
//! payloads:
//!
//! ```text
//! [header] [paths descriptor] [chunk table] [resource table] [path data] [chunk 0] [chunk 1] ...
//! ```
//!
//! Chunks are the unit of loading: each carries an alignment requirement, a
//! persistence hint and a content type (metadata-only, data-only, mixed or
//! app-specific). Writing a cluster is a two-pass operation: a planning pass
//! assigns every blob and metadata record to a chunk (creating chunks on
//! demand through a [`ChunkStrategy`]), then an emit pass produces the final
//! byte layout either into one owned buffer ([`write_cluster`]) or as a
//! stream of positioned writes to caller callbacks ([`write_cluster_async`]).
//!
//! ## Quick start
//!
//! ```rust
//! use hailstorm::{DataView, DefaultChunkStrategy, HailstormWriteData, HailstormWriteParams};
//!
//! let blob = [0x01u8, 0x02, 0x03, 0x04];
//! let meta = *b"meta";
//!
//! let mut strategy = DefaultChunkStrategy;
//! let mut params = HailstormWriteParams::new(&mut strategy);
//! let data = HailstormWriteData {
//!     paths: &["textures/grass.dds"],
//!     data: &[DataView::new(&blob, 4)],
//!     metadata: &[DataView::new(&meta, 4)],
//!     ..HailstormWriteData::default()
//! };
//!
//! let cluster = hailstorm::write_cluster(&mut params, &data).unwrap();
//! let parsed = hailstorm::read_header(&cluster).unwrap();
//! assert_eq!(parsed.chunks.len(), 1);
//! assert_eq!(parsed.resources.len(), 1);
//! ```

pub mod error;
pub mod format;
mod layout;
pub mod paths;
pub mod planner;
pub mod read;
pub mod sink;
pub mod writer;

pub use error::{ReadError, ReadResult, WriteError, WriteResult};
pub use format::{
    ChunkPersistence, ChunkType, HailstormChunk, HailstormHeader, HailstormPaths,
    HailstormResource,
};
pub use paths::{prefix_resource_paths, prefixed_resource_paths_size};
pub use planner::{
    ChunkStrategy, DefaultChunkStrategy, HailstormWriteChunkRef, DEFAULT_CHUNK_SIZE,
};
pub use read::{read_header, HailstormData};
pub use sink::{ClusterWriteSink, ResourceWriter};
pub use writer::{
    write_cluster, write_cluster_async, HailstormAsyncWriteParams, HailstormPackInfo,
    HailstormWriteData, HailstormWriteParams,
};

/// Magic tag identifying the Hailstorm format; stored as the bytes `ISHS`.
pub const HAILSTORM_MAGIC: u32 = u32::from_le_bytes(*b"ISHS");

/// Tag of the `HSC0` header revision, the only revision this crate speaks.
pub const HAILSTORM_HEADER_VERSION_V0: u32 = u32::from_le_bytes(*b"HSC0");

/// A borrowed view of resource bytes together with their required alignment.
///
/// A view may be *deferred*: the byte size and alignment are known up front
/// but the bytes themselves are produced later, directly into the destination
/// buffer, through [`ResourceWriter::write_resource`] (or the async sink's
/// resource callback). Deferred views let large blobs be streamed into the
/// cluster without ever being resident in memory.
#[derive(Debug, Clone, Copy)]
pub struct DataView<'a> {
    bytes: Option<&'a [u8]>,
    size: usize,
    align: usize,
}

impl<'a> DataView<'a> {
    /// View over resident bytes.
    pub fn new(bytes: &'a [u8], align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self {
            bytes: Some(bytes),
            size: bytes.len(),
            align,
        }
    }

    /// View of known size whose bytes are produced during the write.
    pub fn deferred(size: usize, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self {
            bytes: None,
            size,
            align,
        }
    }

    /// The viewed bytes, or `None` for a deferred view.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        self.bytes
    }

    /// Byte size of the viewed data.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Required placement alignment, always a power of two.
    pub fn align(&self) -> usize {
        self.align
    }

    /// `true` when the bytes are produced later through a writer callback.
    pub fn is_deferred(&self) -> bool {
        self.bytes.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_constants_match_their_ascii_tags() {
        assert_eq!(HAILSTORM_MAGIC.to_le_bytes(), *b"ISHS");
        assert_eq!(HAILSTORM_HEADER_VERSION_V0.to_le_bytes(), *b"HSC0");
    }

    #[test]
    fn data_view_tracks_deferral() {
        let bytes = [1u8, 2, 3];
        let view = DataView::new(&bytes, 1);
        assert_eq!(view.size(), 3);
        assert!(!view.is_deferred());

        let deferred = DataView::deferred(1024, 8);
        assert_eq!(deferred.size(), 1024);
        assert!(deferred.bytes().is_none());
        assert!(deferred.is_deferred());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn data_view_rejects_non_power_of_two_alignment() {
        let bytes = [0u8; 4];
        let _ = DataView::new(&bytes, 3);
    }
}
