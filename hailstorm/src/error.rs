//! Error types for cluster reading and writing

use thiserror::Error;

/// Result type for cluster reads.
pub type ReadResult<T> = std::result::Result<T, ReadError>;

/// Result type for cluster writes.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Failures while decoding a cluster header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The given arguments are not valid for the attempted operation.
    #[error("invalid argument")]
    InvalidArgument,

    /// Input was not recognized as a Hailstorm cluster: too short for the
    /// base header, wrong magic, wrong header version or an implausible
    /// declared header size.
    #[error("data is not a valid hailstorm cluster")]
    InvalidPackData,

    /// The input is a Hailstorm cluster but does not contain the whole
    /// header data block.
    #[error("cluster header data is incomplete")]
    IncompleteHeaderData,

    /// The cluster was produced by a format revision this library does not
    /// understand.
    #[error("cluster data is not compatible with this library version")]
    IncompatiblePackData,

    /// The cluster payload region cannot be addressed with the platform's
    /// size type.
    #[error("cluster is too large for this platform")]
    LargePackNotSupported,

    /// The cluster declares no chunks at all. Chunks without resources are
    /// allowed, a cluster without chunks is not.
    #[error("cluster contains no chunks")]
    EmptyPack,
}

/// Failures while emitting a cluster.
///
/// Every variant maps to a sink step refusing a positioned write; the
/// emitter abandons the operation on the first refusal and releases all
/// scratch state before returning.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The sink refused to open for the computed total cluster size.
    #[error("sink rejected opening a {0} byte cluster")]
    OpenRejected(u64),

    /// The sink refused a positioned write.
    #[error("sink rejected a write at offset {0}")]
    WriteRejected(u64),

    /// The sink refused to close after all writes completed.
    #[error("sink rejected close")]
    CloseRejected,
}
