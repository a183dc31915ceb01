//! Sink abstractions the emitter writes through
//!
//! The emitter is written once against [`ClusterSink`] and never assumes
//! sequential output: every step is "write these bytes at this absolute
//! offset". Two sinks satisfy the contract: [`BufferSink`] copies into one
//! owned allocation, [`AsyncSink`] forwards each positioned write to the
//! caller's [`ClusterWriteSink`] callbacks.

use crate::error::{WriteError, WriteResult};
use crate::format::HailstormChunk;
use crate::writer::HailstormWriteData;

/// Caller-provided producer of resource bytes for the synchronous path.
///
/// Required whenever a [`crate::DataView`] in the write data is deferred
/// (the blob is streamed directly into the destination buffer) or the
/// cluster contains app-specific chunks.
pub trait ResourceWriter {
    /// Produce the bytes of resource `resource_index` directly into
    /// `destination`, which is pre-sliced to the resource's exact size.
    fn write_resource(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        resource_index: u32,
        destination: &mut [u8],
    ) -> bool {
        let _ = (write_data, resource_index, destination);
        unimplemented!("deferred resource data requires a write_resource override")
    }

    /// Fill the payload of an app-specific chunk. `destination` covers the
    /// chunk's whole payload region.
    fn write_custom_chunk(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        chunk: &HailstormChunk,
        destination: &mut [u8],
    ) -> bool {
        let _ = (write_data, chunk, destination);
        unimplemented!("app-specific chunks require a write_custom_chunk override")
    }
}

/// Caller-provided positioned-write callbacks for [`crate::write_cluster_async`].
///
/// Write requests are not guaranteed to arrive in offset order; every
/// implementation must honor the offset it is given. Each call must complete
/// before the next one is issued; the emitter does not pipeline writes.
pub trait ClusterWriteSink {
    /// The cluster's total size is known; acquire the output.
    fn open(&mut self, total_size: u64) -> bool;

    /// Write raw header/table bytes.
    fn write_header(&mut self, bytes: &[u8], offset: u64) -> bool;

    /// Write the metadata record `meta_index` of the write data.
    fn write_metadata(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        meta_index: u32,
        offset: u64,
    ) -> bool;

    /// Write the blob of resource `resource_index` of the write data.
    fn write_resource(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        resource_index: u32,
        offset: u64,
    ) -> bool;

    /// Fill the payload region of an app-specific chunk.
    fn write_custom_chunk(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        chunk: &HailstormChunk,
        offset: u64,
    ) -> bool;

    /// All writes are done (or the operation was abandoned).
    fn close(&mut self) -> bool;
}

/// The operation set the emitter drives; each write reports validity and a
/// refusal aborts the whole operation.
pub(crate) trait ClusterSink {
    fn write_bytes(&mut self, bytes: &[u8], offset: u64) -> bool;

    fn write_metadata(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        meta_index: usize,
        offset: u64,
    ) -> bool;

    fn write_resource(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        resource_index: usize,
        offset: u64,
    ) -> bool;

    fn write_custom_chunk(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        chunk: &HailstormChunk,
        offset: u64,
    ) -> bool;

    /// Finish the operation, yielding the produced memory when the sink
    /// owns any.
    fn finalize(&mut self) -> WriteResult<Option<Vec<u8>>>;
}

/// Sink owning the final cluster buffer; every write is a copy at the given
/// offset. `finalize` transfers the buffer to the caller, dropping the sink
/// earlier releases it.
pub(crate) struct BufferSink<'w> {
    buffer: Option<Vec<u8>>,
    writer: Option<&'w mut dyn ResourceWriter>,
}

impl<'w> BufferSink<'w> {
    pub(crate) fn new(total_size: usize, writer: Option<&'w mut dyn ResourceWriter>) -> Self {
        Self {
            buffer: Some(vec![0u8; total_size]),
            writer,
        }
    }

    fn buffer_mut(&mut self) -> &mut Vec<u8> {
        self.buffer
            .as_mut()
            .expect("buffer sink used after finalize")
    }
}

impl ClusterSink for BufferSink<'_> {
    fn write_bytes(&mut self, bytes: &[u8], offset: u64) -> bool {
        let offset = offset as usize;
        self.buffer_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        true
    }

    fn write_metadata(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        meta_index: usize,
        offset: u64,
    ) -> bool {
        let bytes = write_data.metadata[meta_index]
            .bytes()
            .expect("metadata views are always resident");
        self.write_bytes(bytes, offset)
    }

    fn write_resource(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        resource_index: usize,
        offset: u64,
    ) -> bool {
        let view = write_data.data[resource_index];
        match view.bytes() {
            Some(bytes) => self.write_bytes(bytes, offset),
            // Deferred blob: the caller streams the bytes straight into the
            // destination slice.
            None => {
                let offset = offset as usize;
                let Self { buffer, writer } = self;
                let buffer = buffer.as_mut().expect("buffer sink used after finalize");
                let destination = &mut buffer[offset..offset + view.size()];
                writer
                    .as_deref_mut()
                    .expect("deferred resource data requires a resource writer")
                    .write_resource(write_data, resource_index as u32, destination)
            }
        }
    }

    fn write_custom_chunk(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        chunk: &HailstormChunk,
        offset: u64,
    ) -> bool {
        let offset = offset as usize;
        let Self { buffer, writer } = self;
        let buffer = buffer.as_mut().expect("buffer sink used after finalize");
        let destination = &mut buffer[offset..offset + chunk.size as usize];
        writer
            .as_deref_mut()
            .expect("app-specific chunks require a resource writer")
            .write_custom_chunk(write_data, chunk, destination)
    }

    fn finalize(&mut self) -> WriteResult<Option<Vec<u8>>> {
        Ok(self.buffer.take())
    }
}

/// Adapter driving a caller [`ClusterWriteSink`]; closes exactly once on
/// every exit path.
pub(crate) struct AsyncSink<'a> {
    sink: &'a mut dyn ClusterWriteSink,
    open: bool,
}

impl<'a> AsyncSink<'a> {
    pub(crate) fn open(
        sink: &'a mut dyn ClusterWriteSink,
        total_size: u64,
    ) -> WriteResult<Self> {
        if !sink.open(total_size) {
            return Err(WriteError::OpenRejected(total_size));
        }
        Ok(Self { sink, open: true })
    }

    /// Close the underlying sink unless it was closed already.
    pub(crate) fn close_once(&mut self) -> bool {
        if std::mem::take(&mut self.open) {
            self.sink.close()
        } else {
            true
        }
    }
}

impl ClusterSink for AsyncSink<'_> {
    fn write_bytes(&mut self, bytes: &[u8], offset: u64) -> bool {
        self.sink.write_header(bytes, offset)
    }

    fn write_metadata(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        meta_index: usize,
        offset: u64,
    ) -> bool {
        self.sink.write_metadata(write_data, meta_index as u32, offset)
    }

    fn write_resource(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        resource_index: usize,
        offset: u64,
    ) -> bool {
        self.sink
            .write_resource(write_data, resource_index as u32, offset)
    }

    fn write_custom_chunk(
        &mut self,
        write_data: &HailstormWriteData<'_>,
        chunk: &HailstormChunk,
        offset: u64,
    ) -> bool {
        self.sink.write_custom_chunk(write_data, chunk, offset)
    }

    fn finalize(&mut self) -> WriteResult<Option<Vec<u8>>> {
        if self.close_once() {
            Ok(None)
        } else {
            Err(WriteError::CloseRejected)
        }
    }
}

impl Drop for AsyncSink<'_> {
    fn drop(&mut self) {
        // The emitter closes on every ordinary exit path; this covers
        // unwinding out of a caller callback.
        let _ = self.close_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_copies_at_offsets_and_yields_the_buffer() {
        let mut sink = BufferSink::new(16, None);
        assert!(sink.write_bytes(&[1, 2, 3], 4));
        assert!(sink.write_bytes(&[9], 15));

        let buffer = sink.finalize().unwrap().unwrap();
        assert_eq!(buffer.len(), 16);
        assert_eq!(&buffer[4..7], &[1, 2, 3]);
        assert_eq!(buffer[15], 9);
        // Untouched bytes stay zero.
        assert_eq!(&buffer[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn async_sink_closes_exactly_once() {
        #[derive(Default)]
        struct CountingSink {
            opened: u32,
            closed: u32,
        }
        impl ClusterWriteSink for CountingSink {
            fn open(&mut self, _total_size: u64) -> bool {
                self.opened += 1;
                true
            }
            fn write_header(&mut self, _bytes: &[u8], _offset: u64) -> bool {
                true
            }
            fn write_metadata(
                &mut self,
                _write_data: &HailstormWriteData<'_>,
                _meta_index: u32,
                _offset: u64,
            ) -> bool {
                true
            }
            fn write_resource(
                &mut self,
                _write_data: &HailstormWriteData<'_>,
                _resource_index: u32,
                _offset: u64,
            ) -> bool {
                true
            }
            fn write_custom_chunk(
                &mut self,
                _write_data: &HailstormWriteData<'_>,
                _chunk: &HailstormChunk,
                _offset: u64,
            ) -> bool {
                true
            }
            fn close(&mut self) -> bool {
                self.closed += 1;
                true
            }
        }

        let mut counting = CountingSink::default();
        {
            let mut sink = AsyncSink::open(&mut counting, 128).unwrap();
            assert!(sink.finalize().unwrap().is_none());
            // Dropping after finalize must not close again.
        }
        assert_eq!(counting.opened, 1);
        assert_eq!(counting.closed, 1);

        {
            let _sink = AsyncSink::open(&mut counting, 128).unwrap();
            // Dropped while open: the drop guard closes.
        }
        assert_eq!(counting.opened, 2);
        assert_eq!(counting.closed, 2);
    }
}
