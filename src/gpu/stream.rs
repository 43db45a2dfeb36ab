// gpu/stream.rs — Two ordered command streams on one queue.
//
// wgpu exposes a single queue per device. A `CommandStream` is an ordered
// submission channel layered on top of it: it records into its own lazily
// created encoder and remembers the index of its last submission, so that
// `finish` can block on exactly that work.
//
//   record ──► encoder ──flush──► queue.submit ──finish──► poll(index)
//
// Because both streams feed one queue, stream A never overtakes stream B on
// the device; the value of keeping two streams is that the host code reads
// the way the data flows, and that the only cross-stream synchronisation is
// the explicit `StreamPair::join`.
//
// Staging buffers used by copies recorded on a stream are retained by the
// stream until its next `finish`, after which the device no longer needs
// them.

use std::fmt;

use crate::error::{DepthError, Result};
use crate::gpu::buffer::DeviceBuffer;
use crate::gpu::device::GpuDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    A,
    B,
}

impl StreamId {
    fn label(self) -> &'static str {
        match self {
            StreamId::A => "stream A",
            StreamId::B => "stream B",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub struct CommandStream {
    id: StreamId,
    encoder: Option<wgpu::CommandEncoder>,
    last_submission: Option<wgpu::SubmissionIndex>,
    retained: Vec<DeviceBuffer>,
}

impl CommandStream {
    pub fn new(id: StreamId) -> Self {
        CommandStream {
            id,
            encoder: None,
            last_submission: None,
            retained: Vec::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The encoder collecting this stream's next submission.
    pub fn encoder(&mut self, gpu: &GpuDevice) -> &mut wgpu::CommandEncoder {
        let label = self.id.label();
        self.encoder.get_or_insert_with(|| {
            gpu.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
        })
    }

    /// Keep `buffer` alive until this stream's next `finish`.
    pub fn retain(&mut self, buffer: DeviceBuffer) {
        self.retained.push(buffer);
    }

    /// Submit recorded work without waiting for it.
    pub fn flush(&mut self, gpu: &GpuDevice) -> Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let index = gpu.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(DepthError::Submission {
                stream: self.id.to_string(),
                reason: err.to_string(),
            });
        }
        tracing::trace!(stream = %self.id, "submitted");
        self.last_submission = Some(index);
        Ok(())
    }

    /// Submit recorded work and block until the device has completed it.
    pub fn finish(&mut self, gpu: &GpuDevice) -> Result<()> {
        self.flush(gpu)?;
        if let Some(index) = self.last_submission.take() {
            gpu.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        if !self.retained.is_empty() {
            tracing::trace!(stream = %self.id, count = self.retained.len(), "releasing staging buffers");
            self.retained.clear();
        }
        Ok(())
    }

    /// Drop unsubmitted work and retained buffers.
    pub fn discard(&mut self) {
        if self.encoder.take().is_some() {
            tracing::debug!(stream = %self.id, "discarded unsubmitted commands");
        }
        self.last_submission = None;
        self.retained.clear();
    }
}

/// Streams A and B.
pub struct StreamPair {
    pub a: CommandStream,
    pub b: CommandStream,
}

impl StreamPair {
    pub fn new() -> Self {
        StreamPair {
            a: CommandStream::new(StreamId::A),
            b: CommandStream::new(StreamId::B),
        }
    }

    pub fn get_mut(&mut self, id: StreamId) -> &mut CommandStream {
        match id {
            StreamId::A => &mut self.a,
            StreamId::B => &mut self.b,
        }
    }

    /// Barrier: submit both streams, then wait until both have completed.
    pub fn join(&mut self, gpu: &GpuDevice) -> Result<()> {
        self.a.flush(gpu)?;
        self.b.flush(gpu)?;
        self.a.finish(gpu)?;
        self.b.finish(gpu)?;
        tracing::trace!("streams joined");
        Ok(())
    }

    pub fn discard(&mut self) {
        self.a.discard();
        self.b.discard();
    }
}

impl Default for StreamPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_ids() {
        let mut pair = StreamPair::new();
        assert_eq!(pair.get_mut(StreamId::A).id(), StreamId::A);
        assert_eq!(pair.get_mut(StreamId::B).id(), StreamId::B);
        assert_eq!(StreamId::B.to_string(), "stream B");
    }

    #[test]
    fn test_discard_empty_stream() {
        let mut s = CommandStream::new(StreamId::A);
        s.discard();
        assert!(s.encoder.is_none());
        assert!(s.last_submission.is_none());
        assert!(s.retained.is_empty());
    }
}
