// gpu/profiler.rs — Per-run stage timing from device timestamps.
//
// Every dispatch the orchestrator records is registered here as a
// `StreamEvent`. When the device supports timestamp queries, the event
// reserves two slots in a query set and the compute pass writes its
// begin/end timestamps into them. After the last barrier the query set is
// resolved, read back, and converted to seconds with the queue's timestamp
// period.
//
// Nothing here influences what runs or in which order. Without timestamp
// support events are still recorded, and their stages report "n/a".
//
// The wall-clock total runs from `start_clock` to `collect`. The
// orchestrator starts it once both input uploads are submitted, so host-side
// staging of the inputs is not part of the total.

use std::time::Instant;

use crate::error::Result;
use crate::gpu::buffer::{self, BufferAccess};
use crate::gpu::device::GpuDevice;
use crate::gpu::stream::{CommandStream, StreamId};
use crate::timing::ProfileReport;

/// Events with timestamps per run. The pipeline records eleven.
pub const MAX_TIMED_EVENTS: u32 = 32;

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub label: String,
    pub stream: StreamId,
    /// Index of the event's begin query; end is `slot + 1`.
    slot: Option<u32>,
}

pub struct Profiler {
    query_set: Option<wgpu::QuerySet>,
    period_ns: f32,
    events: Vec<StreamEvent>,
    started: Instant,
}

impl Profiler {
    /// Start a run. The wall clock starts now unless restarted with
    /// [`start_clock`](Self::start_clock).
    pub fn new(gpu: &GpuDevice) -> Self {
        let query_set = gpu.timestamps.then(|| {
            gpu.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("stage timestamps"),
                ty: wgpu::QueryType::Timestamp,
                count: 2 * MAX_TIMED_EVENTS,
            })
        });
        Profiler {
            query_set,
            period_ns: gpu.queue.get_timestamp_period(),
            events: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Restart the wall clock.
    pub fn start_clock(&mut self) {
        self.started = Instant::now();
    }

    /// Register a dispatch on `stream` and return the timestamp writes its
    /// compute pass should carry, if any.
    pub fn event(
        &mut self,
        label: impl Into<String>,
        stream: StreamId,
    ) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let timed = self.timed_count();
        let slot = (self.query_set.is_some() && timed < MAX_TIMED_EVENTS).then_some(2 * timed);
        self.events.push(StreamEvent {
            label: label.into(),
            stream,
            slot,
        });
        let query_set = self.query_set.as_ref()?;
        let begin = slot?;
        Some(wgpu::ComputePassTimestampWrites {
            query_set,
            beginning_of_pass_write_index: Some(begin),
            end_of_pass_write_index: Some(begin + 1),
        })
    }

    fn timed_count(&self) -> u32 {
        self.events.iter().filter(|e| e.slot.is_some()).count() as u32
    }

    /// Stop the wall clock and build the report.
    ///
    /// Resolves the timestamps on `stream` and finishes it, so call this
    /// only after the run's final barrier.
    pub fn collect(
        self,
        gpu: &GpuDevice,
        stream: &mut CommandStream,
        estimator: &'static str,
    ) -> Result<ProfileReport> {
        let total = self.started.elapsed();
        let ticks = match &self.query_set {
            Some(query_set) => resolve(gpu, stream, query_set, self.timed_count())?,
            None => Vec::new(),
        };

        let period = self.period_ns;
        let mut report = ProfileReport::new(estimator);
        report.total = total;
        for event in self.events {
            let seconds = event.slot.and_then(|s| {
                let (begin, end) = (ticks.get(s as usize)?, ticks.get(s as usize + 1)?);
                Some(ticks_to_seconds(*begin, *end, period))
            });
            tracing::trace!(stage = %event.label, stream = %event.stream, ?seconds, "stage timing");
            report.push(event.label, seconds);
        }
        Ok(report)
    }
}

fn resolve(gpu: &GpuDevice, stream: &mut CommandStream, query_set: &wgpu::QuerySet, events: u32) -> Result<Vec<u64>> {
    if events == 0 {
        return Ok(Vec::new());
    }
    let queries = 2 * events;
    let size = queries as u64 * std::mem::size_of::<u64>() as u64;
    let resolved = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("timestamp resolve"),
        size,
        usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = buffer::allocate(gpu, "timestamp readback", BufferAccess::HostRead, size, None)?;

    let encoder = stream.encoder(gpu);
    encoder.resolve_query_set(query_set, 0..queries, &resolved, 0);
    encoder.copy_buffer_to_buffer(&resolved, 0, staging.raw(), 0, size);
    stream.finish(gpu)?;
    buffer::read_mapped(gpu, &staging)
}

/// Convert a begin/end tick pair to seconds. Ticks are `period_ns`
/// nanoseconds long; a wrapped or reordered pair reads as zero.
pub fn ticks_to_seconds(begin: u64, end: u64, period_ns: f32) -> f64 {
    end.saturating_sub(begin) as f64 * period_ns as f64 * 1e-9
}
