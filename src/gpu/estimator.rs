// gpu/estimator.rs — The two-stream depth pipeline.
//
//   stream A                         stream B
//   ────────                         ────────
//   transfer in (left)               transfer in (right)
//   ─ ─ ─ ─ ─ ─ ─ ─ ─ wall clock starts ─ ─ ─ ─ ─ ─ ─ ─
//   greyscale → downsample → filter  greyscale → downsample → filter
//   ═══════════════════ join ════════════════════
//   disparity (left ref, dir −1)     disparity (right ref, dir +1)
//   ═══════════════════ join ════════════════════
//   crosscheck → occlusion → rgba
//   ═══════════════════ join ════════════════════
//   transfer out
//
// Each join is the only point where a later stage reads what the other
// stream wrote. Every intermediate buffer is dropped before `compute`
// returns; the device and the compiled kernels live as long as the
// estimator.

use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::estimator::{self, DepthEstimator, DepthMap, Side};
use crate::gpu::buffer::{self, DeviceImage};
use crate::gpu::device::{DeviceContext, DeviceOptions, GpuDevice};
use crate::gpu::kernels::KernelLibrary;
use crate::gpu::profiler::Profiler;
use crate::gpu::stages::{MatchBuffers, StageRecorder};
use crate::gpu::stream::StreamId;
use crate::image::{ColorImage, Rgba};

const NAME: &str = "GPU Depth Estimator";

/// Stream each side's per-image stages run on.
fn stream_for(side: Side) -> StreamId {
    match side {
        Side::Left => StreamId::A,
        Side::Right => StreamId::B,
    }
}

/// Depth estimator running every stage on a wgpu compute device.
///
/// Construction opens the device and compiles all seven kernels; either
/// failing is an error, not a fallback.
///
/// # Field drop order
/// `kernels` is declared before `context` so pipelines are released while
/// the device still exists.
pub struct GpuDepthEstimator {
    config: EstimatorConfig,
    kernels: KernelLibrary,
    context: DeviceContext,
}

impl GpuDepthEstimator {
    /// First adapter on the primary backends, default tiles.
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        Self::with_options(config, DeviceOptions::default())
    }

    pub fn with_options(config: EstimatorConfig, options: DeviceOptions) -> Result<Self> {
        config.validate()?;
        let context = DeviceContext::new(&options)?;
        let kernels = KernelLibrary::build(&context.gpu, &config, &options.tiles)?;
        Ok(GpuDepthEstimator {
            config,
            kernels,
            context,
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn device(&self) -> &GpuDevice {
        &self.context.gpu
    }

    fn run(&mut self, left: &ColorImage, right: &ColorImage) -> Result<DepthMap> {
        let (w, h) = estimator::check_pair(left, right)?;
        let (dw, dh) = self.config.downsampled_dims(w, h)?;
        tracing::debug!(width = w, height = h, dw, dh, estimator = NAME, "computing depth map");

        let cfg = self.config;
        let DeviceContext { gpu, streams } = &mut self.context;
        let gpu: &GpuDevice = gpu;
        let mut profiler = Profiler::new(gpu);

        // 1. Uploads, one stream each. The clock starts once both are queued.
        let mut inputs: Vec<DeviceImage> = Vec::with_capacity(2);
        for (side, img) in Side::BOTH.into_iter().zip([left, right]) {
            let stream = streams.get_mut(stream_for(side));
            inputs.push(buffer::transfer_in(gpu, stream, &side.label("input"), img)?);
            stream.flush(gpu)?;
        }
        profiler.start_clock();
        let mut stages = StageRecorder::new(gpu, &self.kernels, &mut profiler);

        // 2. Per-side preprocessing on the same streams.
        let mut down: Vec<DeviceImage> = Vec::with_capacity(2);
        let mut mean: Vec<DeviceImage> = Vec::with_capacity(2);
        for (side, input) in Side::BOTH.into_iter().zip(&inputs) {
            let stream = streams.get_mut(stream_for(side));
            let grey = stages.greyscale(stream, side.label("greyscale"), input)?;
            let small = stages.downsample(stream, side.label("downsample"), &grey, cfg.downsample_factor)?;
            let filtered = stages.filter(stream, side.label("filter"), &small)?;
            stream.flush(gpu)?;
            down.push(small);
            mean.push(filtered);
        }

        // 3. Disparity reads both sides' buffers.
        streams.join(gpu)?;

        // 4. Each side matches its own images against the other side's.
        let mut maps: Vec<DeviceImage> = Vec::with_capacity(2);
        for side in Side::BOTH {
            let (i, j) = (side as usize, side.other() as usize);
            let map = stages.disparity(
                streams.get_mut(stream_for(side)),
                side.label("disparity"),
                MatchBuffers {
                    img0: &down[i],
                    img1: &down[j],
                    mean0: &mean[i],
                    mean1: &mean[j],
                },
                cfg.window_radius,
                cfg.max_disparity,
                side.direction(),
            )?;
            maps.push(map);
        }
        let (left_map, right_map) = (&maps[0], &maps[1]);

        // 5. Post-processing on a single stream.
        streams.join(gpu)?;
        let a = &mut streams.a;
        stages.cross_check(
            a,
            estimator::CROSS_CHECK.to_string(),
            left_map,
            right_map,
            cfg.max_cross_difference,
        )?;
        let filled = stages.occlusion(a, estimator::OCCLUSION_FILL.to_string(), left_map, cfg.occlusion_radius)?;
        let output = stages.rgba(a, estimator::CONVERT_RGBA.to_string(), &filled)?;

        // 6. Readback.
        streams.join(gpu)?;
        let image = buffer::transfer_out::<Rgba>(gpu, &mut streams.a, &output)?;
        let report = profiler.collect(gpu, &mut streams.a, NAME)?;

        debug_assert_eq!(image.dimensions(), (dw, dh));
        Ok(DepthMap { image, report })
    }
}

impl DepthEstimator for GpuDepthEstimator {
    fn compute(&mut self, left: &ColorImage, right: &ColorImage) -> Result<DepthMap> {
        let result = self.run(left, right);
        if result.is_err() {
            // Unsubmitted commands may reference buffers that no longer exist.
            self.context.streams.discard();
        }
        result
    }
}
