// gpu/stages.rs — Host-side glue for the seven kernels.
//
// Each method allocates the stage's output, binds a fresh argument set with
// a fresh uniform block, registers a profiler event and records one compute
// pass on the given stream. Nothing is submitted here; streams are flushed
// and joined by the orchestrator.
//
// Uniform blocks below must match the `Params` structs in the WGSL sources
// field for field. All are padded to a multiple of 16 bytes.

use crate::error::Result;
use crate::gpu::buffer::{self, BufferAccess, DeviceBuffer, DeviceImage};
use crate::gpu::device::GpuDevice;
use crate::gpu::kernels::{self, Kernel, KernelLibrary, KernelName};
use crate::gpu::profiler::Profiler;
use crate::gpu::stream::CommandStream;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct LinearParams {
    len: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ThresholdParams {
    len: u32,
    threshold: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DownsampleParams {
    src_width: u32,
    src_height: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FilterParams {
    width: u32,
    height: u32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct OcclusionParams {
    width: u32,
    height: u32,
    radius: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DisparityParams {
    width: u32,
    height: u32,
    radius: u32,
    max_disparity: u32,
    direction: i32,
    _pad: [u32; 3],
}

/// The four device images one disparity pass reads.
#[derive(Clone, Copy)]
pub struct MatchBuffers<'a> {
    pub img0: &'a DeviceImage,
    pub img1: &'a DeviceImage,
    pub mean0: &'a DeviceImage,
    pub mean1: &'a DeviceImage,
}

/// Records stage dispatches for one run.
pub struct StageRecorder<'a> {
    gpu: &'a GpuDevice,
    kernels: &'a KernelLibrary,
    profiler: &'a mut Profiler,
}

impl<'a> StageRecorder<'a> {
    pub fn new(gpu: &'a GpuDevice, kernels: &'a KernelLibrary, profiler: &'a mut Profiler) -> Self {
        StageRecorder { gpu, kernels, profiler }
    }

    fn output(&self, label: &str, width: u32, height: u32, access: BufferAccess) -> Result<DeviceImage> {
        let buffer = buffer::allocate(self.gpu, label, access, buffer::image_bytes(width, height), None)?;
        Ok(DeviceImage { buffer, width, height })
    }

    fn dispatch(
        &mut self,
        stream: &mut CommandStream,
        label: String,
        kernel: &Kernel,
        args: &[&DeviceBuffer],
        params: &[u8],
        workgroups: (u32, u32),
    ) -> Result<()> {
        let group = kernel.bind(self.gpu, args, params)?;
        tracing::trace!(stage = %label, stream = %stream.id(), ?workgroups, "dispatch");
        let timestamps = self.profiler.event(label, stream.id());
        kernel.record(stream.encoder(self.gpu), &group, workgroups, timestamps);
        Ok(())
    }

    fn linear_groups(&self, len: u32) -> (u32, u32) {
        kernels::linear_dispatch(
            len,
            self.kernels.tiles().linear,
            self.gpu.limits.max_compute_workgroups_per_dimension,
        )
    }

    /// Packed RGBA → luma.
    pub fn greyscale(&mut self, stream: &mut CommandStream, label: String, src: &DeviceImage) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let dst = self.output(&label, src.width, src.height, BufferAccess::DeviceOnly)?;
        let len = src.pixel_count();
        let params = LinearParams { len, _pad: [0; 3] };
        let groups = self.linear_groups(len);
        self.dispatch(
            stream,
            label,
            kernels.get(KernelName::Greyscale),
            &[&src.buffer, &dst.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }

    /// Luma → packed opaque grey. The result can be copied out.
    pub fn rgba(&mut self, stream: &mut CommandStream, label: String, src: &DeviceImage) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let dst = self.output(&label, src.width, src.height, BufferAccess::ReadWrite)?;
        let len = src.pixel_count();
        let params = LinearParams { len, _pad: [0; 3] };
        let groups = self.linear_groups(len);
        self.dispatch(
            stream,
            label,
            kernels.get(KernelName::Rgba),
            &[&src.buffer, &dst.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }

    /// `F×F` block mean. The factor is compiled into the kernel.
    pub fn downsample(
        &mut self,
        stream: &mut CommandStream,
        label: String,
        src: &DeviceImage,
        factor: u32,
    ) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let kernel = kernels.get(KernelName::Downsample);
        let (width, height) = (src.width / factor, src.height / factor);
        let dst = self.output(&label, width, height, BufferAccess::DeviceOnly)?;
        let params = DownsampleParams {
            src_width: src.width,
            src_height: src.height,
            width,
            height,
        };
        let groups = kernels::planar_dispatch(width, height, kernel.workgroup());
        self.dispatch(
            stream,
            label,
            kernel,
            &[&src.buffer, &dst.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }

    /// Zero-padded box mean. The radius is compiled into the kernel.
    pub fn filter(&mut self, stream: &mut CommandStream, label: String, src: &DeviceImage) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let kernel = kernels.get(KernelName::Filter);
        let dst = self.output(&label, src.width, src.height, BufferAccess::DeviceOnly)?;
        let params = FilterParams {
            width: src.width,
            height: src.height,
            _pad: [0; 2],
        };
        let groups = kernels::planar_dispatch(src.width, src.height, kernel.workgroup());
        self.dispatch(
            stream,
            label,
            kernel,
            &[&src.buffer, &dst.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }

    /// ZNCC search along `direction` (−1 or +1).
    pub fn disparity(
        &mut self,
        stream: &mut CommandStream,
        label: String,
        inputs: MatchBuffers<'_>,
        radius: u32,
        max_disparity: u8,
        direction: i32,
    ) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let kernel = kernels.get(KernelName::Disparity);
        let (width, height) = (inputs.img0.width, inputs.img0.height);
        let dst = self.output(&label, width, height, BufferAccess::ReadWrite)?;
        let params = DisparityParams {
            width,
            height,
            radius,
            max_disparity: max_disparity as u32,
            direction,
            _pad: [0; 3],
        };
        let groups = kernels::planar_dispatch(width, height, kernel.workgroup());
        self.dispatch(
            stream,
            label,
            kernel,
            &[
                &inputs.img0.buffer,
                &inputs.img1.buffer,
                &inputs.mean0.buffer,
                &inputs.mean1.buffer,
                &dst.buffer,
            ],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }

    /// Zero `left` wherever it disagrees with `right` by more than `max_difference`.
    pub fn cross_check(
        &mut self,
        stream: &mut CommandStream,
        label: String,
        left: &DeviceImage,
        right: &DeviceImage,
        max_difference: u8,
    ) -> Result<()> {
        let kernels = self.kernels;
        let len = left.pixel_count();
        let params = ThresholdParams {
            len,
            threshold: max_difference as u32,
            _pad: [0; 2],
        };
        let groups = self.linear_groups(len);
        self.dispatch(
            stream,
            label,
            kernels.get(KernelName::CrossCheck),
            &[&left.buffer, &right.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )
    }

    /// Fill zero pixels from their non-zero neighbours.
    pub fn occlusion(
        &mut self,
        stream: &mut CommandStream,
        label: String,
        src: &DeviceImage,
        radius: u32,
    ) -> Result<DeviceImage> {
        let kernels = self.kernels;
        let kernel = kernels.get(KernelName::Occlusion);
        let dst = self.output(&label, src.width, src.height, BufferAccess::DeviceOnly)?;
        let params = OcclusionParams {
            width: src.width,
            height: src.height,
            radius,
            _pad: 0,
        };
        let groups = kernels::planar_dispatch(src.width, src.height, kernel.workgroup());
        self.dispatch(
            stream,
            label,
            kernel,
            &[&src.buffer, &dst.buffer],
            bytemuck::bytes_of(&params),
            groups,
        )?;
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<LinearParams>(), 16);
        assert_eq!(std::mem::size_of::<ThresholdParams>(), 16);
        assert_eq!(std::mem::size_of::<DownsampleParams>(), 16);
        assert_eq!(std::mem::size_of::<FilterParams>(), 16);
        assert_eq!(std::mem::size_of::<OcclusionParams>(), 16);
        assert_eq!(std::mem::size_of::<DisparityParams>(), 32);
    }
}
