// gpu/mod.rs — wgpu compute backend.
//
// Leaf-first:
//
//   device     adapter/device selection, tile limits, DeviceContext
//   stream     two ordered command streams and their join barrier
//   buffer     device allocations, staging transfers, readback
//   kernels    embedded WGSL registry, template rendering, compilation
//   profiler   timestamp queries → per-stage seconds
//   stages     one dispatch helper per kernel
//   estimator  the two-stream orchestration
//
// The CPU functions in `crate::cpu` remain the authoritative reference;
// every kernel is validated against them (see tests/test_gpu.rs).

pub mod buffer;
pub mod device;
pub mod estimator;
pub mod kernels;
pub mod profiler;
pub mod stages;
pub mod stream;

pub use device::{DeviceOptions, GpuDevice, TileConfig, WorkgroupSize};
pub use estimator::GpuDepthEstimator;
