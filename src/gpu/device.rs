// gpu/device.rs — wgpu device context.
//
// Responsibilities:
//   - Enumerate adapters on the requested backends and take the first one.
//   - Request a device with the adapter's own limits, plus timestamp
//     queries when the adapter has them.
//   - Provide `TileConfig` — the workgroup shapes of every kernel, validated
//     against the device limits before any kernel is compiled.
//   - Own the two command streams (`DeviceContext`).
//
// ADAPTER SELECTION:
// First match, no scoring. Whatever `enumerate_adapters` returns first is
// used; every candidate is logged at debug level so a surprising pick can
// be diagnosed with `RUST_LOG=stereo_zncc=debug`.
//
// DEVICE LIMITS:
// We request exactly `adapter.limits()`. The tile validator reads the same
// limits back from `GpuDevice::limits`, so a tile that passes validation is
// one wgpu will accept at pipeline creation.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` — runs an async fn to completion on the current
//   thread. wgpu's adapter/device API is async (it maps to JS Promises on
//   the web); natively we just block.
// - `Features & Features` — bitflag intersection, used to request
//   TIMESTAMP_QUERY only if the adapter offers it.

use std::fmt;

use crate::config::EstimatorConfig;
use crate::error::{DepthError, Result};
use crate::gpu::stream::StreamPair;

/// A workgroup shape for 2D compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub const fn new(x: u32, y: u32) -> Self {
        WorkgroupSize { x, y }
    }

    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Largest window radius the disparity kernel accepts. Its window sums are
/// i32, and `(2R+1)² · 255²` must stay below `i32::MAX`.
pub const MAX_WINDOW_RADIUS: u32 = 90;

/// Workgroup shapes for every kernel family.
///
/// - `linear`: invocations per group of the 1-D kernels (greyscale, rgba,
///   crosscheck).
/// - `planar`: 2-D kernels without shared memory (disparity, occlusion).
/// - `downsample`, `filter`: 2-D kernels that stage a tile of their input in
///   workgroup memory. Their scratch size grows with the tile: the
///   downsample tile covers `(x·F) × (y·F)` source pixels, the filter tile
///   `(x+2R) × (y+2R)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub linear: u32,
    pub planar: WorkgroupSize,
    pub downsample: WorkgroupSize,
    pub filter: WorkgroupSize,
}

impl Default for TileConfig {
    fn default() -> Self {
        TileConfig {
            linear: 64,
            planar: WorkgroupSize::new(8, 8),
            downsample: WorkgroupSize::new(8, 8),
            filter: WorkgroupSize::new(8, 8),
        }
    }
}

impl TileConfig {
    /// Source pixels held in workgroup memory by one downsample group.
    pub fn downsample_scratch(&self, factor: u32) -> WorkgroupSize {
        WorkgroupSize::new(self.downsample.x * factor, self.downsample.y * factor)
    }

    /// Source pixels held in workgroup memory by one filter group.
    pub fn filter_scratch(&self, radius: u32) -> WorkgroupSize {
        WorkgroupSize::new(self.filter.x + 2 * radius, self.filter.y + 2 * radius)
    }

    /// Check every tile against the device limits for the given parameters,
    /// and the window radius against [`MAX_WINDOW_RADIUS`].
    pub fn validate(&self, limits: &wgpu::Limits, config: &EstimatorConfig) -> Result<()> {
        if config.window_radius > MAX_WINDOW_RADIUS {
            return Err(DepthError::Config(format!(
                "window radius {} exceeds the device limit of {MAX_WINDOW_RADIUS}",
                config.window_radius
            )));
        }
        check_tile("linear", WorkgroupSize::new(self.linear, 1), None, limits)?;
        check_tile("planar", self.planar, None, limits)?;
        check_tile(
            "downsample",
            self.downsample,
            Some(self.downsample_scratch(config.downsample_factor)),
            limits,
        )?;
        check_tile(
            "filter",
            self.filter,
            Some(self.filter_scratch(config.window_radius)),
            limits,
        )
    }
}

fn check_tile(
    stage: &'static str,
    size: WorkgroupSize,
    scratch: Option<WorkgroupSize>,
    limits: &wgpu::Limits,
) -> Result<()> {
    let fail = |reason: String| DepthError::TileTooLarge {
        stage,
        x: size.x,
        y: size.y,
        reason,
    };
    if size.x == 0 || size.y == 0 {
        return Err(fail("tile dimensions must be non-zero".into()));
    }
    if size.x > limits.max_compute_workgroup_size_x || size.y > limits.max_compute_workgroup_size_y {
        return Err(fail(format!(
            "per-axis limit is {}×{}",
            limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y
        )));
    }
    let invocations = size.x as u64 * size.y as u64;
    if invocations > limits.max_compute_invocations_per_workgroup as u64 {
        return Err(fail(format!(
            "{invocations} invocations exceed the limit of {}",
            limits.max_compute_invocations_per_workgroup
        )));
    }
    if let Some(scratch) = scratch {
        // One u32 word per staged pixel.
        let bytes = scratch.x as u64 * scratch.y as u64 * 4;
        if bytes > limits.max_compute_workgroup_storage_size as u64 {
            return Err(fail(format!(
                "{}×{} scratch tile needs {bytes} bytes of workgroup storage, limit is {}",
                scratch.x, scratch.y, limits.max_compute_workgroup_storage_size
            )));
        }
    }
    Ok(())
}

/// How to open the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Backends searched for an adapter.
    pub backends: wgpu::Backends,
    pub tiles: TileConfig,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions {
            backends: wgpu::Backends::PRIMARY,
            tiles: TileConfig::default(),
        }
    }
}

/// Cached adapter information for logging and `--info`.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
    pub driver: String,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
            driver: format!("{} {}", raw.driver, raw.driver_info).trim().to_string(),
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// Adapter, device and queue.
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top → bottom).
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    /// Limits the device was created with.
    pub limits: wgpu::Limits,
    /// Whether compute passes can write timestamps.
    pub timestamps: bool,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Open the first adapter on the primary backends.
    pub fn new() -> Result<Self> {
        Self::with_backends(wgpu::Backends::PRIMARY)
    }

    pub fn with_backends(backends: wgpu::Backends) -> Result<Self> {
        pollster::block_on(Self::init_async(backends))
    }

    async fn init_async(backends: wgpu::Backends) -> Result<Self> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(backends);
        for a in &adapters {
            let info = a.get_info();
            tracing::debug!(name = %info.name, backend = ?info.backend, kind = ?info.device_type, "found adapter");
        }
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(DepthError::NoAdapter { backends })?;

        let adapter_info = AdapterInfo::from(adapter.get_info());
        let features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
        let limits = adapter.limits();

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("stereo-zncc"),
                    required_features: features,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        // Everything we issue runs inside an error scope; anything that
        // escapes one is a bug worth a loud log line, not a panic.
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(error = %err, "uncaptured device error");
        }));

        let timestamps = features.contains(wgpu::Features::TIMESTAMP_QUERY);
        tracing::info!(adapter = %adapter_info, timestamps, "opened compute device");

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            limits,
            timestamps,
            _instance: instance,
        })
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l = &self.limits;
        writeln!(f, "Adapter:            {}", self.adapter_info.name)?;
        writeln!(f, "Backend:            {:?}", self.adapter_info.backend)?;
        writeln!(f, "Device type:        {:?}", self.adapter_info.device_type)?;
        writeln!(
            f,
            "Vendor / device:    {:#06x} / {:#06x}",
            self.adapter_info.vendor, self.adapter_info.device
        )?;
        writeln!(f, "Driver:             {}", self.adapter_info.driver)?;
        writeln!(f, "Timestamp queries:  {}", if self.timestamps { "yes" } else { "no" })?;
        writeln!(f, "Max invocations:    {}", l.max_compute_invocations_per_workgroup)?;
        writeln!(
            f,
            "Max workgroup size: {}×{}×{}",
            l.max_compute_workgroup_size_x, l.max_compute_workgroup_size_y, l.max_compute_workgroup_size_z
        )?;
        writeln!(f, "Max workgroups/dim: {}", l.max_compute_workgroups_per_dimension)?;
        writeln!(f, "Workgroup storage:  {} bytes", l.max_compute_workgroup_storage_size)?;
        writeln!(f, "Max storage buffer: {} bytes", l.max_storage_buffer_binding_size)?;
        write!(f, "Max buffer size:    {} bytes", l.max_buffer_size)
    }
}

/// The device plus its two command streams.
///
/// Lives as long as the estimator; buffers and events are per run.
pub struct DeviceContext {
    pub streams: StreamPair,
    pub gpu: GpuDevice,
}

impl DeviceContext {
    pub fn new(options: &DeviceOptions) -> Result<Self> {
        let gpu = GpuDevice::with_backends(options.backends)?;
        Ok(DeviceContext {
            streams: StreamPair::new(),
            gpu,
        })
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that need an adapter are `#[ignore]`d so `cargo test` passes on
    // machines without one. Run them with:
    //   cargo test -- --include-ignored

    fn limits() -> wgpu::Limits {
        wgpu::Limits::default()
    }

    #[test]
    fn test_default_tiles_fit_default_limits() {
        let tiles = TileConfig::default();
        assert!(tiles.validate(&limits(), &EstimatorConfig::default()).is_ok());
        assert_eq!(tiles.planar.total(), 64);
    }

    #[test]
    fn test_scratch_sizes() {
        let tiles = TileConfig::default();
        assert_eq!(tiles.downsample_scratch(4), WorkgroupSize::new(32, 32));
        assert_eq!(tiles.filter_scratch(4), WorkgroupSize::new(16, 16));
    }

    #[test]
    fn test_invocation_limit() {
        let tiles = TileConfig {
            planar: WorkgroupSize::new(32, 16),
            ..Default::default()
        };
        // wgpu default: 256 invocations.
        let err = tiles.validate(&limits(), &EstimatorConfig::default()).unwrap_err();
        assert!(matches!(err, DepthError::TileTooLarge { stage: "planar", x: 32, y: 16, .. }));
    }

    #[test]
    fn test_downsample_scratch_limit() {
        // 8×8 tile × F=16 → 128×128 words = 64 KiB > 16 KiB default.
        let config = EstimatorConfig {
            downsample_factor: 16,
            ..Default::default()
        };
        let err = TileConfig::default().validate(&limits(), &config).unwrap_err();
        assert!(matches!(err, DepthError::TileTooLarge { stage: "downsample", .. }));

        // A smaller tile makes the same factor fit.
        let tiles = TileConfig {
            downsample: WorkgroupSize::new(2, 2),
            ..Default::default()
        };
        assert!(tiles.validate(&limits(), &config).is_ok());
    }

    #[test]
    fn test_filter_scratch_limit() {
        // (8 + 120)² words = 64 KiB.
        let config = EstimatorConfig {
            window_radius: 60,
            ..Default::default()
        };
        let err = TileConfig::default().validate(&limits(), &config).unwrap_err();
        assert!(matches!(err, DepthError::TileTooLarge { stage: "filter", .. }));
    }

    #[test]
    fn test_window_radius_bound() {
        let side = 2 * MAX_WINDOW_RADIUS as i64 + 1;
        assert!(side * side * 255 * 255 <= i32::MAX as i64);
        let side = side + 2;
        assert!(side * side * 255 * 255 > i32::MAX as i64);

        let config = EstimatorConfig {
            window_radius: MAX_WINDOW_RADIUS + 1,
            ..Default::default()
        };
        let err = TileConfig::default().validate(&limits(), &config).unwrap_err();
        assert!(matches!(err, DepthError::Config(_)));

        // At the bound only the filter scratch tile is left to check.
        let config = EstimatorConfig {
            window_radius: MAX_WINDOW_RADIUS,
            ..Default::default()
        };
        let err = TileConfig::default().validate(&limits(), &config).unwrap_err();
        assert!(matches!(err, DepthError::TileTooLarge { stage: "filter", .. }));
    }

    #[test]
    fn test_empty_tile_rejected() {
        let tiles = TileConfig {
            linear: 0,
            ..Default::default()
        };
        assert!(tiles.validate(&limits(), &EstimatorConfig::default()).is_err());
    }

    #[test]
    #[ignore = "requires a GPU adapter"]
    fn test_open_device() {
        let gpu = GpuDevice::new().expect("should open a compute device");
        println!("{gpu}");
        assert!(gpu.limits.max_compute_invocations_per_workgroup >= 64);
    }
}
