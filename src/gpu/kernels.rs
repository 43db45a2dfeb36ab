// gpu/kernels.rs — The kernel registry and its compiled library.
//
// Seven WGSL programs are embedded with `include_str!` and listed in
// `REGISTRY`, each with the storage bindings it expects and the grid it is
// dispatched over. `KernelLibrary::build` renders every template with the
// estimator's tile shapes and parameters, compiles it, and keeps the
// pipelines until the estimator is dropped.
//
// TEMPLATE PLACEHOLDERS
// ─────────────────────
//   {{WG_SIZE}}                 linear workgroup size
//   {{WG_X}} {{WG_Y}}           2-D workgroup shape of the kernel's grid
//   {{TILE_W}} {{TILE_H}}       workgroup-memory tile (filter / downsample)
//   {{TILE_LEN}} {{LOAD_STEPS}} tile words, and loads per invocation to fill it
//   {{RADIUS}} {{SIDE}}         filter half-window and window side
//   {{FACTOR}}                  downsample factor
//
// Literal substitution (rather than `override` constants) is required here:
// workgroup array lengths must be known when the module is parsed.
//
// BINDING LAYOUT
// ──────────────
// Storage arguments occupy bindings 0..n in the order listed in the
// registry; binding n is the kernel's uniform parameter block.

use wgpu::util::DeviceExt;

use crate::config::EstimatorConfig;
use crate::error::{DepthError, Result};
use crate::gpu::buffer::DeviceBuffer;
use crate::gpu::device::{GpuDevice, TileConfig, WorkgroupSize};

/// Bumped whenever a kernel's source or binding layout changes.
pub const KERNEL_REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelName {
    Greyscale,
    Rgba,
    Downsample,
    Filter,
    Disparity,
    CrossCheck,
    Occlusion,
}

impl KernelName {
    pub const ALL: [KernelName; 7] = [
        KernelName::Greyscale,
        KernelName::Rgba,
        KernelName::Downsample,
        KernelName::Filter,
        KernelName::Disparity,
        KernelName::CrossCheck,
        KernelName::Occlusion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KernelName::Greyscale => "greyscale",
            KernelName::Rgba => "rgba",
            KernelName::Downsample => "downsample",
            KernelName::Filter => "filter",
            KernelName::Disparity => "disparity",
            KernelName::CrossCheck => "crosscheck",
            KernelName::Occlusion => "occlusion",
        }
    }
}

/// How a kernel uses one storage argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Input,
    Output,
    InOut,
}

impl Binding {
    fn writes(self) -> bool {
        !matches!(self, Binding::Input)
    }
}

/// The dispatch grid of a kernel, which also picks its workgroup shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grid {
    /// One invocation per pixel of a flattened image.
    Linear,
    /// One invocation per pixel, 2-D.
    Planar,
    /// One invocation per output pixel, tile of `F×F` blocks in scratch.
    Downsample,
    /// One invocation per pixel, haloed tile in scratch.
    Filter,
}

/// One registry entry.
#[derive(Debug)]
pub struct KernelSource {
    pub name: KernelName,
    pub template: &'static str,
    pub bindings: &'static [Binding],
    pub grid: Grid,
}

/// Registry, in compilation order. Indexed by `KernelName as usize`.
pub static REGISTRY: [KernelSource; 7] = [
    KernelSource {
        name: KernelName::Greyscale,
        template: include_str!("../shaders/greyscale.wgsl"),
        bindings: &[Binding::Input, Binding::Output],
        grid: Grid::Linear,
    },
    KernelSource {
        name: KernelName::Rgba,
        template: include_str!("../shaders/rgba.wgsl"),
        bindings: &[Binding::Input, Binding::Output],
        grid: Grid::Linear,
    },
    KernelSource {
        name: KernelName::Downsample,
        template: include_str!("../shaders/downsample.wgsl"),
        bindings: &[Binding::Input, Binding::Output],
        grid: Grid::Downsample,
    },
    KernelSource {
        name: KernelName::Filter,
        template: include_str!("../shaders/filter.wgsl"),
        bindings: &[Binding::Input, Binding::Output],
        grid: Grid::Filter,
    },
    KernelSource {
        name: KernelName::Disparity,
        template: include_str!("../shaders/disparity.wgsl"),
        // img0, img1, mean0, mean1, out
        bindings: &[
            Binding::Input,
            Binding::Input,
            Binding::Input,
            Binding::Input,
            Binding::Output,
        ],
        grid: Grid::Planar,
    },
    KernelSource {
        name: KernelName::CrossCheck,
        template: include_str!("../shaders/crosscheck.wgsl"),
        // left (updated in place), right
        bindings: &[Binding::InOut, Binding::Input],
        grid: Grid::Linear,
    },
    KernelSource {
        name: KernelName::Occlusion,
        template: include_str!("../shaders/occlusion.wgsl"),
        bindings: &[Binding::Input, Binding::Output],
        grid: Grid::Planar,
    },
];

impl KernelSource {
    pub fn get(name: KernelName) -> &'static KernelSource {
        &REGISTRY[name as usize]
    }

    /// Workgroup shape of this kernel under `tiles`.
    pub fn workgroup(&self, tiles: &TileConfig) -> WorkgroupSize {
        match self.grid {
            Grid::Linear => WorkgroupSize::new(tiles.linear, 1),
            Grid::Planar => tiles.planar,
            Grid::Downsample => tiles.downsample,
            Grid::Filter => tiles.filter,
        }
    }

    /// Workgroup-memory tile, `1×1` for kernels without one.
    fn scratch(&self, tiles: &TileConfig, config: &EstimatorConfig) -> WorkgroupSize {
        match self.grid {
            Grid::Downsample => tiles.downsample_scratch(config.downsample_factor),
            Grid::Filter => tiles.filter_scratch(config.window_radius),
            Grid::Linear | Grid::Planar => WorkgroupSize::new(1, 1),
        }
    }

    /// Substitute every placeholder.
    pub fn render(&self, tiles: &TileConfig, config: &EstimatorConfig) -> String {
        let wg = self.workgroup(tiles);
        let tile = self.scratch(tiles, config);
        let tile_len = tile.total();
        let load_steps = tile_len.div_ceil(wg.total());
        self.template
            .replace("{{WG_SIZE}}", &tiles.linear.to_string())
            .replace("{{WG_X}}", &wg.x.to_string())
            .replace("{{WG_Y}}", &wg.y.to_string())
            .replace("{{TILE_W}}", &tile.x.to_string())
            .replace("{{TILE_H}}", &tile.y.to_string())
            .replace("{{TILE_LEN}}", &tile_len.to_string())
            .replace("{{LOAD_STEPS}}", &load_steps.to_string())
            .replace("{{RADIUS}}", &config.window_radius.to_string())
            .replace("{{SIDE}}", &config.window_side().to_string())
            .replace("{{FACTOR}}", &config.downsample_factor.to_string())
    }
}

// ---------------------------------------------------------------------------
// Dispatch sizing
// ---------------------------------------------------------------------------

/// Workgroups for `len` elements in groups of `group`.
///
/// When the count exceeds `max_per_dim` the groups are folded into a 2-D
/// grid; kernels recover the element index as
/// `gid.x + gid.y * num_workgroups.x * group` and discard indices past `len`.
pub fn linear_dispatch(len: u32, group: u32, max_per_dim: u32) -> (u32, u32) {
    let groups = len.div_ceil(group);
    if groups <= max_per_dim {
        return (groups, 1);
    }
    let rows = groups.div_ceil(max_per_dim);
    (groups.div_ceil(rows), rows)
}

/// Workgroups covering a `width × height` grid, ceiling per axis.
///
/// The shader must guard against out-of-bounds global IDs.
pub fn planar_dispatch(width: u32, height: u32, wg: WorkgroupSize) -> (u32, u32) {
    (width.div_ceil(wg.x), height.div_ceil(wg.y))
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// A compiled kernel.
pub struct Kernel {
    name: KernelName,
    bindings: &'static [Binding],
    workgroup: WorkgroupSize,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl Kernel {
    fn compile(gpu: &GpuDevice, src: &KernelSource, tiles: &TileConfig, config: &EstimatorConfig) -> Result<Self> {
        let name = src.name.as_str();
        let text = src.render(tiles, config);

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(text.into()),
        });

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = src
            .bindings
            .iter()
            .enumerate()
            .map(|(i, b)| storage_entry(i as u32, !b.writes()))
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: src.bindings.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        let layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &entries,
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(DepthError::KernelCompile {
                kernel: name,
                log: err.to_string(),
            });
        }

        let workgroup = src.workgroup(tiles);
        tracing::debug!(kernel = name, %workgroup, "compiled kernel");
        Ok(Kernel {
            name: src.name,
            bindings: src.bindings,
            workgroup,
            pipeline,
            layout,
        })
    }

    pub fn name(&self) -> KernelName {
        self.name
    }

    pub fn workgroup(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Bind a full argument set. Every submission binds afresh; nothing
    /// carries over from a previous dispatch.
    pub fn bind(&self, gpu: &GpuDevice, args: &[&DeviceBuffer], params: &[u8]) -> Result<wgpu::BindGroup> {
        let kernel = self.name.as_str();
        let fail = |reason: String| DepthError::KernelArguments { kernel, reason };
        if args.len() != self.bindings.len() {
            return Err(fail(format!(
                "expected {} buffers, got {}",
                self.bindings.len(),
                args.len()
            )));
        }
        for (i, (arg, binding)) in args.iter().zip(self.bindings).enumerate() {
            if !arg.access().is_storage() {
                return Err(fail(format!("argument {i} ({}) is a staging buffer", arg.label())));
            }
            if binding.writes() && !arg.access().is_kernel_writable() {
                return Err(fail(format!(
                    "argument {i} ({}) is written but was allocated {:?}",
                    arg.label(),
                    arg.access()
                )));
            }
        }

        let uniform = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(kernel),
            contents: params,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut entries: Vec<wgpu::BindGroupEntry> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: arg.raw().as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: args.len() as u32,
            resource: uniform.as_entire_binding(),
        });

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel),
            layout: &self.layout,
            entries: &entries,
        });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(fail(err.to_string()));
        }
        Ok(group)
    }

    /// Record one dispatch into `encoder`.
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        group: &wgpu::BindGroup,
        workgroups: (u32, u32),
        timestamp_writes: Option<wgpu::ComputePassTimestampWrites<'_>>,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.name.as_str()),
            timestamp_writes,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, group, &[]);
        pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
    }
}

// ---------------------------------------------------------------------------
// KernelLibrary
// ---------------------------------------------------------------------------

/// All seven kernels, compiled for one configuration.
pub struct KernelLibrary {
    kernels: Vec<Kernel>,
    tiles: TileConfig,
}

impl KernelLibrary {
    /// Validate `tiles` against the device and compile the registry.
    pub fn build(gpu: &GpuDevice, config: &EstimatorConfig, tiles: &TileConfig) -> Result<Self> {
        tiles.validate(&gpu.limits, config)?;
        let kernels = REGISTRY
            .iter()
            .map(|src| Kernel::compile(gpu, src, tiles, config))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(
            version = KERNEL_REGISTRY_VERSION,
            count = kernels.len(),
            "kernel library ready"
        );
        Ok(KernelLibrary { kernels, tiles: *tiles })
    }

    pub fn get(&self, name: KernelName) -> &Kernel {
        &self.kernels[name as usize]
    }

    pub fn tiles(&self) -> &TileConfig {
        &self.tiles
    }
}

impl Drop for KernelLibrary {
    // Reverse creation order.
    fn drop(&mut self) {
        while let Some(kernel) = self.kernels.pop() {
            tracing::trace!(kernel = kernel.name.as_str(), "releasing kernel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order_matches_names() {
        for (i, name) in KernelName::ALL.iter().enumerate() {
            assert_eq!(REGISTRY[i].name, *name);
            assert_eq!(*name as usize, i);
        }
        let mut names: Vec<&str> = KernelName::ALL.iter().map(|n| n.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn test_render_leaves_no_placeholders() {
        let tiles = TileConfig::default();
        let config = EstimatorConfig::default();
        for src in &REGISTRY {
            let text = src.render(&tiles, &config);
            assert!(!text.contains("{{"), "{} still has placeholders", src.name.as_str());
            assert!(text.contains("fn main"), "{} has no entry point", src.name.as_str());
        }
    }

    #[test]
    fn test_render_filter_tile() {
        let config = EstimatorConfig { window_radius: 2, ..Default::default() };
        let text = KernelSource::get(KernelName::Filter).render(&TileConfig::default(), &config);
        // (8 + 4)² = 144 words, ceil(144 / 64) = 3 loads per invocation.
        assert!(text.contains("array<u32, 144>"));
        assert!(text.contains("LOAD_STEPS: u32 = 3u"));
    }

    #[test]
    fn test_render_downsample_tile() {
        let config = EstimatorConfig { downsample_factor: 2, ..Default::default() };
        let text = KernelSource::get(KernelName::Downsample).render(&TileConfig::default(), &config);
        // (8·2)² = 256 words, 4 loads each.
        assert!(text.contains("array<u32, 256>"));
        assert!(text.contains("LOAD_STEPS: u32 = 4u"));
    }

    #[test]
    fn test_linear_dispatch_fits() {
        assert_eq!(linear_dispatch(64, 64, 65535), (1, 1));
        assert_eq!(linear_dispatch(65, 64, 65535), (2, 1));
        assert_eq!(linear_dispatch(1, 64, 65535), (1, 1));
    }

    #[test]
    fn test_linear_dispatch_folds() {
        // 2940×2016 pixels / 64 = 92610 groups > 65535.
        let len = 2940 * 2016;
        let (x, y) = linear_dispatch(len, 64, 65535);
        assert!(x <= 65535 && y > 1);
        assert!(x as u64 * y as u64 * 64 >= len as u64);
    }

    #[test]
    fn test_planar_dispatch_ceiling() {
        assert_eq!(planar_dispatch(735, 504, WorkgroupSize::new(8, 8)), (92, 63));
        assert_eq!(planar_dispatch(8, 8, WorkgroupSize::new(8, 8)), (1, 1));
    }

    #[test]
    fn test_workgroup_per_grid() {
        let tiles = TileConfig {
            linear: 128,
            filter: WorkgroupSize::new(16, 4),
            ..Default::default()
        };
        assert_eq!(
            KernelSource::get(KernelName::CrossCheck).workgroup(&tiles),
            WorkgroupSize::new(128, 1)
        );
        assert_eq!(
            KernelSource::get(KernelName::Filter).workgroup(&tiles),
            WorkgroupSize::new(16, 4)
        );
    }
}
