// main.rs — stereo-zncc command line.
//
//   stereo-zncc left.png right.png depth.png [--backend gpu|cpu|cpu-parallel]
//   stereo-zncc --info
//
// Any error is printed and turned into a non-zero exit code; no output file
// is written unless the whole pipeline succeeded.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use stereo_zncc::gpu::{DeviceOptions, GpuDevice};
use stereo_zncc::{CpuDepthEstimator, DepthEstimator, EstimatorConfig, GpuDepthEstimator, Parallelism, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// wgpu compute device
    Gpu,
    /// Single-threaded host pipeline
    Cpu,
    /// Row-parallel host pipeline (rayon)
    CpuParallel,
}

/// Graphics API searched for a compute adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Api {
    Primary,
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl Api {
    fn backends(self) -> wgpu::Backends {
        match self {
            Api::Primary => wgpu::Backends::PRIMARY,
            Api::Vulkan => wgpu::Backends::VULKAN,
            Api::Metal => wgpu::Backends::METAL,
            Api::Dx12 => wgpu::Backends::DX12,
            Api::Gl => wgpu::Backends::GL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stereo depth map estimation by windowed ZNCC block matching.")]
struct Args {
    /// Left image of the stereo pair
    #[arg(required_unless_present = "info")]
    left: Option<PathBuf>,

    /// Right image of the stereo pair
    #[arg(required_unless_present = "info")]
    right: Option<PathBuf>,

    /// Output depth map (PNG)
    #[arg(required_unless_present = "info")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "gpu")]
    backend: Backend,

    /// Graphics API for the gpu backend
    #[arg(long, value_enum, default_value = "primary")]
    api: Api,

    /// Downsample factor F
    #[arg(long, default_value_t = 4)]
    downsample: u32,

    /// Filter and correlation window radius R
    #[arg(long, default_value_t = 4)]
    radius: u32,

    /// Exclusive upper bound D on the searched disparity
    #[arg(long, default_value_t = 64)]
    max_disparity: u8,

    /// Largest accepted left/right disparity difference T
    #[arg(long, default_value_t = 8)]
    max_cross_diff: u8,

    /// Occlusion fill window radius
    #[arg(long, default_value_t = 8)]
    occlusion_radius: u32,

    /// Print compute adapter information and exit
    #[arg(long)]
    info: bool,
}

impl Args {
    fn config(&self) -> EstimatorConfig {
        EstimatorConfig {
            downsample_factor: self.downsample,
            window_radius: self.radius,
            max_disparity: self.max_disparity,
            max_cross_difference: self.max_cross_diff,
            occlusion_radius: self.occlusion_radius,
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn run(args: &Args) -> Result<()> {
    if args.info {
        let gpu = GpuDevice::with_backends(args.api.backends())?;
        println!("{gpu}");
        return Ok(());
    }

    // clap enforces all three when --info is absent.
    let (Some(left), Some(right), Some(output)) = (&args.left, &args.right, &args.output) else {
        return Ok(());
    };

    let config = args.config();
    let mut estimator: Box<dyn DepthEstimator> = match args.backend {
        Backend::Gpu => {
            let options = DeviceOptions {
                backends: args.api.backends(),
                ..Default::default()
            };
            Box::new(GpuDepthEstimator::with_options(config, options)?)
        }
        Backend::Cpu => Box::new(CpuDepthEstimator::new(config, Parallelism::Serial)?),
        Backend::CpuParallel => Box::new(CpuDepthEstimator::new(config, Parallelism::Rayon)?),
    };

    let report = estimator.create_depth_map(left, right, output)?;
    print!("{report}");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
