// error.rs — One error type for the whole pipeline.
//
// Every device-call wrapper returns `Result<_, DepthError>`. Nothing in the
// library terminates the process; the binary decides to abort. Variants are
// grouped by failure class:
//
//   environment  NoAdapter, DeviceRequest
//   resource     BufferAllocation, TileTooLarge
//   compile      KernelCompile (carries the compiler log)
//   dispatch     KernelArguments, Submission, Readback
//   input        Config, DimensionMismatch, Codec

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepthError {
    /// Adapter enumeration returned nothing for the requested backends.
    #[error("no compute adapter found for backends {backends:?}")]
    NoAdapter { backends: wgpu::Backends },

    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("could not allocate {size} byte {label} buffer: {reason}")]
    BufferAllocation {
        label: String,
        size: u64,
        reason: String,
    },

    /// A stage tile does not fit the device's workgroup limits.
    #[error("{stage} tile {x}×{y} does not fit device limits: {reason}")]
    TileTooLarge {
        stage: &'static str,
        x: u32,
        y: u32,
        reason: String,
    },

    #[error("{kernel} BUILD ERROR:\n{log}")]
    KernelCompile { kernel: &'static str, log: String },

    #[error("could not bind {kernel} kernel arguments: {reason}")]
    KernelArguments { kernel: &'static str, reason: String },

    #[error("could not submit work on stream {stream}: {reason}")]
    Submission { stream: String, reason: String },

    #[error("could not read back {label}: {reason}")]
    Readback { label: String, reason: String },

    #[error("invalid estimator configuration: {0}")]
    Config(String),

    #[error("left image is {left:?} but right image is {right:?}")]
    DimensionMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("image codec failed on {}: {reason}", path.display())]
    Codec { path: PathBuf, reason: String },
}

pub type Result<T, E = DepthError> = std::result::Result<T, E>;
