// stereo-zncc: block-matching stereo depth estimation.
//
// A stereo pair is reduced to a disparity map by windowed zero-normalised
// cross-correlation (ZNCC), left/right consistency checking and occlusion
// filling. The pipeline runs on a wgpu compute device (`gpu`) or on the
// host (`cpu`, serial or rayon-parallel); both produce identical images
// up to floating-point ties in the correlation.

pub mod codec;
pub mod config;
pub mod cpu;
pub mod error;
pub mod estimator;
pub mod gpu;
pub mod image;
pub mod timing;

pub use codec::{ImageCodec, PngCodec};
pub use config::EstimatorConfig;
pub use cpu::{CpuDepthEstimator, Parallelism};
pub use error::{DepthError, Result};
pub use estimator::{DepthEstimator, DepthMap, Side};
pub use gpu::GpuDepthEstimator;
pub use image::{ColorImage, DisparityImage, GreyImage, Image, Rgba};
pub use timing::{ProfileReport, StageTiming};
