// estimator.rs — The estimator interface shared by the CPU and GPU pipelines.
//
// Both pipelines run the same six stages:
//
//   per side:  greyscale → downsample(F) → filter(R)
//   per side:  disparity(R, D, direction)      (reads both sides)
//   combined:  crosscheck(T) → occlusion(Ro) → rgba
//
// and differ only in where the pixels are computed. `compute` works on
// in-memory images; `create_depth_map` wraps it with file decode/encode.

use std::path::Path;

use crate::codec::{ImageCodec, PngCodec};
use crate::error::{DepthError, Result};
use crate::image::ColorImage;
use crate::timing::ProfileReport;

pub const CROSS_CHECK: &str = "Cross check";
pub const OCCLUSION_FILL: &str = "Occlusion fill";
pub const CONVERT_RGBA: &str = "Convert rgba";

/// Which image of the stereo pair a stage works on.
///
/// The side also fixes the disparity search direction: the left-referenced
/// pass looks for matches towards −x in the right image, the
/// right-referenced pass towards +x in the left image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "Left",
            Side::Right => "Right",
        }
    }

    /// Horizontal search direction of this side's disparity pass.
    pub fn direction(self) -> i32 {
        match self {
            Side::Left => -1,
            Side::Right => 1,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Report label for a per-side stage, e.g. "Left downsample".
    pub fn label(self, stage: &str) -> String {
        format!("{} {stage}", self.name())
    }
}

/// Output of one run: the visualised disparity map and its telemetry.
#[derive(Debug, Clone)]
pub struct DepthMap {
    /// `floor(w/F) × floor(h/F)` image, disparity `v` encoded as `(v, v, v, 255)`.
    pub image: ColorImage,
    pub report: ProfileReport,
}

/// A stereo depth estimator.
pub trait DepthEstimator {
    /// Estimate the disparity map of a same-sized stereo pair.
    fn compute(&mut self, left: &ColorImage, right: &ColorImage) -> Result<DepthMap>;

    /// Decode both inputs as PNG, run [`compute`](Self::compute), encode
    /// the result to `output`. Nothing is written unless every stage
    /// succeeded.
    fn create_depth_map(&mut self, left: &Path, right: &Path, output: &Path) -> Result<ProfileReport> {
        self.create_depth_map_with(&PngCodec, left, right, output)
    }

    /// Same as [`create_depth_map`](Self::create_depth_map) with an explicit codec.
    fn create_depth_map_with(
        &mut self,
        codec: &dyn ImageCodec,
        left: &Path,
        right: &Path,
        output: &Path,
    ) -> Result<ProfileReport> {
        let left_img = codec.decode(left)?;
        let right_img = codec.decode(right)?;
        let DepthMap { image, report } = self.compute(&left_img, &right_img)?;
        codec.encode(output, &image)?;
        report.log();
        Ok(report)
    }
}

/// Both images of a pair must have identical dimensions.
pub(crate) fn check_pair(left: &ColorImage, right: &ColorImage) -> Result<(usize, usize)> {
    if left.dimensions() != right.dimensions() {
        return Err(DepthError::DimensionMismatch {
            left: left.dimensions(),
            right: right.dimensions(),
        });
    }
    Ok(left.dimensions())
}
