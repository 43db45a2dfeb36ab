// config.rs — Immutable estimator parameters.
//
// The five parameters are fixed when an estimator is constructed and never
// change afterwards. The GPU estimator bakes two of them (filter radius and
// downsample factor) into its kernel sources, so changing them means
// building a new estimator.

use crate::error::{DepthError, Result};

/// Parameters of the block-matching pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimatorConfig {
    /// Image shrink ratio `F` applied to both axes before matching.
    pub downsample_factor: u32,
    /// Half-window `R` of the mean filter and the correlation window.
    /// Window side is `2R + 1`.
    pub window_radius: u32,
    /// Exclusive upper bound `D` on the searched horizontal offset.
    pub max_disparity: u8,
    /// Largest accepted left/right disparity disagreement `T`.
    pub max_cross_difference: u8,
    /// Half-window `Ro` of the occlusion fill search.
    pub occlusion_radius: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            downsample_factor: 4,
            window_radius: 4,
            max_disparity: 64,
            max_cross_difference: 8,
            occlusion_radius: 8,
        }
    }
}

impl EstimatorConfig {
    /// Check the parameter invariants: `F ≥ 1`, `D > 0`.
    ///
    /// `R ≥ 0`, `Ro ≥ 0` and `D ≤ 255` hold by construction of the types.
    pub fn validate(&self) -> Result<()> {
        if self.downsample_factor == 0 {
            return Err(DepthError::Config("downsample factor must be at least 1".into()));
        }
        if self.max_disparity == 0 {
            return Err(DepthError::Config("max disparity must be greater than 0".into()));
        }
        Ok(())
    }

    /// Side length of the correlation / filter window (`2R + 1`).
    #[inline]
    pub fn window_side(&self) -> u32 {
        2 * self.window_radius + 1
    }

    /// Dimensions of the matching grid for a `width × height` input:
    /// `(width / F, height / F)`, truncated.
    ///
    /// Fails when either downsampled dimension is zero.
    pub fn downsampled_dims(&self, width: usize, height: usize) -> Result<(usize, usize)> {
        self.validate()?;
        let f = self.downsample_factor as usize;
        let (w, h) = (width / f, height / f);
        if w == 0 || h == 0 {
            return Err(DepthError::Config(format!(
                "{width}×{height} input downsampled by {f} leaves an empty {w}×{h} image"
            )));
        }
        Ok((w, h))
    }
}
