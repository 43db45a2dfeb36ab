// cpu.rs — CPU reference implementation of the seven pipeline stages.
//
// These functions are the authoritative definition of every stage's
// numbers. The GPU kernels in `shaders/` compute the same integers and are
// validated against this module pixel-for-pixel (disparity up to near-ties,
// see the GPU tests).
//
// BORDER HANDLING: Zero padding.
// Unlike a clamp-to-edge convolution, window cells outside the image
// contribute nothing. The box filter still divides by the full window
// area, so borders darken; the correlation skips such cells entirely.
//
// PARALLELISM
// Every stage produces its output row by row, so a row is the unit of
// work handed to rayon. `Parallelism::Serial` runs the same closure on
// the calling thread; output is identical either way.

use std::cmp::Ordering;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::estimator::{self, DepthEstimator, DepthMap, Side};
use crate::image::{ColorImage, DisparityImage, GreyImage, Image, Pixel, Rgba};
use crate::timing::ProfileReport;

/// How the CPU stages spread rows over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelism {
    /// Single-threaded.
    #[default]
    Serial,
    /// One rayon task per output row.
    Rayon,
}

/// Build a `width × height` image by filling each row with `f(y, row)`.
fn build_rows<T, F>(width: usize, height: usize, par: Parallelism, f: F) -> Image<T>
where
    T: Pixel,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    let mut data = vec![T::default(); width * height];
    if width > 0 {
        match par {
            Parallelism::Serial => data
                .chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| f(y, row)),
            Parallelism::Rayon => data
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(y, row)| f(y, row)),
        }
    }
    Image::from_vec(width, height, data)
}

// ---------------------------------------------------------------------------
// Colour conversion
// ---------------------------------------------------------------------------

/// Rec. 709 luma, `round(0.2126 R + 0.7152 G + 0.0722 B)`.
///
/// Evaluated in fixed point (coefficients × 10⁴, +0.5 before the
/// division) so the rounding is exact and matches the GPU kernel bit for bit.
#[inline]
pub fn luma(p: Rgba) -> u8 {
    let sum = 2126 * p.r as u32 + 7152 * p.g as u32 + 722 * p.b as u32;
    ((sum + 5000) / 10000).min(255) as u8
}

/// RGBA → single-channel greyscale.
pub fn greyscale(img: &ColorImage, par: Parallelism) -> GreyImage {
    build_rows(img.width(), img.height(), par, |y, row| {
        for (dst, &src) in row.iter_mut().zip(img.row(y)) {
            *dst = luma(src);
        }
    })
}

/// Single-channel → opaque grey RGBA `(v, v, v, 255)`.
pub fn rgba(img: &GreyImage, par: Parallelism) -> ColorImage {
    build_rows(img.width(), img.height(), par, |y, row| {
        for (dst, &v) in row.iter_mut().zip(img.row(y)) {
            *dst = Rgba::grey(v);
        }
    })
}

// ---------------------------------------------------------------------------
// Resampling and smoothing
// ---------------------------------------------------------------------------

/// Shrink by `factor` on both axes; each output pixel is the truncated
/// mean of its `factor × factor` source block.
///
/// Output is `floor(w / factor) × floor(h / factor)`; leftover source
/// columns and rows are ignored.
///
/// # Panics
/// Panics if `factor == 0`.
pub fn downsample(img: &GreyImage, factor: u32, par: Parallelism) -> GreyImage {
    assert!(factor >= 1, "downsample factor must be at least 1");
    let f = factor as usize;
    let (w, h) = (img.width() / f, img.height() / f);
    let area = (f * f) as u32;
    build_rows(w, h, par, |y, row| {
        for (x, dst) in row.iter_mut().enumerate() {
            let mut sum = 0u32;
            for sy in y * f..(y + 1) * f {
                sum += img.row(sy)[x * f..(x + 1) * f]
                    .iter()
                    .map(|&v| v as u32)
                    .sum::<u32>();
            }
            *dst = (sum / area) as u8;
        }
    })
}

/// Zero-padded box filter with a fixed divisor.
///
/// Each output pixel is the sum of the `(2R+1)²` window centred on it,
/// out-of-bounds cells counting as 0, divided by `(2R+1)²` and truncated.
pub fn box_filter(img: &GreyImage, radius: u32, par: Parallelism) -> GreyImage {
    let (w, h) = img.dimensions();
    let r = radius as isize;
    let side = 2 * radius + 1;
    let area = side * side;
    build_rows(w, h, par, |y, row| {
        let y = y as isize;
        for (x, dst) in row.iter_mut().enumerate() {
            let x = x as isize;
            let mut sum = 0u32;
            for wy in (y - r).max(0)..(y + r + 1).min(h as isize) {
                let src = img.row(wy as usize);
                for wx in (x - r).max(0)..(x + r + 1).min(w as isize) {
                    sum += src[wx as usize] as u32;
                }
            }
            *dst = (sum / area) as u8;
        }
    })
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Inputs of one disparity pass. `img0`/`mean0` belong to the reference
/// view, `img1`/`mean1` to the view searched along `direction`.
#[derive(Clone, Copy)]
pub struct MatchInputs<'a> {
    pub img0: &'a GreyImage,
    pub img1: &'a GreyImage,
    pub mean0: &'a GreyImage,
    pub mean1: &'a GreyImage,
}

/// Windowed ZNCC disparity search.
///
/// For every pixel, candidates `d = 0, 1, …, max_disparity-1` are scored
/// until `x + direction·d` leaves the image. The window of `img0` at
/// `(x, y)` is standardised by `mean0(x, y)`; the window of `img1` at
/// `(x + direction·d, y)` by `mean1(x + direction·d, y)`. Only window
/// cells whose reference and shifted columns are both inside the image
/// count. The strictly greatest score wins (ties keep the smaller `d`);
/// a candidate with zero variance on either side has no score. Scores are
/// compared exactly on their integer window sums, and the sums are 64-bit,
/// so any radius is safe.
pub fn disparity(
    inputs: MatchInputs<'_>,
    radius: u32,
    max_disparity: u8,
    direction: i32,
    par: Parallelism,
) -> DisparityImage {
    let (w, h) = inputs.img0.dimensions();
    build_rows(w, h, par, |y, row| {
        for (x, dst) in row.iter_mut().enumerate() {
            *dst = best_disparity(&inputs, x as i32, y as i32, radius as i32, max_disparity, direction);
        }
    })
}

fn best_disparity(m: &MatchInputs<'_>, x: i32, y: i32, r: i32, max_d: u8, dir: i32) -> u8 {
    let w = m.img0.width() as i32;
    let mut best = Correlation::FLOOR;
    let mut winner = 0u8;

    for d in 0..max_d as i32 {
        let xd = x + dir * d;
        if xd < 0 || xd >= w {
            break;
        }
        let score = correlation(m, x, y, r, dir * d);
        if score.denom0 > 0 && score.denom1 > 0 && score.beats(&best) {
            best = score;
            winner = d as u8;
        }
    }
    winner
}

/// Window sums of the reference window at `(x, y)` against the searched
/// window at `(x + shift, y)`.
fn correlation(m: &MatchInputs<'_>, x: i32, y: i32, r: i32, shift: i32) -> Correlation {
    let w = m.img0.width() as i32;
    let h = m.img0.height() as i32;
    let at = |img: &GreyImage, px: i32, py: i32| img.as_slice()[(py * w + px) as usize] as i64;

    let centre0 = at(m.mean0, x, y);
    let centre1 = at(m.mean1, x + shift, y);
    let mut sums = Correlation { numer: 0, denom0: 0, denom1: 0 };
    for i in (y - r).max(0)..(y + r + 1).min(h) {
        for j in (x - r)..=(x + r) {
            let jd = j + shift;
            if j < 0 || j >= w || jd < 0 || jd >= w {
                continue;
            }
            let s0 = at(m.img0, j, i) - centre0;
            let s1 = at(m.img1, jd, i) - centre1;
            sums.numer += s0 * s1;
            sums.denom0 += s0 * s0;
            sums.denom1 += s1 * s1;
        }
    }
    sums
}

/// ZNCC `numer / sqrt(denom0 · denom1)` held as its integer sums, so that
/// equal correlations compare equal no matter how they were reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Correlation {
    numer: i64,
    denom0: i64,
    denom1: i64,
}

impl Correlation {
    /// Exactly −1: the score every candidate has to beat.
    const FLOOR: Correlation = Correlation { numer: -1, denom0: 1, denom1: 1 };

    /// Strictly greater correlation. Both denominators must be positive.
    fn beats(&self, other: &Correlation) -> bool {
        let (sign, other_sign) = (self.numer.signum(), other.numer.signum());
        if sign != other_sign {
            return sign > other_sign;
        }
        // Same sign: order by numer² / (denom0 · denom1), reversed below zero.
        let square = |c: &Correlation| {
            let n = c.numer.unsigned_abs() as u128;
            (n * n, c.denom0 as u128 * c.denom1 as u128)
        };
        let (p, q) = square(self);
        let (r, s) = square(other);
        match cmp_fractions(p, q, r, s) {
            Ordering::Greater => sign > 0,
            Ordering::Less => sign < 0,
            Ordering::Equal => false,
        }
    }
}

/// Exact order of `p/q` and `r/s` (`q, s > 0`) by comparing continued
/// fraction terms. Only divisions, so no product can overflow.
fn cmp_fractions(mut p: u128, mut q: u128, mut r: u128, mut s: u128) -> Ordering {
    let mut flipped = false;
    loop {
        let ord = (p / q).cmp(&(r / s));
        if ord != Ordering::Equal {
            return if flipped { ord.reverse() } else { ord };
        }
        let (pm, rm) = (p % q, r % s);
        let ord = match (pm == 0, rm == 0) {
            (true, true) => return Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => {
                // pm/q vs rm/s is the reverse of q/pm vs s/rm.
                (p, q, r, s) = (q, pm, s, rm);
                flipped = !flipped;
                continue;
            }
        };
        return if flipped { ord.reverse() } else { ord };
    }
}

/// Zero every pixel of `left` whose disparity differs from `right` by
/// more than `max_difference`.
///
/// # Panics
/// Panics if the images differ in size.
pub fn cross_check(left: &mut DisparityImage, right: &DisparityImage, max_difference: u8, par: Parallelism) {
    assert_eq!(left.dimensions(), right.dimensions(), "cross check needs same-sized maps");
    let check = |(l, &r): (&mut u8, &u8)| {
        if l.abs_diff(r) > max_difference {
            *l = 0;
        }
    };
    match par {
        Parallelism::Serial => left.as_mut_slice().iter_mut().zip(right.as_slice()).for_each(check),
        Parallelism::Rayon => left
            .as_mut_slice()
            .par_iter_mut()
            .zip(right.as_slice().par_iter())
            .for_each(check),
    }
}

/// Fill zero pixels with the truncated mean of the non-zero pixels in the
/// `(2R+1)²` window around them. Non-zero pixels are copied unchanged.
///
/// A zero pixel with no non-zero neighbour in its window stays 0.
pub fn occlusion_fill(img: &DisparityImage, radius: u32, par: Parallelism) -> DisparityImage {
    let (w, h) = img.dimensions();
    let r = radius as isize;
    build_rows(w, h, par, |y, row| {
        let src_row = img.row(y);
        let y = y as isize;
        for (x, dst) in row.iter_mut().enumerate() {
            if src_row[x] > 0 {
                *dst = src_row[x];
                continue;
            }
            let x = x as isize;
            let (mut sum, mut count) = (0u32, 0u32);
            for wy in (y - r).max(0)..(y + r + 1).min(h as isize) {
                let src = img.row(wy as usize);
                for wx in (x - r).max(0)..(x + r + 1).min(w as isize) {
                    let v = src[wx as usize];
                    if v > 0 {
                        sum += v as u32;
                        count += 1;
                    }
                }
            }
            *dst = if count == 0 { 0 } else { (sum / count) as u8 };
        }
    })
}

// ---------------------------------------------------------------------------
// CpuDepthEstimator
// ---------------------------------------------------------------------------

/// The full pipeline on the host.
pub struct CpuDepthEstimator {
    config: EstimatorConfig,
    parallelism: Parallelism,
}

impl CpuDepthEstimator {
    pub fn new(config: EstimatorConfig, parallelism: Parallelism) -> Result<Self> {
        config.validate()?;
        Ok(CpuDepthEstimator { config, parallelism })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    fn name(&self) -> &'static str {
        match self.parallelism {
            Parallelism::Serial => "CPU Depth Estimator",
            Parallelism::Rayon => "CPU Depth Estimator (parallel)",
        }
    }
}

fn timed<T>(report: &mut ProfileReport, label: impl Into<String>, f: impl FnOnce() -> T) -> T {
    let t0 = Instant::now();
    let out = f();
    report.push(label, Some(t0.elapsed().as_secs_f64()));
    out
}

impl DepthEstimator for CpuDepthEstimator {
    fn compute(&mut self, left: &ColorImage, right: &ColorImage) -> Result<DepthMap> {
        let (w, h) = estimator::check_pair(left, right)?;
        let (dw, dh) = self.config.downsampled_dims(w, h)?;
        tracing::debug!(width = w, height = h, dw, dh, estimator = self.name(), "computing depth map");

        let cfg = self.config;
        let par = self.parallelism;
        let mut report = ProfileReport::new(self.name());
        let t_total = Instant::now();

        let mut down = Vec::with_capacity(2);
        let mut mean = Vec::with_capacity(2);
        for (side, img) in Side::BOTH.into_iter().zip([left, right]) {
            let grey = timed(&mut report, side.label("greyscale"), || greyscale(img, par));
            let small = timed(&mut report, side.label("downsample"), || {
                downsample(&grey, cfg.downsample_factor, par)
            });
            let filtered = timed(&mut report, side.label("filter"), || {
                box_filter(&small, cfg.window_radius, par)
            });
            down.push(small);
            mean.push(filtered);
        }

        // Side i matches its own images against the other side's.
        let mut match_side = |side: Side| {
            let (i, j) = (side as usize, side.other() as usize);
            let inputs = MatchInputs {
                img0: &down[i],
                img1: &down[j],
                mean0: &mean[i],
                mean1: &mean[j],
            };
            timed(&mut report, side.label("disparity"), || {
                disparity(inputs, cfg.window_radius, cfg.max_disparity, side.direction(), par)
            })
        };
        let mut left_map = match_side(Side::Left);
        let right_map = match_side(Side::Right);

        timed(&mut report, estimator::CROSS_CHECK, || {
            cross_check(&mut left_map, &right_map, cfg.max_cross_difference, par)
        });
        let filled = timed(&mut report, estimator::OCCLUSION_FILL, || {
            occlusion_fill(&left_map, cfg.occlusion_radius, par)
        });
        let image = timed(&mut report, estimator::CONVERT_RGBA, || rgba(&filled, par));
        report.total = t_total.elapsed();

        debug_assert_eq!(image.dimensions(), (dw, dh));
        Ok(DepthMap { image, report })
    }
}
