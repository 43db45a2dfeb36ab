// tests/test_stages.rs — Properties of the individual CPU pipeline stages.
//
// Run with `cargo test --test test_stages`.
//
// Test images are built from an integer hash rather than a periodic
// pattern: a periodic texture matches itself at several offsets, which
// would make the disparity assertions ambiguous.

use stereo_zncc::cpu::{self, MatchInputs, Parallelism};
use stereo_zncc::image::{ColorImage, GreyImage, Rgba};

const BOTH: [Parallelism; 2] = [Parallelism::Serial, Parallelism::Rayon];

fn hash(x: usize, y: usize, seed: u32) -> u8 {
    let mut v = (x as u32).wrapping_mul(0x9E37_79B1) ^ (y as u32).wrapping_mul(0x85EB_CA77) ^ seed;
    v ^= v >> 15;
    v = v.wrapping_mul(0x2C1B_3C6D);
    v ^= v >> 12;
    v = v.wrapping_mul(0x297A_2D39);
    v ^= v >> 15;
    (v >> 24) as u8
}

fn texture(w: usize, h: usize, seed: u32) -> GreyImage {
    GreyImage::from_fn(w, h, |x, y| hash(x, y, seed))
}

// ===== greyscale / rgba =====

#[test]
fn greyscale_known_colours() {
    let img = ColorImage::from_vec(
        4,
        1,
        vec![
            Rgba::new(255, 255, 255, 255),
            Rgba::new(0, 0, 0, 255),
            Rgba::new(255, 0, 0, 255),
            Rgba::new(128, 128, 128, 0),
        ],
    );
    for par in BOTH {
        let grey = cpu::greyscale(&img, par);
        assert_eq!(grey.as_slice(), &[255, 0, 54, 128]);
    }
}

#[test]
fn greyscale_is_deterministic_and_in_range() {
    let img = ColorImage::from_fn(64, 64, |x, y| Rgba::new(hash(x, y, 1), hash(x, y, 2), hash(x, y, 3), 255));
    let a = cpu::greyscale(&img, Parallelism::Serial);
    let b = cpu::greyscale(&img, Parallelism::Rayon);
    assert_eq!(a, b);
    // Luma of a pixel never leaves its channel range.
    for (x, y, v) in a.pixels() {
        let p = img.get(x, y);
        let lo = p.r.min(p.g).min(p.b);
        let hi = p.r.max(p.g).max(p.b);
        assert!(lo <= v && v <= hi, "({x},{y}) {p:?} → {v}");
    }
}

#[test]
fn rgba_expands_to_opaque_grey() {
    let grey = GreyImage::from_vec(3, 1, vec![0, 17, 255]);
    let rgba = cpu::rgba(&grey, Parallelism::Serial);
    assert_eq!(rgba.as_slice(), &[Rgba::grey(0), Rgba::grey(17), Rgba::grey(255)]);
    assert_eq!(rgba.get(1, 0), Rgba::new(17, 17, 17, 255));
}

// ===== downsample =====

#[test]
fn downsample_is_truncated_block_mean() {
    for factor in 1..=4usize {
        let (w, h) = (8 * factor, 6 * factor);
        let img = texture(w, h, factor as u32);
        let out = cpu::downsample(&img, factor as u32, Parallelism::Rayon);
        assert_eq!(out.dimensions(), (w / factor, h / factor));
        for (x, y, v) in out.pixels() {
            let mut sum = 0u32;
            for sy in y * factor..(y + 1) * factor {
                for sx in x * factor..(x + 1) * factor {
                    sum += img.get(sx, sy) as u32;
                }
            }
            assert_eq!(v as u32, sum / (factor * factor) as u32, "F={factor} at ({x},{y})");
        }
    }
}

#[test]
fn downsample_truncates_odd_dimensions() {
    let img = texture(17, 9, 5);
    assert_eq!(cpu::downsample(&img, 4, Parallelism::Serial).dimensions(), (4, 2));
}

// ===== filter =====

#[test]
fn filter_constant_image_interior_and_border() {
    let (v, r) = (100u8, 2usize);
    let img = GreyImage::filled(12, 10, v);
    for par in BOTH {
        let out = cpu::box_filter(&img, r as u32, par);
        for (x, y, got) in out.pixels() {
            let interior = x >= r && y >= r && x + r < 12 && y + r < 10;
            if interior {
                assert_eq!(got, v, "interior ({x},{y})");
            } else {
                assert!(got < v, "border ({x},{y}) should darken, got {got}");
            }
        }
    }
}

#[test]
fn filter_serial_matches_parallel() {
    let img = texture(33, 21, 9);
    assert_eq!(
        cpu::box_filter(&img, 3, Parallelism::Serial),
        cpu::box_filter(&img, 3, Parallelism::Rayon)
    );
}

// ===== disparity =====

fn run_disparity(left: &GreyImage, right: &GreyImage, r: u32, d: u8, left_reference: bool) -> GreyImage {
    let (ml, mr) = (cpu::box_filter(left, r, Parallelism::Serial), cpu::box_filter(right, r, Parallelism::Serial));
    let inputs = if left_reference {
        MatchInputs { img0: left, img1: right, mean0: &ml, mean1: &mr }
    } else {
        MatchInputs { img0: right, img1: left, mean0: &mr, mean1: &ml }
    };
    let direction = if left_reference { -1 } else { 1 };
    cpu::disparity(inputs, r, d, direction, Parallelism::Rayon)
}

#[test]
fn disparity_identical_images_is_zero_in_interior() {
    let (w, h, r) = (40, 24, 2usize);
    let img = texture(w, h, 11);
    let out = run_disparity(&img, &img, r as u32, 8, true);
    for y in r..h - r {
        for x in r..w - r {
            assert_eq!(out.get(x, y), 0, "({x},{y})");
        }
    }
}

#[test]
fn disparity_exact_ties_keep_smallest_offset() {
    // Constant 50 with its zero-padded mean: border windows are flat but
    // offset from their mean, so every candidate there scores exactly 1.
    let flat = GreyImage::filled(8, 8, 50);
    for left_reference in [true, false] {
        let out = run_disparity(&flat, &flat, 1, 4, left_reference);
        assert!(out.pixels().all(|(_, _, v)| v == 0), "{:?}", out.as_slice());
    }
}

#[test]
fn disparity_recovers_shift_both_directions() {
    let (w, h, r, s) = (48usize, 20usize, 2usize, 5usize);
    let base = texture(w + s, h, 23);
    // right(x) = left(x + s): a point at x in the left view sits at x − s in the right.
    let left = GreyImage::from_fn(w, h, |x, y| base.get(x, y));
    let right = GreyImage::from_fn(w, h, |x, y| base.get(x + s, y));

    let left_map = run_disparity(&left, &right, r as u32, 12, true);
    for y in r..h - r {
        for x in s + r..w - r {
            assert_eq!(left_map.get(x, y), s as u8, "left reference at ({x},{y})");
        }
    }

    let right_map = run_disparity(&left, &right, r as u32, 12, false);
    for y in r..h - r {
        for x in r..w - s - r {
            assert_eq!(right_map.get(x, y), s as u8, "right reference at ({x},{y})");
        }
    }
}

#[test]
fn disparity_stays_below_max() {
    let left = texture(30, 12, 31);
    let right = texture(30, 12, 37);
    for (max_d, left_ref) in [(1u8, true), (4, true), (7, false), (255, false)] {
        let out = run_disparity(&left, &right, 1, max_d, left_ref);
        assert!(out.pixels().all(|(_, _, v)| v < max_d), "D={max_d}");
    }
}

#[test]
fn disparity_search_stops_at_image_edge() {
    // In the left-reference pass column x can only look back x pixels.
    let left = texture(16, 8, 41);
    let right = texture(16, 8, 43);
    let out = run_disparity(&left, &right, 1, 64, true);
    for (x, _, v) in out.pixels() {
        assert!(v as usize <= x);
    }
}

// ===== crosscheck =====

#[test]
fn crosscheck_zeroes_exactly_disagreements() {
    let left = GreyImage::from_fn(20, 10, |x, y| hash(x, y, 51) % 32);
    let right = GreyImage::from_fn(20, 10, |x, y| hash(x, y, 53) % 32);
    let t = 8u8;
    for par in BOTH {
        let mut checked = left.clone();
        cpu::cross_check(&mut checked, &right, t, par);
        for (x, y, v) in checked.pixels() {
            let (l, r) = (left.get(x, y), right.get(x, y));
            let expected = if l.abs_diff(r) > t { 0 } else { l };
            assert_eq!(v, expected, "({x},{y}) l={l} r={r}");
        }
    }
}

#[test]
fn crosscheck_is_idempotent() {
    let mut left = GreyImage::from_fn(20, 10, |x, y| hash(x, y, 61) % 40);
    let right = GreyImage::from_fn(20, 10, |x, y| hash(x, y, 67) % 40);
    cpu::cross_check(&mut left, &right, 5, Parallelism::Serial);
    let once = left.clone();
    cpu::cross_check(&mut left, &right, 5, Parallelism::Serial);
    assert_eq!(left, once);
}

// ===== occlusion =====

#[test]
fn occlusion_keeps_valid_pixels() {
    let img = GreyImage::from_fn(16, 16, |x, y| if (x + y) % 3 == 0 { 0 } else { hash(x, y, 71) | 1 });
    let out = cpu::occlusion_fill(&img, 2, Parallelism::Rayon);
    for (x, y, v) in img.pixels() {
        if v > 0 {
            assert_eq!(out.get(x, y), v, "({x},{y}) changed");
        }
    }
}

#[test]
fn occlusion_fills_with_mean_of_nonzero_neighbours() {
    // 3×3, centre hole; neighbours 10, 20, 0, 40 … only non-zero ones count.
    let img = GreyImage::from_vec(3, 3, vec![10, 20, 0, 40, 0, 0, 0, 0, 7]);
    let out = cpu::occlusion_fill(&img, 1, Parallelism::Serial);
    // (10 + 20 + 40 + 7) / 4 = 19
    assert_eq!(out.get(1, 1), 19);
    // Corner (2,0): window holds 20, 0, 0, 0 → 20.
    assert_eq!(out.get(2, 0), 20);
}

#[test]
fn occlusion_without_neighbours_stays_zero() {
    let img = GreyImage::new(9, 9);
    let out = cpu::occlusion_fill(&img, 3, Parallelism::Serial);
    assert!(out.pixels().all(|(_, _, v)| v == 0));

    // A lone valid pixel further than Ro away leaves far holes at 0.
    let mut img = GreyImage::new(9, 9);
    img.set(0, 0, 50);
    let out = cpu::occlusion_fill(&img, 1, Parallelism::Rayon);
    assert_eq!(out.get(1, 1), 50);
    assert_eq!(out.get(8, 8), 0);
}
