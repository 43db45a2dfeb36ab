// tests/test_image.rs — Integration tests for Image<T> and the PNG codec.
//
// These run with `cargo test --test test_image`.
// Integration tests live in tests/ and can only access the crate's public
// API — a good check that the public surface is usable.

use stereo_zncc::codec::{ImageCodec, PngCodec};
use stereo_zncc::image::{ColorImage, GreyImage, Image, Rgba};
use stereo_zncc::DepthError;

// ===== Construction & basic access =====

#[test]
fn image_new_zero_initialized() {
    let img: GreyImage = Image::new(100, 50);
    assert_eq!(img.width(), 100);
    assert_eq!(img.height(), 50);
    assert_eq!(img.get(0, 0), 0);
    assert_eq!(img.get(99, 49), 0);
}

#[test]
fn image_set_get_consistency() {
    let mut img: GreyImage = Image::new(10, 10);
    // Write a checkerboard pattern.
    for y in 0..10 {
        for x in 0..10 {
            let val = if (x + y) % 2 == 0 { 255u8 } else { 0u8 };
            img.set(x, y, val);
        }
    }
    for y in 0..10 {
        for x in 0..10 {
            let expected = if (x + y) % 2 == 0 { 255u8 } else { 0u8 };
            assert_eq!(img.get(x, y), expected, "mismatch at ({x}, {y})");
        }
    }
}

#[test]
fn image_from_vec_layout() {
    // 3×2 image, row-major:
    //  [10, 20, 30]
    //  [40, 50, 60]
    let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
    assert_eq!(img.get(0, 0), 10);
    assert_eq!(img.get(2, 0), 30);
    assert_eq!(img.get(0, 1), 40);
    assert_eq!(img.get(2, 1), 60);
}

// ===== Packed RGBA =====

#[test]
fn color_image_bytes_are_interleaved_without_padding() {
    let img = ColorImage::from_fn(3, 2, |x, y| Rgba::new(x as u8, y as u8, 9, 255));
    let bytes = img.as_bytes();
    // stride = width × 4, no row padding
    assert_eq!(bytes.len(), 3 * 2 * 4);
    assert_eq!(&bytes[0..4], &[0, 0, 9, 255]);
    assert_eq!(&bytes[12..16], &[0, 1, 9, 255]);
}

#[test]
fn color_image_bytes_roundtrip_through_from_bytes() {
    let img = ColorImage::from_fn(4, 4, |x, y| Rgba::new((x * 50) as u8, (y * 60) as u8, 1, 2));
    let back = ColorImage::from_bytes(4, 4, img.as_bytes()).expect("length matches");
    assert_eq!(back, img);
}

#[test]
fn filled_image_is_uniform() {
    let img = ColorImage::filled(5, 3, Rgba::grey(128));
    assert!(img.pixels().all(|(_, _, p)| p == Rgba::new(128, 128, 128, 255)));
}

// ===== Codec =====

fn scratch(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("stereo-zncc-it-{}-{name}", std::process::id()))
}

#[test]
fn png_codec_preserves_dimensions_and_alpha() {
    let img = ColorImage::from_fn(7, 5, |x, y| Rgba::new(x as u8, y as u8, (x * y) as u8, 128));
    let path = scratch("alpha.png");
    PngCodec.encode(&path, &img).unwrap();
    let back = PngCodec.decode(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(back.dimensions(), (7, 5));
    assert_eq!(back.get(6, 4), Rgba::new(6, 4, 24, 128));
}

#[test]
fn png_codec_rejects_garbage() {
    let path = scratch("garbage.png");
    std::fs::write(&path, b"definitely not a png").unwrap();
    let result = PngCodec.decode(&path);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(DepthError::Codec { .. })));
}
