// codec.rs — Image file decode/encode.
//
// The pipeline only ever sees packed RGBA8 grids. `ImageCodec` is the seam
// between files on disk and those grids; `PngCodec` is the production
// implementation (the `image` crate), tests substitute an in-memory one.

use std::path::Path;

use crate::error::{DepthError, Result};
use crate::image::ColorImage;

/// Converts a file path to and from an RGBA8 pixel grid.
pub trait ImageCodec {
    fn decode(&self, path: &Path) -> Result<ColorImage>;
    fn encode(&self, path: &Path, image: &ColorImage) -> Result<()>;
}

/// PNG (and anything else `image` recognises on decode) via the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn decode(&self, path: &Path) -> Result<ColorImage> {
        let decoded = image::open(path).map_err(|e| codec_error(path, e))?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        tracing::debug!(path = %path.display(), width = w, height = h, "decoded image");
        ColorImage::from_bytes(w as usize, h as usize, rgba.as_raw()).ok_or_else(|| DepthError::Codec {
            path: path.to_path_buf(),
            reason: "decoded buffer does not match its dimensions".into(),
        })
    }

    fn encode(&self, path: &Path, img: &ColorImage) -> Result<()> {
        image::save_buffer_with_format(
            path,
            img.as_bytes(),
            img.width() as u32,
            img.height() as u32,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|e| codec_error(path, e))?;
        tracing::debug!(path = %path.display(), width = img.width(), height = img.height(), "encoded image");
        Ok(())
    }
}

fn codec_error(path: &Path, err: image::ImageError) -> DepthError {
    DepthError::Codec {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Rgba;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("stereo-zncc-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_png_preserves_rgba() {
        let img = ColorImage::from_fn(5, 3, |x, y| Rgba::new(x as u8 * 40, y as u8 * 80, 7, 200));
        let path = scratch_path("codec.png");
        PngCodec.encode(&path, &img).unwrap();
        let back = PngCodec.decode(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, img);
    }

    #[test]
    fn test_missing_file_is_codec_error() {
        let path = scratch_path("does-not-exist.png");
        let err = PngCodec.decode(&path).unwrap_err();
        assert!(matches!(err, DepthError::Codec { .. }), "{err}");
    }
}
