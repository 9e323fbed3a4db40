//! "Is this PNG really a photo?" heuristic driving optional PNG→JPEG conversion.

use image::ImageFormat;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::codec::{self, JpegLayout};
use crate::config::Tuning;
use crate::error::{OptimizeError, Result};
use crate::raster::{ColorMode, Raster};
use crate::transform::{count_unique_colors, count_unique_rgba, downsize};

/// True when the file at `path` is a big, color-rich PNG that stays big even
/// as a downscaled JPEG.
pub fn is_big_png_photo(path: &Path, tuning: &Tuning) -> Result<bool> {
    let bytes = fs::read(path).map_err(|e| OptimizeError::fs(path, e))?;
    let decoded = codec::decode(&bytes)?;
    if decoded.format != ImageFormat::Png {
        return Ok(false);
    }
    looks_like_photo(&decoded.raster, tuning)
}

/// The checks of [`is_big_png_photo`] on an already decoded PNG, cheapest first.
pub fn looks_like_photo(raster: &Raster, tuning: &Tuning) -> Result<bool> {
    if matches!(raster.mode(), ColorMode::P | ColorMode::L | ColorMode::La) {
        return Ok(false);
    }

    let (w, h) = raster.dimensions();
    let area = w as u64 * h as u64;
    if area < tuning.photo_min_area {
        return Ok(false);
    }

    let limit = tuning.photo_min_unique_colors;
    let unique = if raster.has_alpha() {
        count_unique_rgba(&raster.to_rgba8(), limit)
    } else {
        count_unique_colors(&raster.to_rgb8(), limit)
    };
    if unique <= tuning.photo_min_unique_colors {
        debug!(unique, "Too few colors for a photo");
        return Ok(false);
    }

    let edge = tuning.photo_probe_edge;
    let rgb = Raster::Rgb(raster.to_rgb8());
    let (probe, _) = if w > h {
        downsize(rgb, edge, 0)
    } else {
        downsize(rgb, 0, edge)
    };
    let jpeg = codec::encode_jpeg(&probe, tuning.photo_probe_quality, JpegLayout::Baseline)?;
    let size = jpeg.len() as u64;

    debug!(area, probe_jpeg_bytes = size, threshold = tuning.photo_min_jpeg_size, "Photo heuristic probe");
    Ok(size > tuning.photo_min_jpeg_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn flat_rgb(w: u32, h: u32) -> Raster {
        Raster::Rgb(RgbImage::from_pixel(w, h, Rgb([40, 80, 120])))
    }

    #[test]
    fn test_small_image_is_not_photo() {
        let t = Tuning::default();
        assert!(!looks_like_photo(&flat_rgb(100, 100), &t).unwrap());
    }

    #[test]
    fn test_flat_big_image_is_not_photo() {
        let t = Tuning::default();
        assert!(!looks_like_photo(&flat_rgb(1024, 768), &t).unwrap());
    }

    #[test]
    fn test_gray_and_palette_modes_are_skipped() {
        let t = Tuning {
            photo_min_area: 0,
            photo_min_unique_colors: 0,
            photo_min_jpeg_size: 0,
            ..Tuning::default()
        };
        let gray = Raster::Luma(image::GrayImage::new(8, 8));
        assert!(!looks_like_photo(&gray, &t).unwrap());
        // with every threshold at zero an RGB image passes
        let rgb = Raster::Rgb(RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8, y as u8, 0])));
        assert!(looks_like_photo(&rgb, &t).unwrap());
    }

    #[test]
    fn test_alpha_counts_toward_unique_colors() {
        let t = Tuning {
            photo_min_area: 0,
            photo_min_unique_colors: 1,
            photo_min_jpeg_size: 0,
            ..Tuning::default()
        };
        // one RGB value, 64 alpha levels
        let fading = RgbaImage::from_fn(8, 8, |x, y| Rgba([40, 80, 120, (x * 32 + y * 4) as u8]));
        assert!(looks_like_photo(&Raster::Rgba(fading.clone()), &t).unwrap());

        let opaque = Raster::Rgb(image::DynamicImage::ImageRgba8(fading).into_rgb8());
        assert!(!looks_like_photo(&opaque, &t).unwrap());
    }

    #[test]
    fn test_jpeg_file_is_not_png_photo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        let bytes = codec::encode_jpeg(&flat_rgb(16, 16), 90, JpegLayout::Baseline).unwrap();
        fs::write(&path, bytes).unwrap();
        assert!(!is_big_png_photo(&path, &Tuning::default()).unwrap());
    }
}
