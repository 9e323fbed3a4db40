//! In-memory image model
//!
//! [`Raster`] keeps the color mode a file was stored in, so an indexed PNG
//! stays indexed through the pipeline instead of being widened to RGBA on
//! decode.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Color layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    #[serde(rename = "RGB")]
    Rgb,
    #[serde(rename = "RGBA")]
    Rgba,
    L,
    #[serde(rename = "LA")]
    La,
    /// Palette (indexed) color.
    P,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
            ColorMode::L => "L",
            ColorMode::La => "LA",
            ColorMode::P => "P",
        }
    }

    pub fn from_color_type(color: image::ColorType) -> Self {
        let has_alpha = color.has_alpha();
        match (color.has_color(), has_alpha) {
            (false, false) => ColorMode::L,
            (false, true) => ColorMode::La,
            (true, false) => ColorMode::Rgb,
            (true, true) => ColorMode::Rgba,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Palette image: one byte per pixel indexing into `palette`.
///
/// `alpha` mirrors a PNG `tRNS` chunk and may be shorter than the palette;
/// missing entries are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    pub width: u32,
    pub height: u32,
    pub palette: Vec<[u8; 3]>,
    pub alpha: Option<Vec<u8>>,
    pub indices: Vec<u8>,
}

impl IndexedImage {
    pub fn new(
        width: u32,
        height: u32,
        palette: Vec<[u8; 3]>,
        alpha: Option<Vec<u8>>,
        indices: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(indices.len(), width as usize * height as usize);
        Self {
            width,
            height,
            palette,
            alpha,
            indices,
        }
    }

    /// RGBA value of a palette entry. Out-of-range indices read as opaque black.
    pub fn entry(&self, index: u8) -> [u8; 4] {
        let [r, g, b] = self
            .palette
            .get(index as usize)
            .copied()
            .unwrap_or([0, 0, 0]);
        let a = self
            .alpha
            .as_ref()
            .and_then(|t| t.get(index as usize).copied())
            .unwrap_or(255);
        [r, g, b, a]
    }

    pub fn has_transparency(&self) -> bool {
        self.alpha
            .as_ref()
            .is_some_and(|t| t.iter().take(self.palette.len()).any(|&a| a < 255))
    }

    /// Number of distinct indices that actually appear in the pixels.
    pub fn used_color_count(&self) -> usize {
        let mut seen = [false; 256];
        for &i in &self.indices {
            seen[i as usize] = true;
        }
        seen.iter().filter(|&&s| s).count()
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        let table: Vec<[u8; 4]> = (0..=255u8).map(|i| self.entry(i)).collect();
        let mut out = Vec::with_capacity(self.indices.len() * 4);
        for &i in &self.indices {
            out.extend_from_slice(&table[i as usize]);
        }
        RgbaImage::from_raw(self.width, self.height, out)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn to_rgb8(&self) -> RgbImage {
        let mut out = Vec::with_capacity(self.indices.len() * 3);
        for &i in &self.indices {
            let [r, g, b, _] = self.entry(i);
            out.extend_from_slice(&[r, g, b]);
        }
        RgbImage::from_raw(self.width, self.height, out)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Raster {
    Rgb(RgbImage),
    Rgba(RgbaImage),
    Luma(GrayImage),
    LumaA(GrayAlphaImage),
    Indexed(IndexedImage),
}

impl Raster {
    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgb8(i) => Raster::Rgb(i),
            DynamicImage::ImageRgba8(i) => Raster::Rgba(i),
            DynamicImage::ImageLuma8(i) => Raster::Luma(i),
            DynamicImage::ImageLumaA8(i) => Raster::LumaA(i),
            // 16-bit and float layouts are narrowed to 8 bits per channel
            other => match ColorMode::from_color_type(other.color()) {
                ColorMode::L => Raster::Luma(other.to_luma8()),
                ColorMode::La => Raster::LumaA(other.to_luma_alpha8()),
                ColorMode::Rgba => Raster::Rgba(other.to_rgba8()),
                _ => Raster::Rgb(other.to_rgb8()),
            },
        }
    }

    /// Truecolor view for resampling. Indexed images expand to RGB(A).
    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            Raster::Rgb(i) => DynamicImage::ImageRgb8(i.clone()),
            Raster::Rgba(i) => DynamicImage::ImageRgba8(i.clone()),
            Raster::Luma(i) => DynamicImage::ImageLuma8(i.clone()),
            Raster::LumaA(i) => DynamicImage::ImageLumaA8(i.clone()),
            Raster::Indexed(i) if i.has_transparency() => DynamicImage::ImageRgba8(i.to_rgba8()),
            Raster::Indexed(i) => DynamicImage::ImageRgb8(i.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Raster::Rgb(i) => i.dimensions(),
            Raster::Rgba(i) => i.dimensions(),
            Raster::Luma(i) => i.dimensions(),
            Raster::LumaA(i) => i.dimensions(),
            Raster::Indexed(i) => (i.width, i.height),
        }
    }

    pub fn mode(&self) -> ColorMode {
        match self {
            Raster::Rgb(_) => ColorMode::Rgb,
            Raster::Rgba(_) => ColorMode::Rgba,
            Raster::Luma(_) => ColorMode::L,
            Raster::LumaA(_) => ColorMode::La,
            Raster::Indexed(_) => ColorMode::P,
        }
    }

    /// True when the layout can express transparency: an alpha channel, or a
    /// palette with a transparency table.
    pub fn has_alpha(&self) -> bool {
        match self {
            Raster::Rgba(_) | Raster::LumaA(_) => true,
            Raster::Indexed(i) => i.alpha.is_some(),
            Raster::Rgb(_) | Raster::Luma(_) => false,
        }
    }

    /// Drop alpha without compositing.
    pub fn to_rgb8(&self) -> RgbImage {
        match self {
            Raster::Rgb(i) => i.clone(),
            Raster::Indexed(i) => i.to_rgb8(),
            other => other.to_dynamic().to_rgb8(),
        }
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            Raster::Rgba(i) => i.clone(),
            Raster::Indexed(i) => i.to_rgba8(),
            other => other.to_dynamic().to_rgba8(),
        }
    }

    /// Raw interleaved samples and the channel count.
    pub fn samples(&self) -> (std::borrow::Cow<'_, [u8]>, usize) {
        use std::borrow::Cow;
        match self {
            Raster::Rgb(i) => (Cow::Borrowed(i.as_raw().as_slice()), 3),
            Raster::Rgba(i) => (Cow::Borrowed(i.as_raw().as_slice()), 4),
            Raster::Luma(i) => (Cow::Borrowed(i.as_raw().as_slice()), 1),
            Raster::LumaA(i) => (Cow::Borrowed(i.as_raw().as_slice()), 2),
            Raster::Indexed(i) => (Cow::Owned(i.to_rgba8().into_raw()), 4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_color_indexed() -> IndexedImage {
        IndexedImage::new(
            2,
            2,
            vec![[255, 0, 0], [0, 0, 255]],
            Some(vec![255, 0]),
            vec![0, 1, 1, 0],
        )
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(ColorMode::Rgb.to_string(), "RGB");
        assert_eq!(ColorMode::La.to_string(), "LA");
        assert_eq!(ColorMode::P.to_string(), "P");
        assert_eq!(serde_json::to_string(&ColorMode::Rgba).unwrap(), "\"RGBA\"");
    }

    #[test]
    fn test_indexed_expansion() {
        let img = two_color_indexed();
        assert!(img.has_transparency());
        assert_eq!(img.used_color_count(), 2);

        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [0, 0, 255, 0]);
        assert_eq!(img.to_rgb8().get_pixel(1, 1).0, [255, 0, 0]);
    }

    #[test]
    fn test_out_of_range_index_is_black() {
        let img = IndexedImage::new(1, 1, vec![[9, 9, 9]], None, vec![7]);
        assert_eq!(img.entry(7), [0, 0, 0, 255]);
        assert!(!img.has_transparency());
    }

    #[test]
    fn test_from_dynamic_narrows_16_bit() {
        let wide = DynamicImage::new_rgb16(3, 2);
        let raster = Raster::from_dynamic(wide);
        assert_eq!(raster.mode(), ColorMode::Rgb);
        assert_eq!(raster.dimensions(), (3, 2));

        let gray = DynamicImage::new_luma_a16(1, 1);
        assert_eq!(Raster::from_dynamic(gray).mode(), ColorMode::La);
    }

    #[test]
    fn test_has_alpha_is_structural() {
        let opaque_rgba = Raster::Rgba(RgbaImage::from_pixel(1, 1, image::Rgba([1, 2, 3, 255])));
        assert!(opaque_rgba.has_alpha());
        assert!(!Raster::Rgb(RgbImage::new(1, 1)).has_alpha());
        assert!(Raster::Indexed(two_color_indexed()).has_alpha());
    }
}
