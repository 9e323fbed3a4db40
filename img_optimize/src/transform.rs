//! Transform Pipeline
//!
//! Pure functions over a decoded [`Raster`]:
//! - `remove_transparency`: composite alpha over a background color
//! - `downsize`: fit inside max bounds (never upscale)
//! - `do_reduce_colors`: quantize to an indexed image
//! - `make_grayscale`: luma transform (palette entries only for indexed)
//! - `rebuild_palette`: minimal exact palette for the used pixels

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayAlphaImage, GrayImage, Luma, LumaA, RgbImage, RgbaImage};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::config::Tuning;
use crate::error::{OptimizeError, Result};
use crate::palette::{Palette, MAX_PALETTE_SIZE};
use crate::raster::{IndexedImage, Raster};

/// ITU-R 601-2 luma, integer truncation.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

#[inline]
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8
}

// ============================================================================
// Transparency
// ============================================================================

/// Composite over an opaque `bg` and return RGB. Images without an alpha
/// channel or transparency table come back untouched.
pub fn remove_transparency(raster: Raster, bg: [u8; 3]) -> Raster {
    let (w, h) = raster.dimensions();
    match raster {
        Raster::Rgba(img) => {
            let mut out = Vec::with_capacity(w as usize * h as usize * 3);
            for px in img.pixels() {
                let [r, g, b, a] = px.0;
                out.extend_from_slice(&[blend(r, bg[0], a), blend(g, bg[1], a), blend(b, bg[2], a)]);
            }
            rgb_from_raw(w, h, out)
        }
        Raster::LumaA(img) => {
            let mut out = Vec::with_capacity(w as usize * h as usize * 3);
            for px in img.pixels() {
                let [l, a] = px.0;
                out.extend_from_slice(&[blend(l, bg[0], a), blend(l, bg[1], a), blend(l, bg[2], a)]);
            }
            rgb_from_raw(w, h, out)
        }
        Raster::Indexed(img) if img.alpha.is_some() => {
            // Blend the palette once instead of every pixel
            let table: Vec<[u8; 3]> = (0..=255u8)
                .map(|i| {
                    let [r, g, b, a] = img.entry(i);
                    [blend(r, bg[0], a), blend(g, bg[1], a), blend(b, bg[2], a)]
                })
                .collect();
            let mut out = Vec::with_capacity(img.indices.len() * 3);
            for &i in &img.indices {
                out.extend_from_slice(&table[i as usize]);
            }
            rgb_from_raw(w, h, out)
        }
        other => other,
    }
}

fn rgb_from_raw(w: u32, h: u32, raw: Vec<u8>) -> Raster {
    Raster::Rgb(RgbImage::from_raw(w, h, raw).unwrap_or_else(|| RgbImage::new(w, h)))
}

// ============================================================================
// Downsize
// ============================================================================

/// Target size for fitting `(w, h)` inside `(max_w, max_h)`.
///
/// A bound of 0, or one larger than the image, means "no constraint" on that
/// axis. Returns `None` when nothing needs to change.
pub fn fit_dimensions(w: u32, h: u32, max_w: u32, max_h: u32) -> Option<(u32, u32)> {
    let max_w = if max_w == 0 || max_w > w { w } else { max_w };
    let max_h = if max_h == 0 || max_h > h { h } else { max_h };

    if (max_w, max_h) == (w, h) || w == 0 || h == 0 {
        return None;
    }

    // Exact (unrounded) side lengths so the chosen candidate never breaks the
    // other bound through rounding.
    let fit_w_height = h as f64 * max_w as f64 / w as f64;
    let fit_h_width = w as f64 * max_h as f64 / h as f64;

    let by_width = (max_w, (fit_w_height.round() as u32).max(1));
    let by_height = ((fit_h_width.round() as u32).max(1), max_h);

    // 面积相同时取按宽度缩放的结果
    if max_w as f64 * fit_w_height <= fit_h_width * max_h as f64 {
        Some(by_width)
    } else {
        Some(by_height)
    }
}

/// Shrink to fit `max_w` × `max_h`. Returns the image and whether it changed.
pub fn downsize(raster: Raster, max_w: u32, max_h: u32) -> (Raster, bool) {
    let (w, h) = raster.dimensions();
    let Some((tw, th)) = fit_dimensions(w, h, max_w, max_h) else {
        return (raster, false);
    };

    debug!(from = ?(w, h), to = ?(tw, th), "Downsizing image");

    let resized = match raster {
        Raster::Rgb(img) => Raster::Rgb(imageops::resize(&img, tw, th, FilterType::Lanczos3)),
        Raster::Rgba(img) => Raster::Rgba(imageops::resize(&img, tw, th, FilterType::Lanczos3)),
        Raster::Luma(img) => Raster::Luma(imageops::resize(&img, tw, th, FilterType::Lanczos3)),
        Raster::LumaA(img) => Raster::LumaA(imageops::resize(&img, tw, th, FilterType::Lanczos3)),
        Raster::Indexed(img) => resize_indexed(&img, tw, th),
    };
    (resized, true)
}

/// Lanczos3 on the expanded colors, then back to a palette no larger than
/// the source one.
fn resize_indexed(img: &IndexedImage, tw: u32, th: u32) -> Raster {
    let colors = img.palette.len().clamp(2, MAX_PALETTE_SIZE) as u16;
    let resized = imageops::resize(&img.to_rgba8(), tw, th, FilterType::Lanczos3);

    match quantize(&resized, colors) {
        Ok(small) => Raster::Indexed(small),
        Err(e) => {
            warn!(error = %e, "Requantizing resized palette image failed, keeping truecolor");
            if img.has_transparency() {
                Raster::Rgba(resized)
            } else {
                Raster::Rgb(DynamicImage::ImageRgba8(resized).into_rgb8())
            }
        }
    }
}

// ============================================================================
// Color reduction
// ============================================================================

/// Convert to an indexed image with at most `max_colors` entries.
///
/// Alpha is flattened against `tuning.default_bg` first. An indexed image
/// whose palette is already under 256 entries and within the cap is kept as
/// is. Returns `(image, original_colors, final_colors)`; the original count is
/// the number of used indices for indexed input and 0 for truecolor.
pub fn do_reduce_colors(
    raster: Raster,
    max_colors: u16,
    tuning: &Tuning,
) -> Result<(Raster, usize, usize)> {
    let max_colors = max_colors.clamp(2, MAX_PALETTE_SIZE as u16);

    let orig_colors = match &raster {
        Raster::Indexed(img) => img.used_color_count(),
        _ => 0,
    };

    let raster = remove_transparency(raster, tuning.default_bg);

    if let Raster::Indexed(img) = &raster {
        let entries = img.palette.len();
        if entries < MAX_PALETTE_SIZE && entries <= max_colors as usize {
            debug!(entries, "Palette already within limit, reusing");
            return Ok((raster, orig_colors, entries));
        }
    }

    let quantized = quantize(&raster.to_rgba8(), max_colors)?;
    let final_colors = quantized.palette.len();
    debug!(orig_colors, final_colors, max_colors, "Colors reduced");
    Ok((Raster::Indexed(quantized), orig_colors, final_colors))
}

/// libimagequant with full dithering. A transparency table is only attached
/// when some palette entry is not opaque.
fn quantize(rgba: &RgbaImage, max_colors: u16) -> Result<IndexedImage> {
    let (w, h) = rgba.dimensions();

    let pixels: Vec<imagequant::RGBA> = rgba
        .pixels()
        .map(|p| imagequant::RGBA::new(p[0], p[1], p[2], p[3]))
        .collect();

    let liq_err = |e: imagequant::Error| OptimizeError::encode("PNG", format!("quantization: {e}"));

    let mut attr = imagequant::Attributes::new();
    attr.set_max_colors(max_colors as u32).map_err(liq_err)?;
    let mut liq_image = attr
        .new_image(pixels, w as usize, h as usize, 0.0)
        .map_err(liq_err)?;
    let mut res = attr.quantize(&mut liq_image).map_err(liq_err)?;
    res.set_dithering_level(1.0).map_err(liq_err)?;
    let (palette, indices) = res.remapped(&mut liq_image).map_err(liq_err)?;

    let alpha = palette
        .iter()
        .any(|c| c.a < 255)
        .then(|| palette.iter().map(|c| c.a).collect());
    let palette = palette.iter().map(|c| [c.r, c.g, c.b]).collect();
    Ok(IndexedImage::new(w, h, palette, alpha, indices))
}

// ============================================================================
// Grayscale
// ============================================================================

/// Desaturate. Indexed images only have their palette entries rewritten.
pub fn make_grayscale(raster: Raster) -> Raster {
    match raster {
        Raster::Rgb(img) => {
            let (w, h) = img.dimensions();
            let mut out = GrayImage::new(w, h);
            for (dst, src) in out.pixels_mut().zip(img.pixels()) {
                *dst = Luma([luma(src[0], src[1], src[2])]);
            }
            Raster::Luma(out)
        }
        Raster::Rgba(img) => {
            let (w, h) = img.dimensions();
            let mut out = GrayAlphaImage::new(w, h);
            for (dst, src) in out.pixels_mut().zip(img.pixels()) {
                *dst = LumaA([luma(src[0], src[1], src[2]), src[3]]);
            }
            Raster::LumaA(out)
        }
        Raster::Indexed(mut img) => {
            for entry in img.palette.iter_mut() {
                let l = luma(entry[0], entry[1], entry[2]);
                *entry = [l, l, l];
            }
            Raster::Indexed(img)
        }
        gray @ (Raster::Luma(_) | Raster::LumaA(_)) => gray,
    }
}

// ============================================================================
// Palette rebuild
// ============================================================================

/// Rebuild the smallest exact palette for the pixels actually present.
///
/// Entries are assigned in first-seen order and identical colors stored under
/// different indices are merged. With a transparency table two entries are
/// only identical when their alpha matches too.
/// Returns the new image and its palette size.
pub fn rebuild_palette(img: IndexedImage) -> Result<(IndexedImage, usize)> {
    if img.alpha.is_some() {
        return Ok(compact_indices(img));
    }

    let lookup: Vec<[u8; 3]> = (0..=255u8).map(|i| {
        let [r, g, b, _] = img.entry(i);
        [r, g, b]
    }).collect();

    let mut palette = Palette::new();
    let mut remap: [Option<u8>; 256] = [None; 256];
    let mut indices = Vec::with_capacity(img.indices.len());

    for &old in &img.indices {
        let new = match remap[old as usize] {
            Some(n) => n,
            None => {
                let n = palette.add(lookup[old as usize])?;
                remap[old as usize] = Some(n);
                n
            }
        };
        indices.push(new);
    }

    let size = palette.len();
    let rebuilt = IndexedImage::new(img.width, img.height, palette.into_colors(), None, indices);
    Ok((rebuilt, size))
}

fn compact_indices(img: IndexedImage) -> (IndexedImage, usize) {
    let mut remap: [Option<u8>; 256] = [None; 256];
    let mut by_color: HashMap<[u8; 4], u8> = HashMap::new();
    let mut palette = Vec::new();
    let mut alpha = Vec::new();
    let mut indices = Vec::with_capacity(img.indices.len());

    for &old in &img.indices {
        let new = *remap[old as usize].get_or_insert_with(|| {
            let rgba = img.entry(old);
            *by_color.entry(rgba).or_insert_with(|| {
                let [r, g, b, a] = rgba;
                palette.push([r, g, b]);
                alpha.push(a);
                (palette.len() - 1) as u8
            })
        });
        indices.push(new);
    }

    let size = palette.len();
    (IndexedImage::new(img.width, img.height, palette, Some(alpha), indices), size)
}

/// Count distinct RGB colors, stopping as soon as `limit` is exceeded.
/// Returns `min(count, limit + 1)`.
pub fn count_unique_colors(img: &RgbImage, limit: usize) -> usize {
    count_unique_pixels::<3>(img.as_raw(), img.width() as usize, limit)
}

/// [`count_unique_colors`] over RGBA, so pixels differing only in alpha count
/// as different colors.
pub fn count_unique_rgba(img: &RgbaImage, limit: usize) -> usize {
    count_unique_pixels::<4>(img.as_raw(), img.width() as usize, limit)
}

fn count_unique_pixels<const N: usize>(raw: &[u8], width: usize, limit: usize) -> usize {
    if width == 0 {
        return 0;
    }
    let rows: Vec<&[u8]> = raw.chunks(width * N).collect();
    let mut seen: HashSet<[u8; N]> = HashSet::with_capacity(limit.min(1 << 20) + 1);

    // 按行块并行预去重, 再顺序合并以便提前退出
    for block in rows.chunks(64) {
        let partial: HashSet<[u8; N]> = block
            .par_iter()
            .flat_map_iter(|row| {
                row.chunks_exact(N).map(|p| {
                    let mut px = [0u8; N];
                    px.copy_from_slice(p);
                    px
                })
            })
            .collect();
        seen.extend(partial);
        if seen.len() > limit {
            return limit + 1;
        }
    }
    seen.len()
}
