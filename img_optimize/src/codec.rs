//! Codec layer
//!
//! Decoding probes content (never the extension). Indexed PNGs go through the
//! `png` crate directly so palette, tRNS and indices survive; everything else
//! decodes through `image`.
//!
//! Every encode runs through [`with_retry`]: preferred settings first, then
//! one fallback attempt.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use std::borrow::Cow;
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::error::{OptimizeError, Result};
use crate::raster::{IndexedImage, Raster};

/// Decoded file content with its detected format.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub format: ImageFormat,
    pub raster: Raster,
}

/// Upper-case name used in reports: "PNG", "JPEG", "GIF", ...
pub fn format_name(format: ImageFormat) -> String {
    format!("{:?}", format).to_uppercase()
}

/// Probe the content and decode PNG or JPEG.
///
/// Other recognizable formats give [`OptimizeError::Unsupported`] carrying the
/// format name; unrecognizable content gives [`OptimizeError::Decode`].
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let format = image::guess_format(bytes).map_err(OptimizeError::decode)?;
    let raster = match format {
        ImageFormat::Png => decode_png(bytes)?,
        ImageFormat::Jpeg => decode_jpeg(bytes)?,
        other => return Err(OptimizeError::Unsupported(format_name(other))),
    };
    Ok(Decoded { format, raster })
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<Raster> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(Raster::from_dynamic(img))
}

pub fn decode_png(bytes: &[u8]) -> Result<Raster> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(OptimizeError::decode)?;

    let (width, height, depth, palette, alpha) = {
        let info = reader.info();
        if info.color_type != png::ColorType::Indexed {
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
            return Ok(Raster::from_dynamic(img));
        }
        let palette: Vec<[u8; 3]> = info
            .palette
            .as_ref()
            .ok_or_else(|| OptimizeError::decode("indexed PNG without PLTE chunk"))?
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let alpha = info.trns.as_ref().map(|t| t.to_vec());
        (info.width, info.height, info.bit_depth as u8, palette, alpha)
    };

    let mut buf = vec![0u8; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf).map_err(OptimizeError::decode)?;
    let indices = unpack_indices(&buf, frame.line_size, width, height, depth);

    Ok(Raster::Indexed(IndexedImage::new(width, height, palette, alpha, indices)))
}

/// Unpack 1/2/4/8-bit rows (MSB first) into one byte per pixel.
fn unpack_indices(buf: &[u8], line_size: usize, width: u32, height: u32, depth: u8) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut out = Vec::with_capacity(w * h);

    for row in buf.chunks(line_size).take(h) {
        if depth == 8 {
            out.extend_from_slice(&row[..w.min(row.len())]);
            continue;
        }
        let per_byte = 8 / depth as usize;
        let mask = (1u8 << depth) - 1;
        for x in 0..w {
            let byte = row.get(x / per_byte).copied().unwrap_or(0);
            let shift = 8 - depth as usize * (x % per_byte + 1);
            out.push((byte >> shift) & mask);
        }
    }
    out.resize(w * h, 0);
    out
}

/// Pack one-byte indices into rows of `depth` bits per pixel.
fn pack_indices(indices: &[u8], width: u32, depth: u8) -> Vec<u8> {
    if depth == 8 {
        return indices.to_vec();
    }
    let w = width as usize;
    let per_byte = 8 / depth as usize;
    let row_bytes = w.div_ceil(per_byte);
    let mut out = Vec::with_capacity(row_bytes * (indices.len() / w.max(1)));

    for row in indices.chunks(w.max(1)) {
        let start = out.len();
        out.resize(start + row_bytes, 0);
        for (x, &idx) in row.iter().enumerate() {
            let shift = 8 - depth as usize * (x % per_byte + 1);
            out[start + x / per_byte] |= idx << shift;
        }
    }
    out
}

/// Smallest PNG bit depth that can address `entries` palette slots.
fn indexed_bit_depth(entries: usize) -> png::BitDepth {
    match entries {
        0..=2 => png::BitDepth::One,
        3..=4 => png::BitDepth::Two,
        5..=16 => png::BitDepth::Four,
        _ => png::BitDepth::Eight,
    }
}

/// tRNS payload: only as long as the last non-opaque entry, `None` if every
/// entry is opaque.
fn trns_chunk(img: &IndexedImage) -> Option<Vec<u8>> {
    let alpha = img.alpha.as_ref()?;
    let mut trns: Vec<u8> = alpha.iter().take(img.palette.len()).copied().collect();
    while trns.last() == Some(&255) {
        trns.pop();
    }
    (!trns.is_empty()).then_some(trns)
}

// ============================================================================
// Encode retry
// ============================================================================

/// Run `primary`; on failure log it and run `fallback` once.
pub fn with_retry<T>(
    format: &'static str,
    primary: impl FnOnce() -> Result<T>,
    fallback: impl FnOnce() -> Result<T>,
) -> Result<T> {
    match primary() {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(format, error = %e, "Encoder failed, retrying with fallback settings");
            fallback()
        }
    }
}

// ============================================================================
// JPEG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegLayout {
    Baseline,
    Progressive,
}

/// Encode as JPEG. Alpha is dropped (callers flatten first); grayscale stays
/// single-channel.
pub fn encode_jpeg(raster: &Raster, quality: u8, layout: JpegLayout) -> Result<Vec<u8>> {
    let (w, h) = raster.dimensions();
    let quality = quality.clamp(1, 100);
    let (data, gray): (Cow<'_, [u8]>, bool) = match raster {
        Raster::Luma(img) => (Cow::Borrowed(img.as_raw().as_slice()), true),
        Raster::Rgb(img) => (Cow::Borrowed(img.as_raw().as_slice()), false),
        other => (Cow::Owned(other.to_rgb8().into_raw()), false),
    };

    let progressive = || encode_mozjpeg(&data, w, h, gray, quality);
    let baseline = || encode_baseline(&data, w, h, gray, quality);

    let out = match layout {
        JpegLayout::Progressive => with_retry("JPEG", progressive, baseline)?,
        JpegLayout::Baseline => with_retry("JPEG", baseline, progressive)?,
    };
    debug!(quality, ?layout, bytes = out.len(), "Encoded JPEG");
    Ok(out)
}

fn encode_baseline(data: &[u8], w: u32, h: u32, gray: bool, quality: u8) -> Result<Vec<u8>> {
    let color = if gray { ExtendedColorType::L8 } else { ExtendedColorType::Rgb8 };
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(data, w, h, color)
        .map_err(|e| OptimizeError::encode("JPEG", e))?;
    Ok(out)
}

/// Progressive with optimized Huffman tables. libjpeg errors unwind as
/// panics, so they are caught here.
fn encode_mozjpeg(data: &[u8], w: u32, h: u32, gray: bool, quality: u8) -> Result<Vec<u8>> {
    let result = catch_unwind(AssertUnwindSafe(|| -> std::io::Result<Vec<u8>> {
        let color = if gray {
            mozjpeg::ColorSpace::JCS_GRAYSCALE
        } else {
            mozjpeg::ColorSpace::JCS_RGB
        };
        let mut comp = mozjpeg::Compress::new(color);
        comp.set_size(w as usize, h as usize);
        comp.set_quality(quality as f32);
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);

        let mut started = comp.start_compress(Vec::new())?;
        started.write_scanlines(data)?;
        started.finish()
    }));

    match result {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(OptimizeError::encode("JPEG", e)),
        Err(_) => Err(OptimizeError::encode("JPEG", "mozjpeg aborted")),
    }
}

// ============================================================================
// PNG
// ============================================================================

/// Encode as PNG, keeping the raster's color mode.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    with_retry(
        "PNG",
        || encode_png_with(raster, png::Compression::Best),
        || encode_png_with(raster, png::Compression::Default),
    )
}

fn encode_png_with(raster: &Raster, compression: png::Compression) -> Result<Vec<u8>> {
    let png_err = |e: png::EncodingError| OptimizeError::encode("PNG", e);
    let (w, h) = raster.dimensions();
    let mut out = Vec::new();

    {
        let mut encoder = png::Encoder::new(&mut out, w, h);
        encoder.set_compression(compression);

        match raster {
            Raster::Indexed(img) => {
                let max_index = img.indices.iter().copied().max().map_or(0, |m| m as usize + 1);
                let entries = img.palette.len().max(max_index).max(1);
                let depth = indexed_bit_depth(entries);

                let mut palette: Vec<u8> = img.palette.iter().flatten().copied().collect();
                palette.resize(entries * 3, 0);

                encoder.set_color(png::ColorType::Indexed);
                encoder.set_depth(depth);
                encoder.set_filter(png::FilterType::NoFilter);
                encoder.set_palette(palette);
                if let Some(trns) = trns_chunk(img) {
                    encoder.set_trns(trns);
                }

                let mut writer = encoder.write_header().map_err(png_err)?;
                writer
                    .write_image_data(&pack_indices(&img.indices, w, depth as u8))
                    .map_err(png_err)?;
                writer.finish().map_err(png_err)?;
            }
            truecolor => {
                let color = match truecolor {
                    Raster::Rgb(_) => png::ColorType::Rgb,
                    Raster::Rgba(_) => png::ColorType::Rgba,
                    Raster::Luma(_) => png::ColorType::Grayscale,
                    _ => png::ColorType::GrayscaleAlpha,
                };
                let (samples, _) = truecolor.samples();

                encoder.set_color(color);
                encoder.set_depth(png::BitDepth::Eight);
                encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);

                let mut writer = encoder.write_header().map_err(png_err)?;
                writer.write_image_data(&samples).map_err(png_err)?;
                writer.finish().map_err(png_err)?;
            }
        }
    }

    debug!(mode = %raster.mode(), bytes = out.len(), "Encoded PNG");
    Ok(out)
}

// ============================================================================
// EXIF
// ============================================================================

/// The raw EXIF block of a JPEG, if present and non-empty.
pub fn read_exif(jpeg_bytes: &[u8]) -> Option<Bytes> {
    let jpeg = Jpeg::from_bytes(Bytes::copy_from_slice(jpeg_bytes)).ok()?;
    jpeg.exif().filter(|exif| !exif.is_empty())
}

/// Splice `exif` unchanged into a freshly encoded JPEG.
pub fn transplant_exif(encoded: Vec<u8>, exif: Bytes) -> Result<Vec<u8>> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(encoded))
        .map_err(|e| OptimizeError::encode("JPEG", format!("re-parse for EXIF: {e}")))?;
    jpeg.set_exif(Some(exif));

    let mut out = Vec::new();
    jpeg.encoder()
        .write_to(&mut out)
        .map_err(|e| OptimizeError::encode("JPEG", format!("write EXIF: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn sample_rgb(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 9) as u8, (y * 13) as u8, 128]))
    }

    #[test]
    fn test_format_name() {
        assert_eq!(format_name(ImageFormat::Png), "PNG");
        assert_eq!(format_name(ImageFormat::Jpeg), "JPEG");
        assert_eq!(format_name(ImageFormat::Gif), "GIF");
    }

    #[test]
    fn test_pack_unpack_sub_byte_depths() {
        let indices: Vec<u8> = vec![0, 1, 1, 0, 1, 0, 0, 1, 1, 1, 0, 0, 1, 0, 1];
        for depth in [1u8, 2, 4, 8] {
            let packed = pack_indices(&indices, 5, depth);
            let line = if depth == 8 { 5 } else { 5usize.div_ceil(8 / depth as usize) };
            assert_eq!(unpack_indices(&packed, line, 5, 3, depth), indices, "depth {depth}");
        }
    }

    #[test]
    fn test_bit_depth_selection() {
        assert_eq!(indexed_bit_depth(2), png::BitDepth::One);
        assert_eq!(indexed_bit_depth(3), png::BitDepth::Two);
        assert_eq!(indexed_bit_depth(16), png::BitDepth::Four);
        assert_eq!(indexed_bit_depth(17), png::BitDepth::Eight);
    }

    #[test]
    fn test_indexed_png_survives_encode_decode() {
        let img = IndexedImage::new(
            3,
            2,
            vec![[255, 0, 0], [0, 255, 0], [0, 0, 255]],
            Some(vec![0, 255, 255]),
            vec![0, 1, 2, 2, 1, 0],
        );
        let bytes = encode_png(&Raster::Indexed(img.clone())).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        let Raster::Indexed(back) = decoded.raster else { panic!("expected indexed") };
        assert_eq!(back.indices, img.indices);
        assert_eq!(back.palette, img.palette);
        // trailing opaque entries are trimmed from tRNS
        assert_eq!(back.alpha, Some(vec![0]));
    }

    #[test]
    fn test_opaque_palette_writes_no_trns() {
        let img = IndexedImage::new(2, 1, vec![[1, 2, 3], [4, 5, 6]], Some(vec![255, 255]), vec![0, 1]);
        assert_eq!(trns_chunk(&img), None);
    }

    #[test]
    fn test_truecolor_png_round_trip() {
        let mut rgba = RgbaImage::new(4, 4);
        rgba.put_pixel(1, 1, Rgba([10, 20, 30, 40]));
        let bytes = encode_png(&Raster::Rgba(rgba.clone())).unwrap();
        assert_eq!(decode(&bytes).unwrap().raster, Raster::Rgba(rgba));
    }

    #[test]
    fn test_jpeg_layouts_decode() {
        let raster = Raster::Rgb(sample_rgb(64, 48));
        for layout in [JpegLayout::Baseline, JpegLayout::Progressive] {
            let bytes = encode_jpeg(&raster, 85, layout).unwrap();
            let decoded = decode(&bytes).unwrap();
            assert_eq!(decoded.format, ImageFormat::Jpeg);
            assert_eq!(decoded.raster.dimensions(), (64, 48));
        }

        let gray = Raster::Luma(image::GrayImage::from_pixel(16, 16, image::Luma([90])));
        let bytes = encode_jpeg(&gray, 80, JpegLayout::Progressive).unwrap();
        assert_eq!(decode_jpeg(&bytes).unwrap().mode(), crate::raster::ColorMode::L);
    }

    #[test]
    fn test_retry_uses_fallback_once() {
        let mut fallback_calls = 0;
        let out: Result<u8> = with_retry(
            "PNG",
            || Err(OptimizeError::encode("PNG", "buffer limit")),
            || {
                fallback_calls += 1;
                Ok(7)
            },
        );
        assert_eq!(out.unwrap(), 7);
        assert_eq!(fallback_calls, 1);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(matches!(decode(b"definitely not an image"), Err(OptimizeError::Decode(_))));
    }

    #[test]
    fn test_exif_transplant() {
        let jpeg = encode_jpeg(&Raster::Rgb(sample_rgb(8, 8)), 90, JpegLayout::Baseline).unwrap();
        assert!(read_exif(&jpeg).is_none());

        let exif = Bytes::from_static(b"MM\0*\0\0\0\x08\0\0\0\0\0\0");
        let with_exif = transplant_exif(jpeg, exif.clone()).unwrap();
        assert_eq!(read_exif(&with_exif), Some(exif));
        assert!(decode(&with_exif).is_ok());
    }
}
