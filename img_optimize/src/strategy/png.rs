//! PNG strategy: lossless re-encode, or conversion to a sibling JPEG.

use tracing::{debug, info, warn};

use shared_utils::common_utils::sibling_with_extension;

use crate::codec::{self, JpegLayout};
use crate::commit::commit;
use crate::config::{Task, TaskResult};
use crate::error::Result;
use crate::raster::Raster;
use crate::transform::{do_reduce_colors, downsize, make_grayscale, rebuild_palette, remove_transparency};

use super::photo::looks_like_photo;

pub fn optimize_png(task: &Task, raster: Raster, orig_size: u64) -> Result<TaskResult> {
    let opts = task.options();
    let orig_mode = raster.mode();
    let orig_colors = match &raster {
        Raster::Indexed(img) => img.used_color_count(),
        _ => 0,
    };

    let mut result = TaskResult::untouched(task, "PNG", Some(orig_mode), orig_size);
    result.orig_colors = orig_colors;
    result.final_colors = orig_colors;

    let convert = opts.convert_all || (opts.conv_big && looks_like_photo(&raster, &opts.tuning)?);
    if convert {
        convert_to_jpeg(task, raster, result)
    } else {
        recompress_png(task, raster, result)
    }
}

/// Flatten, optionally downsize/grayscale, write `<stem>.jpg` beside the source.
///
/// An existing `<stem>.jpg` belongs to someone else (possibly another task of
/// the same batch); the PNG is then left alone.
fn convert_to_jpeg(task: &Task, raster: Raster, mut result: TaskResult) -> Result<TaskResult> {
    let opts = task.options();
    let src = task.src_path();

    let sibling = sibling_with_extension(src, "jpg");
    let alt_output = (sibling.as_path() != src).then_some(sibling.as_path());
    if let Some(target) = alt_output.filter(|p| p.symlink_metadata().is_ok()) {
        warn!(
            path = %src.display(),
            target = %target.display(),
            "Sibling JPEG already exists, conversion skipped"
        );
        return Ok(result);
    }

    let (img, was_downsized) = if opts.wants_downsize() {
        downsize(raster, opts.max_w, opts.max_h)
    } else {
        (raster, false)
    };

    let img = match remove_transparency(img, opts.bg_color) {
        rgb @ Raster::Rgb(_) => rgb,
        other => Raster::Rgb(other.to_rgb8()),
    };
    let img = if opts.grayscale { make_grayscale(img) } else { img };

    let quality = opts.fixed_quality();
    let encoded = codec::encode_jpeg(&img, quality, JpegLayout::Progressive)?;

    let compare = !(opts.no_size_comparison || opts.convert_all);
    let outcome = commit(
        src,
        &encoded,
        compare,
        opts.force_del,
        alt_output,
        opts.tuning.min_size_ratio,
    )?;

    info!(
        path = %src.display(),
        converted = outcome.replaced,
        quality,
        bytes = outcome.final_size,
        "PNG → JPEG conversion"
    );

    result.result_format = "JPEG".to_string();
    result.result_mode = Some(img.mode());
    result.final_colors = 0;
    result.was_downsized = was_downsized;
    result.was_optimized = outcome.replaced;
    result.final_size = outcome.final_size;
    result.quality = Some(quality);
    if outcome.replaced {
        result.output_path = Some(alt_output.unwrap_or(src).to_path_buf());
    }
    Ok(result)
}

/// Transform pipeline then PNG back over the original.
fn recompress_png(task: &Task, raster: Raster, mut result: TaskResult) -> Result<TaskResult> {
    let opts = task.options();
    let src = task.src_path();

    let mut img = raster;
    if opts.remove_transparency {
        img = remove_transparency(img, opts.bg_color);
    }

    let mut was_downsized = false;
    if opts.wants_downsize() {
        (img, was_downsized) = downsize(img, opts.max_w, opts.max_h);
    }

    if opts.reduce_colors {
        // Flatten with the requested background rather than the default one
        if img.has_alpha() {
            img = remove_transparency(img, opts.bg_color);
        }
        let (reduced, orig, fin) = do_reduce_colors(img, opts.max_colors, &opts.tuning)?;
        img = reduced;
        result.final_colors = fin;
        if orig > 0 {
            result.orig_colors = orig;
        }
    }

    if opts.grayscale {
        img = make_grayscale(img);
    }

    if !opts.fast_mode {
        if let Raster::Indexed(indexed) = img {
            let (rebuilt, colors) = rebuild_palette(indexed)?;
            debug!(colors, "Palette rebuilt");
            result.final_colors = colors;
            img = Raster::Indexed(rebuilt);
        }
    }

    let encoded = codec::encode_png(&img)?;
    let outcome = commit(
        src,
        &encoded,
        !opts.no_size_comparison,
        false,
        None,
        opts.tuning.min_size_ratio,
    )?;

    result.result_mode = Some(img.mode());
    if !matches!(img, Raster::Indexed(_)) {
        result.final_colors = 0;
    }
    result.was_downsized = was_downsized;
    result.was_optimized = outcome.replaced;
    result.final_size = outcome.final_size;
    if !outcome.replaced {
        // the file on disk is still the original
        result.result_mode = result.orig_mode;
        result.final_colors = result.orig_colors;
    }
    Ok(result)
}
