//! JPEG strategy: re-encode at the lowest acceptable quality.

use tracing::debug;

use crate::codec::{self, JpegLayout};
use crate::commit::commit;
use crate::config::{Task, TaskResult};
use crate::dynamic_quality::jpeg_dynamic_quality;
use crate::error::Result;
use crate::raster::Raster;
use crate::transform::{downsize, make_grayscale};

pub fn optimize_jpg(task: &Task, source: &[u8], raster: Raster) -> Result<TaskResult> {
    let opts = task.options();
    let src = task.src_path();
    let orig_size = source.len() as u64;

    let exif = codec::read_exif(source);
    let had_exif = exif.is_some();

    let mut result = TaskResult::untouched(task, "JPEG", Some(raster.mode()), orig_size);
    result.had_exif = had_exif;
    result.has_exif = had_exif;

    let (img, was_downsized) = if opts.wants_downsize() {
        downsize(raster, opts.max_w, opts.max_h)
    } else {
        (raster, false)
    };
    let img = if opts.grayscale { make_grayscale(img) } else { img };

    let quality = if opts.fast_mode {
        opts.fixed_quality()
    } else {
        jpeg_dynamic_quality(&img, &opts.tuning.search)?
    };

    let layout = if orig_size > opts.tuning.progressive_min_size {
        JpegLayout::Progressive
    } else {
        JpegLayout::Baseline
    };

    let mut encoded = codec::encode_jpeg(&img, quality, layout)?;
    let mut has_exif = false;
    if opts.keep_exif {
        if let Some(exif) = exif {
            encoded = codec::transplant_exif(encoded, exif)?;
            has_exif = true;
        }
    }

    let outcome = commit(
        src,
        &encoded,
        !opts.no_size_comparison,
        false,
        None,
        opts.tuning.min_size_ratio,
    )?;

    debug!(
        path = %src.display(),
        quality,
        ?layout,
        committed = outcome.replaced,
        "JPEG processed"
    );

    result.quality = Some(quality);
    if outcome.replaced {
        result.result_mode = Some(img.mode());
        result.was_downsized = was_downsized;
        result.was_optimized = true;
        result.has_exif = has_exif;
        result.final_size = outcome.final_size;
    }
    Ok(result)
}
