//! Format Strategy
//!
//! `optimize_single_image` reads a file, probes its real format and hands it
//! to the PNG or JPEG routine. Per-file faults never escape: they come back as
//! a not-optimized [`TaskResult`] with the file left as it was.

mod jpeg;
mod photo;
mod png;

pub use jpeg::optimize_jpg;
pub use photo::{is_big_png_photo, looks_like_photo};
pub use png::optimize_png;

use image::ImageFormat;
use std::fs;
use tracing::{debug, info, warn};

use crate::codec::{self, format_name};
use crate::config::{Task, TaskResult};
use crate::error::OptimizeError;

/// Optimize one file. Always returns a result, never panics on bad input.
pub fn optimize_single_image(task: &Task) -> TaskResult {
    let path = task.src_path();

    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read file");
            return TaskResult::undecodable(task, 0).with_error(OptimizeError::fs(path, e));
        }
    };
    let orig_size = bytes.len() as u64;

    let decoded = match codec::decode(&bytes) {
        Ok(d) => d,
        Err(OptimizeError::Unsupported(format)) => {
            info!(path = %path.display(), format = %format, "Format not supported, skipping");
            return TaskResult::unsupported(task, &format, None, orig_size);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot decode image, skipping");
            return TaskResult::undecodable(task, orig_size);
        }
    };

    let format = format_name(decoded.format);
    let mode = decoded.raster.mode();
    debug!(path = %path.display(), format = %format, mode = %mode, "Decoded");

    let outcome = match decoded.format {
        ImageFormat::Png => optimize_png(task, decoded.raster, orig_size),
        ImageFormat::Jpeg => optimize_jpg(task, &bytes, decoded.raster),
        _ => return TaskResult::unsupported(task, &format, Some(mode), orig_size),
    };

    outcome.unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Optimization failed, original kept");
        TaskResult::untouched(task, format, Some(mode), orig_size).with_error(e)
    })
}
