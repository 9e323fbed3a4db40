//! Per-file status lines and the overall-progress line.

use std::time::Duration;

use shared_utils::{format_bytes, format_signed_bytes};

use crate::batch::BatchSummary;
use crate::config::TaskResult;
use crate::raster::ColorMode;

const ICON_OPTIMIZED: &str = "✅";
const ICON_SKIPPED: &str = "🔴";
const ICON_EXIF: &str = "ℹ️";
const ICON_DOWNSIZED: &str = "⤵";
const ICON_SMALLER: &str = "🔻";

/// Default terminal width when none can be determined.
pub const DEFAULT_LINE_WIDTH: usize = 80;

fn display_format(format: &str) -> String {
    format.replace("JPEG", "JPG")
}

fn display_mode(mode: Option<ColorMode>) -> &'static str {
    mode.map(|m| m.as_str()).unwrap_or("?")
}

/// Keep the tail of `path`, padded to `width` chars.
fn tail(path: &str, width: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    let start = chars.len().saturating_sub(width);
    let s: String = chars[start..].iter().collect();
    format!("{:<width$}", s, width = width)
}

/// Two lines for an optimized file, one for a skipped one.
pub fn render_file_status(r: &TaskResult, line_width: usize) -> String {
    let name = r.src_path.display().to_string();

    if !r.was_optimized {
        let mut line = format!("{}  [SKIPPED] {}", ICON_SKIPPED, tail(&name, line_width.saturating_sub(15)));
        if let Some(err) = &r.error {
            line.push_str(&format!("\n    {}", err));
        }
        return line;
    }

    let percent = if r.orig_size > 0 {
        100.0 - r.final_size as f64 / r.orig_size as f64 * 100.0
    } else {
        0.0
    };
    let o_colors = match r.orig_mode {
        Some(ColorMode::P) => r.orig_colors.to_string(),
        _ => String::new(),
    };
    let colors = match r.result_mode {
        Some(ColorMode::P) => r.final_colors.to_string(),
        _ => String::new(),
    };
    let exif_before = if r.had_exif { ICON_EXIF } else { "" };
    let exif_after = if r.has_exif { ICON_EXIF } else { "" };
    let down = if r.was_downsized { ICON_DOWNSIZED } else { "" };

    format!(
        "{}  [OPTIMIZED] {}\n    {} {}/{}{}: {}  ->  {}{}{}/{}{}: {} {} {:.1}%",
        ICON_OPTIMIZED,
        tail(&name, line_width.saturating_sub(17)),
        exif_before,
        display_format(&r.orig_format),
        display_mode(r.orig_mode),
        o_colors,
        format_bytes(r.orig_size),
        down,
        exif_after,
        display_format(&r.result_format),
        display_mode(r.result_mode),
        colors,
        format_bytes(r.final_size),
        ICON_SMALLER,
        percent
    )
}

/// `[12.3s 45.0%] ✅ 10 🔴 3, saved 1.20 MB`
pub fn render_overall_progress(summary: &BatchSummary, elapsed: Duration) -> String {
    format!(
        "[{:.1}s {:.1}%] {} {} {} {}, saved {}",
        elapsed.as_secs_f64(),
        summary.percent_done(),
        ICON_OPTIMIZED,
        summary.counts.succeeded,
        ICON_SKIPPED,
        summary.counts.skipped + summary.counts.failed,
        format_signed_bytes(summary.counts.bytes_saved)
    )
}
