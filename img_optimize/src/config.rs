//! Configuration: tunables, per-run options and the per-file task/result records.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dynamic_quality::QualitySearch;
use crate::raster::ColorMode;

pub const DEFAULT_BG_COLOR: [u8; 3] = [255, 255, 255];

/// Every global threshold in one place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    /// Pixel area from which a PNG may count as a photo (1024×768).
    pub photo_min_area: u64,
    /// Unique colors a photo must exceed.
    pub photo_min_unique_colors: usize,
    /// Longer edge of the probe copy used by the photo heuristic.
    pub photo_probe_edge: u32,
    pub photo_probe_quality: u8,
    /// A probe JPEG larger than this means "rich photo content".
    pub photo_min_jpeg_size: u64,
    /// JPEGs up to this size are written baseline (progressive has fixed overhead).
    pub progressive_min_size: u64,
    /// Candidate must be below `original * min_size_ratio` to be committed.
    pub min_size_ratio: f64,
    /// Background for flattening inside color reduction.
    pub default_bg: [u8; 3],
    pub search: QualitySearch,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            photo_min_area: 786_432,
            photo_min_unique_colors: 65_536,
            photo_probe_edge: 1600,
            photo_probe_quality: 80,
            photo_min_jpeg_size: 250_000,
            progressive_min_size: 10_000,
            min_size_ratio: 0.99,
            default_bg: DEFAULT_BG_COLOR,
            search: QualitySearch::default(),
        }
    }
}

/// Console output flags; carried through to each result for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub quiet: bool,
    pub show_overall_progress: bool,
}

/// Options shared by every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOptions {
    /// Fixed JPEG quality. Only used in fast mode and for PNG→JPEG conversion.
    pub quality: Option<u8>,
    pub remove_transparency: bool,
    pub bg_color: [u8; 3],
    pub reduce_colors: bool,
    pub max_colors: u16,
    /// 0 = unconstrained
    pub max_w: u32,
    pub max_h: u32,
    pub keep_exif: bool,
    pub convert_all: bool,
    pub conv_big: bool,
    pub force_del: bool,
    pub grayscale: bool,
    pub no_size_comparison: bool,
    pub fast_mode: bool,
    pub output: OutputConfig,
    pub tuning: Tuning,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            quality: None,
            remove_transparency: false,
            bg_color: DEFAULT_BG_COLOR,
            reduce_colors: false,
            max_colors: 256,
            max_w: 0,
            max_h: 0,
            keep_exif: false,
            convert_all: false,
            conv_big: false,
            force_del: false,
            grayscale: false,
            no_size_comparison: false,
            fast_mode: false,
            output: OutputConfig::default(),
            tuning: Tuning::default(),
        }
    }
}

impl OptimizeOptions {
    /// Quality used when the dynamic search does not run.
    pub fn fixed_quality(&self) -> u8 {
        self.quality.unwrap_or(self.tuning.search.default_quality)
    }

    pub fn wants_downsize(&self) -> bool {
        self.max_w > 0 || self.max_h > 0
    }
}

/// One file to optimize. Built once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    src_path: PathBuf,
    options: OptimizeOptions,
}

impl Task {
    pub fn new(src_path: impl Into<PathBuf>, options: OptimizeOptions) -> Self {
        Self {
            src_path: src_path.into(),
            options,
        }
    }

    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    pub fn options(&self) -> &OptimizeOptions {
        &self.options
    }
}

/// Outcome of one task, consumed by the aggregator and the per-file report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub src_path: PathBuf,
    /// Detected source format ("PNG", "JPEG", ...); empty when undecodable.
    pub orig_format: String,
    pub result_format: String,
    pub orig_mode: Option<ColorMode>,
    pub result_mode: Option<ColorMode>,
    pub orig_colors: usize,
    pub final_colors: usize,
    pub orig_size: u64,
    pub final_size: u64,
    pub was_optimized: bool,
    pub was_downsized: bool,
    pub had_exif: bool,
    pub has_exif: bool,
    pub output_config: OutputConfig,
    /// Sibling file written by a PNG→JPEG conversion.
    pub output_path: Option<PathBuf>,
    /// JPEG quality actually used.
    pub quality: Option<u8>,
    /// Per-file fault (encode or file system); the source is untouched.
    pub error: Option<String>,
}

impl TaskResult {
    /// A file that was looked at but not changed.
    pub fn untouched(task: &Task, orig_format: impl Into<String>, orig_mode: Option<ColorMode>, orig_size: u64) -> Self {
        let orig_format = orig_format.into();
        Self {
            src_path: task.src_path().to_path_buf(),
            result_format: orig_format.clone(),
            orig_format,
            orig_mode,
            result_mode: orig_mode,
            orig_colors: 0,
            final_colors: 0,
            orig_size,
            final_size: orig_size,
            was_optimized: false,
            was_downsized: false,
            had_exif: false,
            has_exif: false,
            output_config: task.options().output,
            output_path: None,
            quality: None,
            error: None,
        }
    }

    /// Content that could not be decoded at all.
    pub fn undecodable(task: &Task, orig_size: u64) -> Self {
        Self::untouched(task, "", None, orig_size)
    }

    /// Decodable, but not a format this tool rewrites.
    pub fn unsupported(task: &Task, format: &str, mode: Option<ColorMode>, orig_size: u64) -> Self {
        Self::untouched(task, format, mode, orig_size)
    }

    pub fn with_error(mut self, err: impl std::fmt::Display) -> Self {
        self.error = Some(err.to_string());
        self.was_optimized = false;
        self.final_size = self.orig_size;
        self
    }

    /// Signed: a conversion written without size comparison may grow.
    pub fn bytes_saved(&self) -> i64 {
        self.orig_size as i64 - self.final_size as i64
    }
}

/// Parse `RRGGBB` (an optional leading `#` is accepted).
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], String> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("'{}' is not a hexadecimal RRGGBB color", s));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let t = Tuning::default();
        assert_eq!(t.photo_min_area, 1024 * 768);
        assert_eq!(t.photo_min_unique_colors, 1 << 16);
        assert_eq!(t.photo_min_jpeg_size, 250_000);
        assert_eq!(t.progressive_min_size, 10_000);
        assert_eq!(t.search.default_quality, 80);

        let o = OptimizeOptions::default();
        assert_eq!(o.max_colors, 256);
        assert_eq!(o.bg_color, [255, 255, 255]);
        assert_eq!(o.fixed_quality(), 80);
        assert!(!o.wants_downsize());
    }

    #[test]
    fn test_fixed_quality_prefers_explicit_value() {
        let o = OptimizeOptions {
            quality: Some(65),
            ..Default::default()
        };
        assert_eq!(o.fixed_quality(), 65);
    }

    #[test]
    fn test_task_json_round_trip() {
        let task = Task::new("/tmp/a.png", OptimizeOptions { max_w: 800, ..Default::default() });
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_result_bytes_saved_is_signed() {
        let task = Task::new("x.png", OptimizeOptions::default());
        let mut r = TaskResult::untouched(&task, "PNG", Some(ColorMode::Rgb), 100);
        assert_eq!(r.bytes_saved(), 0);
        r.final_size = 150;
        assert_eq!(r.bytes_saved(), -50);

        let failed = r.with_error("disk full");
        assert_eq!(failed.final_size, 100);
        assert_eq!(failed.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("FF8000"), Ok([255, 128, 0]));
        assert_eq!(parse_hex_color("#00ff7f"), Ok([0, 255, 127]));
        assert!(parse_hex_color("FFF").is_err());
        assert!(parse_hex_color("GG0000").is_err());
    }
}
