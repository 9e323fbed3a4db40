//! Batch Processing Module
//!
//! File discovery and order-insensitive result tallying for batch runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the optimizer picks up during discovery. Content is probed
/// later, so a mislabelled file still ends up on the right path.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Marker carried by the names of files that are still being written.
pub const IN_FLIGHT_MARKER: &str = "~temp~";

pub fn is_in_flight_path(path: &Path) -> bool {
    path.to_string_lossy().contains(IN_FLIGHT_MARKER)
}

/// Walk `dir` and return every regular file with one of `extensions`.
///
/// In-flight temp files are never returned. Output is sorted by file name
/// within each directory so repeated runs dispatch in the same order.
pub fn collect_files(dir: &Path, extensions: &[&str], recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir).follow_links(true)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    walker
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| crate::common_utils::has_extension(e.path(), extensions))
        .filter(|e| !is_in_flight_path(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Running totals for a batch. Every update is a plain sum so results may
/// arrive in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub input_bytes: u64,
    pub bytes_saved: i64,
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, input_bytes: u64, bytes_saved: i64) {
        self.total += 1;
        self.succeeded += 1;
        self.input_bytes += input_bytes;
        self.bytes_saved += bytes_saved;
    }

    pub fn fail(&mut self, path: PathBuf, error: String, input_bytes: u64) {
        self.total += 1;
        self.failed += 1;
        self.input_bytes += input_bytes;
        self.errors.push((path, error));
    }

    pub fn skip(&mut self, input_bytes: u64) {
        self.total += 1;
        self.skipped += 1;
        self.input_bytes += input_bytes;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }

    /// Mean saving per succeeded file, 0 when nothing succeeded.
    pub fn average_saving(&self) -> f64 {
        if self.succeeded == 0 {
            0.0
        } else {
            self.bytes_saved as f64 / self.succeeded as f64
        }
    }

    pub fn saved_percent(&self) -> f64 {
        if self.input_bytes == 0 {
            0.0
        } else {
            self.bytes_saved as f64 / self.input_bytes as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_collect_files_filters_extensions_and_marker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("a.png"));
        touch(&root.join("b.JPG"));
        touch(&root.join("c.jpeg"));
        touch(&root.join("notes.txt"));
        touch(&root.join("d~temp~123.png"));
        touch(&root.join("sub/e.png"));

        let flat = collect_files(root, IMAGE_EXTENSIONS, false);
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "c.jpeg"]);

        let deep = collect_files(root, IMAGE_EXTENSIONS, true);
        assert_eq!(deep.len(), 4);
        assert!(deep.iter().any(|p| p.ends_with("sub/e.png")));
        assert!(!deep.iter().any(|p| is_in_flight_path(p)));
    }

    #[test]
    fn test_collect_files_skips_directories_named_like_images() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("folder.png")).unwrap();
        assert!(collect_files(temp.path(), IMAGE_EXTENSIONS, true).is_empty());
    }

    #[test]
    fn test_batch_result_mixed() {
        let mut result = BatchResult::new();
        result.success(1000, 400);
        result.success(500, 100);
        result.fail(PathBuf::from("bad.png"), "Error".to_string(), 10);
        result.skip(90);

        assert_eq!(result.total, 4);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.input_bytes, 1600);
        assert_eq!(result.bytes_saved, 500);
        assert_eq!(
            result.total,
            result.succeeded + result.failed + result.skipped,
            "STRICT: total must equal succeeded + failed + skipped"
        );
        assert!((result.average_saving() - 250.0).abs() < 0.001);
        assert!((result.saved_percent() - 31.25).abs() < 0.001);
    }

    #[test]
    fn test_success_rate_empty() {
        let result = BatchResult::new();
        assert!((result.success_rate() - 100.0).abs() < 0.01);
        assert_eq!(result.average_saving(), 0.0);
        assert_eq!(result.saved_percent(), 0.0);
    }

    #[test]
    fn test_order_insensitive() {
        let ops: Vec<(u64, i64)> = vec![(100, 10), (200, 0), (300, -5), (400, 40)];

        let mut forward = BatchResult::new();
        for (input, saved) in &ops {
            forward.success(*input, *saved);
        }
        let mut backward = BatchResult::new();
        for (input, saved) in ops.iter().rev() {
            backward.success(*input, *saved);
        }
        assert_eq!(forward, backward);
    }
}
