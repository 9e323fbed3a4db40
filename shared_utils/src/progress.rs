//! Progress Bar Module
//!
//! 统一进度条样式: ████████▓░░░░░░░

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// indicatif 需要 3 个字符: (filled, current, empty)
pub const PROGRESS_CHARS: &str = "█▓░";

pub const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

pub const BATCH_TEMPLATE: &str = "{spinner:.green} {prefix:.cyan.bold} ▕{bar:35.green/black}▏ {percent:>3}% • {pos}/{len} • ⏱️ {elapsed_precise} (ETA: {eta}) • {msg}";

/// Batch progress bar drawn on stderr. Hidden when `quiet` is set.
pub fn create_progress_bar(total: u64, prefix: &str, quiet: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);

    if quiet {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }

    let style = ProgressStyle::default_bar()
        .template(BATCH_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(PROGRESS_CHARS)
        .tick_chars(SPINNER_CHARS);
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid() {
        assert!(ProgressStyle::default_bar().template(BATCH_TEMPLATE).is_ok());
    }

    #[test]
    fn test_quiet_bar_still_counts() {
        let pb = create_progress_bar(10, "Optimizing", true);
        pb.inc(3);
        assert_eq!(pb.position(), 3);
        assert!(pb.is_hidden());
    }
}
