//! Report Module
//!
//! Summary reporting for batch and watch sessions

use crate::batch::BatchResult;
use std::time::Duration;

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Like [`format_bytes`] but keeps the sign (a conversion can grow a file).
pub fn format_signed_bytes(bytes: i64) -> String {
    if bytes < 0 {
        format!("-{}", format_bytes(bytes.unsigned_abs()))
    } else {
        format_bytes(bytes as u64)
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Build the final summary. `elapsed` is `None` for watch sessions, which
/// have no meaningful throughput.
pub fn render_summary_report(result: &BatchResult, elapsed: Option<Duration>) -> String {
    let mut lines = Vec::new();
    let rule = "─".repeat(60);

    lines.push(String::new());
    lines.push(rule.clone());
    match elapsed {
        Some(duration) => {
            let secs = duration.as_secs_f64();
            let fps = if secs > 0.0 {
                result.total as f64 / secs
            } else {
                0.0
            };
            lines.push(format!(
                "   📁 Processed {} files ({}) in {} ({:.1} f/s).",
                result.total,
                format_bytes(result.input_bytes),
                format_duration(duration),
                fps
            ));
        }
        None => lines.push(format!(
            "   📁 Processed {} files ({}).",
            result.total,
            format_bytes(result.input_bytes)
        )),
    }
    lines.push(format!("   ✅ Optimized {} files.", result.succeeded));
    if result.failed > 0 {
        lines.push(format!("   ❌ Failed {} files.", result.failed));
    }
    lines.push(format!(
        "   📉 Average savings: {} per optimized file",
        format_signed_bytes(result.average_saving() as i64)
    ));
    lines.push(format!(
        "   💾 Total space saved: {} / {:.1}%",
        format_signed_bytes(result.bytes_saved),
        result.saved_percent()
    ));
    lines.push(rule);

    lines.join("\n")
}

pub fn print_summary_report(result: &BatchResult, elapsed: Option<Duration>) {
    println!("{}", render_summary_report(result, elapsed));

    if !result.errors.is_empty() {
        println!();
        println!("❌ Errors encountered:");
        for (path, error) in &result.errors {
            println!("   {} → {}", path.display(), error);
        }
    }
}
