//! Shared Utilities for the optimize-images tools
//!
//! - Logging (tracing, rolling file + stderr)
//! - Batch discovery and result tallying
//! - Worker-count defaults and cancellation
//! - Atomic write / safe delete
//! - Progress bar and summary reporting

pub mod batch;
pub mod cancel;
pub mod checkpoint;
pub mod common_utils;
pub mod logging;
pub mod progress;
pub mod report;
pub mod thread_manager;

pub use batch::{collect_files, is_in_flight_path, BatchResult, IMAGE_EXTENSIONS, IN_FLIGHT_MARKER};
pub use cancel::CancelToken;
pub use checkpoint::{atomic_write, safe_delete_original, verify_output_integrity};
pub use report::{format_bytes, format_signed_bytes, print_summary_report};
