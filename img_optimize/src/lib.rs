//! img_optimize: shrink PNG and JPEG files in place without visible loss.
//!
//! - `transform`: downsize, flatten, quantize, grayscale, palette rebuild
//! - `dynamic_quality`: lowest JPEG quality that still looks the same
//! - `strategy`: per-format routines and the PNG photo heuristic
//! - `commit`: accept or reject a candidate, atomic replace
//! - `pool` / `batch`: worker pools and batch orchestration
//! - `watch`: optimize new files as they appear

pub mod batch;
pub mod codec;
pub mod commit;
pub mod config;
pub mod dynamic_quality;
pub mod error;
pub mod palette;
pub mod pool;
pub mod raster;
pub mod report;
pub mod strategy;
pub mod transform;
pub mod watch;


pub use batch::{optimize_batch, BatchSummary};
pub use commit::{commit, CommitOutcome};
pub use config::{parse_hex_color, OptimizeOptions, OutputConfig, Task, TaskResult, Tuning};
pub use dynamic_quality::{jpeg_dynamic_quality, QualitySearch};
pub use error::{OptimizeError, Result};
pub use palette::{Palette, PaletteError};
pub use pool::{probe, run_worker_protocol, PoolFailure, PoolStrategy, WorkerPool};
pub use raster::{ColorMode, IndexedImage, Raster};
pub use report::{render_file_status, render_overall_progress};
pub use strategy::{is_big_png_photo, optimize_single_image};
pub use transform::{do_reduce_colors, downsize, make_grayscale, rebuild_palette, remove_transparency};
pub use watch::{watch_directory, WatchSummary};
