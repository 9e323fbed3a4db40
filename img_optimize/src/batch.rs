//! Batch orchestration: discover, dispatch through a [`WorkerPool`], tally.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use shared_utils::{collect_files, is_in_flight_path, BatchResult, CancelToken, IMAGE_EXTENSIONS};

use crate::config::{OptimizeOptions, Task, TaskResult};
use crate::error::{OptimizeError, Result};
use crate::pool::{PoolEvent, PoolFailure, WorkerPool};
use crate::strategy::optimize_single_image;

/// Totals of one batch, possibly partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub counts: BatchResult,
    /// Files discovered (the number of tasks submitted).
    pub found: usize,
    pub elapsed: Duration,
    /// Stopped early by the user.
    pub interrupted: bool,
    /// Tasks never run or whose worker was lost.
    pub abandoned: usize,
    pub pool_failure: Option<PoolFailure>,
}

impl BatchSummary {
    pub fn optimized(&self) -> usize {
        self.counts.succeeded
    }

    pub fn processed(&self) -> usize {
        self.counts.total
    }

    /// Share of discovered files already accounted for, 0..=100.
    pub fn percent_done(&self) -> f64 {
        if self.found == 0 {
            return 100.0;
        }
        (self.counts.total + self.abandoned) as f64 * 100.0 / self.found as f64
    }

    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.pool_failure.is_none() && self.abandoned == 0
    }
}

/// Fold one result into the running totals. Order of calls does not matter.
pub fn record(counts: &mut BatchResult, result: &TaskResult) {
    if let Some(err) = &result.error {
        counts.fail(result.src_path.clone(), err.clone(), result.orig_size);
    } else if result.was_optimized {
        counts.success(result.orig_size, result.bytes_saved());
    } else {
        counts.skip(result.orig_size);
    }
}

/// Candidate files under `src`, or `src` itself when it is a file.
pub fn discover(src: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if src.is_dir() {
        let files = collect_files(src, IMAGE_EXTENSIONS, recursive);
        if files.is_empty() {
            return Err(OptimizeError::NoImagesFound(src.to_path_buf()));
        }
        Ok(files)
    } else if src.is_file() && !is_in_flight_path(src) {
        Ok(vec![src.to_path_buf()])
    } else {
        Err(OptimizeError::InvalidPath(src.to_path_buf()))
    }
}

/// Optimize a directory (through `pool`) or a single file (inline).
///
/// `on_result` sees every finished file together with the running summary.
/// A pool failure or a cancellation still returns `Ok` with a partial
/// summary; only discovery errors are `Err`.
pub fn optimize_batch(
    src: &Path,
    recursive: bool,
    options: &OptimizeOptions,
    pool: &dyn WorkerPool,
    cancel: &CancelToken,
    on_result: &mut dyn FnMut(&TaskResult, &BatchSummary),
) -> Result<BatchSummary> {
    let start = Instant::now();
    let files = discover(src, recursive)?;

    let mut summary = BatchSummary {
        found: files.len(),
        ..BatchSummary::default()
    };

    if src.is_file() {
        let result = optimize_single_image(&Task::new(src, *options));
        record(&mut summary.counts, &result);
        summary.elapsed = start.elapsed();
        on_result(&result, &summary);
        return Ok(summary);
    }

    info!(
        dir = %src.display(),
        files = files.len(),
        strategy = %pool.strategy(),
        workers = pool.workers(),
        "Starting batch"
    );

    let tasks: Vec<Task> = files.into_iter().map(|p| Task::new(p, *options)).collect();
    let outcome = pool.run(tasks, cancel, &mut |event| match event {
        PoolEvent::Started(_) => {}
        PoolEvent::Finished(result) => {
            record(&mut summary.counts, &result);
            summary.elapsed = start.elapsed();
            on_result(result.as_ref(), &summary);
        }
        PoolEvent::Abandoned(path) => {
            summary.abandoned += 1;
            debug!(path = %path.display(), "Abandoned");
        }
    });

    if let Err(failure) = outcome {
        error!(error = %failure, "Batch aborted");
        summary.pool_failure = Some(failure);
    }
    summary.interrupted = cancel.is_cancelled();
    summary.elapsed = start.elapsed();

    if summary.interrupted {
        warn!(
            processed = summary.processed(),
            abandoned = summary.abandoned,
            "Batch interrupted, summary is partial"
        );
    }
    Ok(summary)
}
