//! Watch Service
//!
//! Subscribes to create events under a directory and runs the single-file
//! pipeline on each new image once its size has settled.
//!
//! ```text
//! Idle ─▶ Watching ─(create)─▶ Debounce ─(size stable)─▶ Dispatch ─▶ Watching
//!             │                    └─(file vanished)──────────────────▶ Watching
//!             └─(cancel)─▶ Stopped
//! ```
//!
//! The notify callback only forwards events over a channel; all state lives
//! on the consuming thread.

use notify::{EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use shared_utils::common_utils::has_extension;
use shared_utils::{is_in_flight_path, BatchResult, CancelToken, IMAGE_EXTENSIONS};

use crate::batch::record;
use crate::config::{OptimizeOptions, Task, TaskResult};
use crate::error::{OptimizeError, Result};
use crate::strategy::optimize_single_image;

/// Size poll interval while a file is still being written.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(10);

/// How often the event loop wakes up to check for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Debounce,
    Dispatch,
    Stopped,
}

/// Block until two consecutive size reads agree. `false` if the file is gone.
pub fn wait_for_write_finish(path: &Path, interval: Duration) -> bool {
    let mut last = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };
    loop {
        thread::sleep(interval);
        let current = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };
        if current == last {
            return true;
        }
        last = current;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchSummary {
    pub counts: BatchResult,
}

impl WatchSummary {
    pub fn is_empty(&self) -> bool {
        self.counts.total == 0
    }
}

/// Per-session state: options, visited paths, running totals.
pub struct WatchSession {
    options: OptimizeOptions,
    visited: HashSet<PathBuf>,
    counts: BatchResult,
    state: WatchState,
    debounce: Duration,
}

impl WatchSession {
    pub fn new(options: OptimizeOptions) -> Self {
        Self {
            options,
            visited: HashSet::new(),
            counts: BatchResult::new(),
            state: WatchState::Idle,
            debounce: DEBOUNCE_INTERVAL,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Watch state");
            self.state = next;
        }
    }

    /// Handle one creation event. Returns the result if the path was
    /// dispatched, `None` if it was ignored or already seen.
    pub fn handle_created(&mut self, path: &Path) -> Option<TaskResult> {
        if is_in_flight_path(path) || !path.is_file() {
            return None;
        }
        // a path is claimed on first sight, image or not
        if !self.visited.insert(path.to_path_buf()) {
            debug!(path = %path.display(), "Already seen, ignoring");
            return None;
        }
        if !has_extension(path, IMAGE_EXTENSIONS) {
            return None;
        }

        self.transition(WatchState::Debounce);
        if !wait_for_write_finish(path, self.debounce) {
            warn!(path = %path.display(), "File vanished before it settled");
            self.transition(WatchState::Watching);
            return None;
        }

        self.transition(WatchState::Dispatch);
        let result = optimize_single_image(&Task::new(path, self.options));
        record(&mut self.counts, &result);
        self.transition(WatchState::Watching);
        Some(result)
    }

    pub fn summary(&self) -> WatchSummary {
        WatchSummary {
            counts: self.counts.clone(),
        }
    }
}

/// Watch `dir` recursively until `cancel` fires, then return the session totals.
pub fn watch_directory(
    dir: &Path,
    options: OptimizeOptions,
    cancel: &CancelToken,
    on_result: &mut dyn FnMut(&TaskResult),
) -> Result<WatchSummary> {
    if !dir.is_dir() {
        return Err(OptimizeError::InvalidPath(dir.to_path_buf()));
    }

    let mut session = WatchSession::new(options);
    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(tx).map_err(|e| OptimizeError::Watch(e.to_string()))?;
    watcher
        .watch(dir, RecursiveMode::Recursive)
        .map_err(|e| OptimizeError::Watch(e.to_string()))?;
    session.transition(WatchState::Watching);
    info!(dir = %dir.display(), "👀 Watching for new images (Ctrl-C to stop)");

    while !cancel.is_cancelled() {
        let event = match rx.recv_timeout(CANCEL_POLL) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                warn!(error = %e, "Watch event error");
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(OptimizeError::Watch("event channel closed".to_string()));
            }
        };

        if !matches!(event.kind, EventKind::Create(_)) {
            continue;
        }
        for path in &event.paths {
            if let Some(result) = session.handle_created(path) {
                on_result(&result);
            }
        }
    }

    drop(watcher);
    session.transition(WatchState::Stopped);
    Ok(session.summary())
}
