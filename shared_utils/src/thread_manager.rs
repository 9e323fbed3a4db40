//! Thread Manager
//!
//! Worker-count defaults and rayon pool construction:
//! - process workers: one per core plus one, so a worker blocked on disk
//!   never leaves a core idle
//! - thread workers: balanced so the machine stays responsive
//! - `SHARED_UTILS_WORKERS` overrides both when set

use std::sync::OnceLock;

/// Cached balanced allocation for this system
static BALANCED: OnceLock<ThreadAllocation> = OnceLock::new();

/// Thread allocation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAllocation {
    /// Number of files processed at once
    pub parallel_tasks: usize,
    /// Threads each task may use internally (quantizer, pixel scans)
    pub inner_threads: usize,
}

/// Split the cores between concurrent files and per-file parallelism.
///
/// Formula: parallel_tasks * inner_threads <= available_cores
pub fn get_balanced_thread_config() -> ThreadAllocation {
    *BALANCED.get_or_init(|| balanced_for(num_cpus::get()))
}

fn balanced_for(total_cores: usize) -> ThreadAllocation {
    // Reserve 20% of cores, minimum 1, maximum 2
    let reserved = ((total_cores as f64 * 0.2).ceil() as usize).clamp(1, 2);
    let available_cores = total_cores.saturating_sub(reserved).max(1);

    let inner_threads = 2;
    let parallel_tasks = (available_cores / inner_threads).clamp(1, 8);

    ThreadAllocation {
        parallel_tasks,
        inner_threads,
    }
}

/// Default worker count when each worker is a separate process.
pub fn process_worker_count() -> usize {
    env_override().unwrap_or_else(|| num_cpus::get() + 1)
}

/// Default worker count when workers share this process.
pub fn thread_worker_count() -> usize {
    env_override().unwrap_or_else(|| get_balanced_thread_config().parallel_tasks)
}

/// Rayon threads one worker process gives to a single file. Process workers
/// already cover every core, so each keeps its own pixel work narrow.
pub fn inner_thread_count() -> usize {
    get_balanced_thread_config().inner_threads
}

fn env_override() -> Option<usize> {
    std::env::var("SHARED_UTILS_WORKERS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

/// Build a rayon pool, falling back to two threads if the requested size
/// cannot be created.
pub fn build_pool(threads: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("optimize-worker-{}", i))
        .build()
        .or_else(|_| rayon::ThreadPoolBuilder::new().num_threads(2).build())
}
