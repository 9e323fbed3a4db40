//! Worker pools
//!
//! One [`WorkerPool`] trait, two strategies picked once at startup by [`probe`]:
//! - `ProcessPool`: each task runs in a child `optimize-images worker` process
//!   (crash isolation, no shared allocator). Task in as JSON on stdin, result
//!   out as JSON on stdout.
//! - `ThreadPool`: tasks run on a rayon pool inside this process.
//!
//! Both feed the same dispatcher, which streams [`PoolEvent`]s back to the
//! caller in completion order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use shared_utils::thread_manager::{build_pool, inner_thread_count, process_worker_count, thread_worker_count};
use shared_utils::CancelToken;

use crate::config::{Task, TaskResult};
use crate::strategy::optimize_single_image;

/// Subcommand the process pool starts its children with.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// The pool itself broke. Remaining dispatch is aborted.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Worker pool failed{}: {reason}", in_flight_suffix(.last_file))]
pub struct PoolFailure {
    /// File the failing worker was processing, when known.
    pub last_file: Option<PathBuf>,
    pub reason: String,
}

fn in_flight_suffix(last_file: &Option<PathBuf>) -> String {
    match last_file {
        Some(p) => format!(" while processing {}", p.display()),
        None => String::new(),
    }
}

impl PoolFailure {
    pub fn new(last_file: Option<&Path>, reason: impl Into<String>) -> Self {
        Self {
            last_file: last_file.map(Path::to_path_buf),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStrategy {
    Process,
    Thread,
}

impl fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolStrategy::Process => f.write_str("process"),
            PoolStrategy::Thread => f.write_str("thread"),
        }
    }
}

/// Progress of one task as seen by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    Started(PathBuf),
    Finished(Box<TaskResult>),
    /// Never run (cancelled or aborted), or its worker was lost after a cancel.
    Abandoned(PathBuf),
}

pub trait WorkerPool: Send + Sync {
    fn strategy(&self) -> PoolStrategy;

    fn workers(&self) -> usize;

    /// Run every task, calling `sink` on this thread as events arrive.
    ///
    /// Returns once all tasks finished or were abandoned. A pool failure stops
    /// dispatch of the remaining tasks and is returned after in-flight work
    /// has drained.
    fn run(
        &self,
        tasks: Vec<Task>,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(PoolEvent),
    ) -> Result<(), PoolFailure>;
}

/// Why a single task produced no result.
#[derive(Debug)]
enum ExecError {
    Abandoned,
    Fatal(String),
}

enum Message {
    Started(PathBuf),
    Finished(TaskResult),
    Abandoned(PathBuf),
    Failed { path: PathBuf, reason: String },
}

/// Run `exec` for each task on `workers` rayon threads and forward events.
fn dispatch<F>(
    workers: usize,
    tasks: Vec<Task>,
    cancel: &CancelToken,
    sink: &mut dyn FnMut(PoolEvent),
    exec: F,
) -> Result<(), PoolFailure>
where
    F: Fn(&Task) -> Result<TaskResult, ExecError> + Sync,
{
    let pool = build_pool(workers).map_err(|e| PoolFailure::new(None, e.to_string()))?;
    let failed = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<Message>();

    std::thread::scope(|scope| {
        let failed = &failed;
        let exec = &exec;

        let producer = scope.spawn(move || {
            pool.install(|| {
                tasks.par_iter().for_each_with(tx, |tx, task| {
                    let path = task.src_path().to_path_buf();
                    if cancel.is_cancelled() || failed.load(Ordering::SeqCst) {
                        let _ = tx.send(Message::Abandoned(path));
                        return;
                    }

                    let _ = tx.send(Message::Started(path.clone()));
                    let msg = match exec(task) {
                        Ok(result) => Message::Finished(result),
                        Err(ExecError::Abandoned) => Message::Abandoned(path),
                        Err(ExecError::Fatal(reason)) => {
                            failed.store(true, Ordering::SeqCst);
                            Message::Failed { path, reason }
                        }
                    };
                    let _ = tx.send(msg);
                });
            });
        });

        let mut failure: Option<PoolFailure> = None;
        let mut last_started: Option<PathBuf> = None;

        for msg in rx {
            match msg {
                Message::Started(path) => {
                    last_started = Some(path.clone());
                    sink(PoolEvent::Started(path));
                }
                Message::Finished(result) => sink(PoolEvent::Finished(Box::new(result))),
                Message::Abandoned(path) => sink(PoolEvent::Abandoned(path)),
                Message::Failed { path, reason } => {
                    error!(path = %path.display(), reason = %reason, "💥 Worker failed");
                    if failure.is_none() {
                        failure = Some(PoolFailure::new(Some(&path), reason));
                    }
                }
            }
        }

        if producer.join().is_err() && failure.is_none() {
            failure = Some(PoolFailure::new(last_started.as_deref(), "dispatcher thread panicked"));
        }

        match failure {
            Some(f) => Err(f),
            None => Ok(()),
        }
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}

// ============================================================================
// Thread strategy
// ============================================================================

/// Tasks run on rayon threads of this process.
pub struct ThreadPool {
    workers: usize,
}

impl ThreadPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    fn execute(task: &Task) -> Result<TaskResult, ExecError> {
        catch_unwind(AssertUnwindSafe(|| optimize_single_image(task)))
            .map_err(|p| ExecError::Fatal(panic_message(p)))
    }
}

impl WorkerPool for ThreadPool {
    fn strategy(&self) -> PoolStrategy {
        PoolStrategy::Thread
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn run(
        &self,
        tasks: Vec<Task>,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(PoolEvent),
    ) -> Result<(), PoolFailure> {
        dispatch(self.workers, tasks, cancel, sink, Self::execute)
    }
}

// ============================================================================
// Process strategy
// ============================================================================

/// One child process per task, `workers` children at a time.
pub struct ProcessPool {
    exe: PathBuf,
    workers: usize,
}

impl ProcessPool {
    pub fn new(exe: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            exe: exe.into(),
            workers: workers.max(1),
        }
    }

    fn execute(&self, task: &Task, cancel: &CancelToken) -> Result<TaskResult, ExecError> {
        let mut child = Command::new(&self.exe)
            .arg(WORKER_SUBCOMMAND)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ExecError::Fatal(format!("cannot start worker {}: {}", self.exe.display(), e)))?;

        // Dropping stdin closes the pipe so the child sees EOF
        if let Some(mut stdin) = child.stdin.take() {
            let sent = serde_json::to_vec(task)
                .map_err(std::io::Error::from)
                .and_then(|json| stdin.write_all(&json));
            if let Err(e) = sent {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::Fatal(format!("cannot send task to worker: {}", e)));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExecError::Fatal(format!("lost worker process: {}", e)))?;

        if !output.status.success() {
            if cancel.is_cancelled() {
                return Err(ExecError::Abandoned);
            }
            return Err(ExecError::Fatal(format!("worker exited with {}", output.status)));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            if cancel.is_cancelled() {
                ExecError::Abandoned
            } else {
                ExecError::Fatal(format!("unreadable worker reply: {}", e))
            }
        })
    }
}

impl WorkerPool for ProcessPool {
    fn strategy(&self) -> PoolStrategy {
        PoolStrategy::Process
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn run(
        &self,
        tasks: Vec<Task>,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(PoolEvent),
    ) -> Result<(), PoolFailure> {
        dispatch(self.workers, tasks, cancel, sink, |task| self.execute(task, cancel))
    }
}

/// Child side of the process protocol: one task in, one result out.
pub fn run_worker_protocol<R: Read, W: Write>(input: R, mut output: W) -> std::io::Result<()> {
    let task: Task = serde_json::from_reader(input)?;
    debug!(path = %task.src_path().display(), "Worker received task");
    let result = match build_pool(inner_thread_count()) {
        Ok(pool) => pool.install(|| optimize_single_image(&task)),
        Err(e) => {
            warn!(error = %e, "Cannot build worker thread pool, using the global one");
            optimize_single_image(&task)
        }
    };
    serde_json::to_writer(&mut output, &result)?;
    output.flush()
}

/// Choose the pool strategy and size once.
///
/// Processes are preferred; if this executable cannot be located (and so
/// cannot be re-spawned as a worker) threads are used instead. `jobs`
/// overrides the worker count of either strategy.
pub fn probe(preferred: Option<PoolStrategy>, jobs: Option<usize>) -> Box<dyn WorkerPool> {
    let jobs = jobs.filter(|&n| n > 0);

    let exe = match preferred {
        Some(PoolStrategy::Thread) => None,
        _ => match std::env::current_exe() {
            Ok(exe) if exe.is_file() => Some(exe),
            Ok(exe) => {
                warn!(exe = %exe.display(), "Executable not found on disk, using threads");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cannot locate executable, using threads");
                None
            }
        },
    };

    let pool: Box<dyn WorkerPool> = match exe {
        Some(exe) => Box::new(ProcessPool::new(exe, jobs.unwrap_or_else(process_worker_count))),
        None => Box::new(ThreadPool::new(jobs.unwrap_or_else(thread_worker_count))),
    };
    info!(strategy = %pool.strategy(), workers = pool.workers(), "Worker pool ready");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizeOptions;
    use std::fs;
    use tempfile::TempDir;

    fn garbage_tasks(dir: &Path, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                let p = dir.join(format!("junk_{i}.png"));
                fs::write(&p, vec![b'x'; 10 + i]).unwrap();
                Task::new(p, OptimizeOptions::default())
            })
            .collect()
    }

    fn collect(pool: &dyn WorkerPool, tasks: Vec<Task>, cancel: &CancelToken) -> (Vec<PoolEvent>, Result<(), PoolFailure>) {
        let mut events = Vec::new();
        let outcome = pool.run(tasks, cancel, &mut |e| events.push(e));
        (events, outcome)
    }

    #[test]
    fn test_thread_pool_returns_every_result() {
        let dir = TempDir::new().unwrap();
        let tasks = garbage_tasks(dir.path(), 12);
        let (events, outcome) = collect(&ThreadPool::new(4), tasks, &CancelToken::new());
        outcome.unwrap();

        let mut sizes: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                PoolEvent::Finished(r) => Some(r.orig_size),
                _ => None,
            })
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, (10..22).collect::<Vec<u64>>());
    }

    #[test]
    fn test_cancelled_before_start_abandons_all() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let (events, outcome) = collect(&ThreadPool::new(2), garbage_tasks(dir.path(), 5), &cancel);
        outcome.unwrap();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| matches!(e, PoolEvent::Abandoned(_))));
    }

    #[test]
    fn test_fatal_worker_names_file() {
        let dir = TempDir::new().unwrap();
        let tasks = garbage_tasks(dir.path(), 1);
        let expected = tasks[0].src_path().to_path_buf();

        let mut sink = |_e: PoolEvent| {};
        let failure = dispatch(1, tasks, &CancelToken::new(), &mut sink, |task| {
            catch_unwind(AssertUnwindSafe(|| -> TaskResult {
                panic!("decoder blew up on {}", task.src_path().display())
            }))
            .map_err(|p| ExecError::Fatal(panic_message(p)))
        })
        .unwrap_err();

        assert_eq!(failure.last_file.as_deref(), Some(expected.as_path()));
        assert!(failure.reason.contains("decoder blew up"));
        assert!(failure.to_string().contains("junk_0.png"));
    }

    #[test]
    fn test_failure_stops_remaining_dispatch() {
        let dir = TempDir::new().unwrap();
        let mut events = Vec::new();
        let failure = dispatch(1, garbage_tasks(dir.path(), 6), &CancelToken::new(), &mut |e| events.push(e), |_| {
            Err(ExecError::Fatal("boom".to_string()))
        })
        .unwrap_err();

        assert_eq!(failure.reason, "boom");
        let finished = events.iter().filter(|e| matches!(e, PoolEvent::Finished(_))).count();
        assert_eq!(finished, 0);
        assert!(events.iter().any(|e| matches!(e, PoolEvent::Abandoned(_))));
    }

    #[test]
    fn test_missing_worker_executable_is_pool_failure() {
        let dir = TempDir::new().unwrap();
        let pool = ProcessPool::new(dir.path().join("no-such-binary"), 2);
        let (_, outcome) = collect(&pool, garbage_tasks(dir.path(), 3), &CancelToken::new());
        let failure = outcome.unwrap_err();
        assert!(failure.last_file.is_some());
        assert!(failure.reason.contains("cannot start worker"));
    }

    #[test]
    fn test_worker_protocol_in_process() {
        let dir = TempDir::new().unwrap();
        let task = garbage_tasks(dir.path(), 1).remove(0);
        let input = serde_json::to_vec(&task).unwrap();
        let mut output = Vec::new();

        run_worker_protocol(input.as_slice(), &mut output).unwrap();
        let result: TaskResult = serde_json::from_slice(&output).unwrap();
        assert_eq!(result.src_path, task.src_path());
        assert!(!result.was_optimized);
    }

    #[test]
    fn test_probe_honours_thread_request() {
        let pool = probe(Some(PoolStrategy::Thread), Some(3));
        assert_eq!(pool.strategy(), PoolStrategy::Thread);
        assert_eq!(pool.workers(), 3);
    }
}
