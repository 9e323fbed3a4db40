//! Logging Module - 统一的日志系统
//!
//! tracing-based logging shared by every binary in the workspace:
//! - daily rolling log file in the system temp dir (optional)
//! - coloured stderr output
//! - `RUST_LOG` overrides the configured level
//!
//! stdout is never written to here. The optimizer prints user reports there
//! and its worker processes speak JSON over it.
//!
//! # Examples
//!
//! ```no_run
//! use shared_utils::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! let config = LogConfig::default();
//! init_logging("img_optimize", config).expect("Failed to initialize logging");
//!
//! info!("Program started");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志目录路径（默认为系统临时目录）
    pub log_dir: PathBuf,
    /// 保留的最大日志文件数量，默认5个
    pub max_files: usize,
    /// 日志级别，默认Info
    pub level: Level,
    /// Write the rolling log file. Worker processes turn this off.
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            file_output: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_file_output(mut self, enabled: bool) -> Self {
        self.file_output = enabled;
        self
    }
}

/// 初始化日志系统
///
/// Installs the global subscriber. Log file name: `{program_name}.log.<date>`.
/// May only be called once per process.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    // Other crates only surface warnings unless RUST_LOG says otherwise.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,{}={}", program_name, config.level))
    });

    if !config.file_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(());
    }

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false) // 文件中不使用ANSI颜色代码
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Coloured, compact console output.
fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false)
}

/// Keep the `max_files` newest `{program}.log*` files in `log_dir`.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    let prefix = format!("{}.log", program_name);

    let mut logs: Vec<(PathBuf, SystemTime)> = std::fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file()
                .then(|| meta.modified().ok())
                .flatten()
                .map(|modified| (entry.path(), modified))
        })
        .collect();

    if logs.len() <= max_files {
        return Ok(());
    }

    // newest first
    logs.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in logs.into_iter().skip(max_files) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove stale log file");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.max_files, 5);
        assert_eq!(config.level, Level::INFO);
        assert!(config.file_output);
    }

    #[test]
    fn test_log_config_builder() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_max_files(3)
            .with_level(Level::DEBUG)
            .with_file_output(false);

        assert_eq!(config.log_dir, temp_dir.path());
        assert_eq!(config.max_files, 3);
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.file_output);
    }

    // The only test in this crate that installs the global subscriber
    #[test]
    fn test_init_logging_installs_once() {
        let temp_dir = TempDir::new().unwrap();

        let console_only = LogConfig::new().with_file_output(false);
        init_logging("shared_utils_test", console_only).unwrap();
        tracing::info!("console subscriber installed");

        let with_file = LogConfig::new().with_log_dir(temp_dir.path().join("logs"));
        assert!(init_logging("shared_utils_test", with_file).is_err());
        assert!(temp_dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_cleanup_old_logs() {
        let temp_dir = TempDir::new().unwrap();
        let program_name = "test_program";

        for i in 0..10 {
            let file_path = temp_dir
                .path()
                .join(format!("{}.log.2024-01-{:02}", program_name, i + 1));
            fs::write(&file_path, format!("log content {}", i)).unwrap();
            // 确保文件修改时间不同
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        fs::write(temp_dir.path().join("unrelated.txt"), "keep me").unwrap();

        cleanup_old_logs(temp_dir.path(), program_name, 3).unwrap();

        let remaining: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(program_name))
            .collect();

        assert_eq!(remaining.len(), 3);
        assert!(temp_dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_cleanup_under_limit_keeps_everything() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("prog.log.2024-01-01"), "a").unwrap();
        fs::write(temp_dir.path().join("prog.log.2024-01-02"), "b").unwrap();

        cleanup_old_logs(temp_dir.path(), "prog", 5).unwrap();

        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 2);
    }
}
