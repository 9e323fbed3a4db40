use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};

use img_optimize::batch::optimize_batch;
use img_optimize::config::{parse_hex_color, OptimizeOptions, OutputConfig, TaskResult};
use img_optimize::pool::{probe, run_worker_protocol, PoolStrategy};
use img_optimize::report::{render_file_status, render_overall_progress, DEFAULT_LINE_WIDTH};
use img_optimize::watch::watch_directory;
use shared_utils::cancel::{ignore_interrupts, install_interrupt_handler};
use shared_utils::logging::{init_logging, LogConfig};
use shared_utils::progress::create_progress_bar;
use shared_utils::{print_summary_report, CancelToken};

#[derive(Parser)]
#[command(name = "optimize-images")]
#[command(version, about = "Reduce the file size of PNG and JPEG images without visible quality loss", long_about = None)]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a single file or every image under a directory
    Run {
        /// Image file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Only the top level of the directory
        #[arg(long)]
        no_recursion: bool,

        /// Number of workers (default: depends on the pool strategy)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Worker pool strategy
        #[arg(long, value_enum, default_value = "auto")]
        pool: PoolChoice,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        opts: OptionArgs,
    },

    /// Optimize images as they are created under a directory (Ctrl-C to stop)
    Watch {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[command(flatten)]
        opts: OptionArgs,
    },

    /// Process-pool child: one task as JSON on stdin, result on stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PoolChoice {
    /// Processes when available, threads otherwise
    Auto,
    Process,
    Thread,
}

#[derive(Args, Debug, Clone)]
struct OptionArgs {
    /// Fixed JPEG quality (fast mode and PNG→JPEG conversion only)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Flatten transparency against the background color
    #[arg(long)]
    remove_transparency: bool,

    /// Background color as three 0-255 values
    #[arg(long, num_args = 3, value_names = ["R", "G", "B"], conflicts_with = "hbg")]
    bg: Option<Vec<u8>>,

    /// Background color as hexadecimal RRGGBB
    #[arg(long, value_parser = parse_hex_color)]
    hbg: Option<[u8; 3]>,

    /// Quantize PNGs to an adaptive palette
    #[arg(long)]
    reduce_colors: bool,

    /// Palette size cap for --reduce-colors
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u16).range(2..=256))]
    max_colors: u16,

    /// Maximum width (0 = unconstrained)
    #[arg(long = "mw", default_value_t = 0)]
    max_w: u32,

    /// Maximum height (0 = unconstrained)
    #[arg(long = "mh", default_value_t = 0)]
    max_h: u32,

    /// Copy the EXIF block onto re-encoded JPEGs
    #[arg(long)]
    keep_exif: bool,

    /// Convert every PNG to JPEG
    #[arg(long)]
    convert_all: bool,

    /// Convert PNGs that look like photos to JPEG
    #[arg(long)]
    convert_big: bool,

    /// Delete the PNG after a successful conversion. With
    /// --no-size-comparison this happens even if the JPEG is larger.
    #[arg(long)]
    force_delete: bool,

    /// Convert to grayscale
    #[arg(long)]
    grayscale: bool,

    /// Keep the new encoding even if it is not smaller
    #[arg(long)]
    no_size_comparison: bool,

    /// Skip the quality search and palette rebuild
    #[arg(long)]
    fast_mode: bool,

    /// No per-file output
    #[arg(long)]
    quiet: bool,

    /// One progress line instead of per-file output
    #[arg(long)]
    overall_progress: bool,
}

impl OptionArgs {
    fn to_options(&self) -> OptimizeOptions {
        let defaults = OptimizeOptions::default();
        let bg_color = match (&self.bg, self.hbg) {
            (Some(rgb), _) if rgb.len() == 3 => [rgb[0], rgb[1], rgb[2]],
            (_, Some(hex)) => hex,
            _ => defaults.bg_color,
        };

        OptimizeOptions {
            quality: self.quality,
            remove_transparency: self.remove_transparency,
            bg_color,
            reduce_colors: self.reduce_colors,
            max_colors: self.max_colors,
            max_w: self.max_w,
            max_h: self.max_h,
            keep_exif: self.keep_exif,
            convert_all: self.convert_all,
            conv_big: self.convert_big,
            force_del: self.force_delete,
            grayscale: self.grayscale,
            no_size_comparison: self.no_size_comparison,
            fast_mode: self.fast_mode,
            output: OutputConfig {
                quiet: self.quiet,
                show_overall_progress: self.overall_progress,
            },
            ..defaults
        }
    }
}

fn line_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .unwrap_or(DEFAULT_LINE_WIDTH)
}

fn print_file_status(result: &TaskResult, width: usize) {
    if result.output_config.quiet || result.output_config.show_overall_progress {
        return;
    }
    println!("{}", render_file_status(result, width));
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let is_worker = matches!(cli.command, Commands::Worker);
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_logging(
        "img_optimize",
        LogConfig::default().with_level(level).with_file_output(!is_worker),
    )?;

    match cli.command {
        Commands::Worker => {
            // parent owns cancellation; an in-flight commit always completes
            ignore_interrupts().context("Failed to ignore Ctrl-C in worker")?;
            run_worker_protocol(io::stdin().lock(), io::stdout().lock()).context("worker protocol failed")?;
        }

        Commands::Run {
            path,
            no_recursion,
            jobs,
            pool,
            json,
            opts,
        } => {
            let options = opts.to_options();
            let cancel = CancelToken::new();
            install_interrupt_handler(&cancel).context("Failed to install Ctrl-C handler")?;

            let preferred = match pool {
                PoolChoice::Auto => None,
                PoolChoice::Process => Some(PoolStrategy::Process),
                PoolChoice::Thread => Some(PoolStrategy::Thread),
            };
            let pool = probe(preferred, jobs);

            let width = line_width();
            let start = Instant::now();
            let bar = options
                .output
                .show_overall_progress
                .then(|| create_progress_bar(0, "Optimizing", options.output.quiet || json));

            let summary = optimize_batch(
                &path,
                !no_recursion,
                &options,
                pool.as_ref(),
                &cancel,
                &mut |result, running| match &bar {
                    Some(pb) => {
                        pb.set_length(running.found as u64);
                        pb.inc(1);
                        pb.set_message(render_overall_progress(running, start.elapsed()));
                    }
                    None if !json => print_file_status(result, width),
                    None => {}
                },
            )
            .with_context(|| format!("Cannot optimize {}", path.display()))?;

            if let Some(pb) = bar {
                pb.finish_with_message(render_overall_progress(&summary, summary.elapsed));
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary_report(&summary.counts, Some(summary.elapsed));
                if summary.interrupted {
                    println!("   ⚠️  Interrupted: {} files were not processed.", summary.abandoned);
                }
            }

            if let Some(failure) = summary.pool_failure {
                bail!(failure);
            }
        }

        Commands::Watch { dir, opts } => {
            let options = opts.to_options();
            let cancel = CancelToken::new();
            install_interrupt_handler(&cancel).context("Failed to install Ctrl-C handler")?;

            let width = line_width();
            let summary = watch_directory(&dir, options, &cancel, &mut |result| print_file_status(result, width))
                .with_context(|| format!("Cannot watch {}", dir.display()))?;

            info!(processed = summary.counts.total, "Watch session ended");
            if summary.is_empty() {
                println!("No files were processed.");
            } else {
                print_summary_report(&summary.counts, None);
            }
        }
    }

    Ok(())
}
