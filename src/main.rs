use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use cross_section_aligner::batch::{
    default_output_root, directory_basename, log_file_name, BatchRunner, OutputLayout, Progress,
    RunHeader, RunLog,
};
use cross_section_aligner::config::{Config, ScaleBounds};
use cross_section_aligner::data::{load_color_image, PairSource};
use cross_section_aligner::logging::{init_logging, new_run_id, LoggingConfig};
use cross_section_aligner::pipeline::{Aligner, ThresholdGrid};
use cross_section_aligner::AlignError;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const PROGRESS_BAR_WIDTH: usize = 20;
const PROGRESS_NAME_WIDTH: usize = 15;

#[derive(Parser)]
#[command(name = "align")]
#[command(about = "Threshold-adaptive alignment of cross-section image pairs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Raise diagnostic verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSON diagnostics to this directory
    #[arg(long, global = true)]
    diagnostics_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Threshold for reference images (0-255)
    #[arg(short = 'x', long)]
    reference_threshold: u8,

    /// Threshold for target images (0-255)
    #[arg(short = 'y', long)]
    target_threshold: u8,

    /// Threshold change step
    #[arg(short = 's', long)]
    threshold_step: Option<u32>,

    /// Maximum threshold change in either direction
    #[arg(short = 'm', long)]
    threshold_max_change: Option<u32>,

    /// Accepted scale factor range as MIN,MAX
    #[arg(short = 'b', long)]
    scale_factor_bounds: Option<ScaleBounds>,

    /// TOML or JSON configuration file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Align every identically named pair of two directories
    Batch {
        /// Directory with reference images
        #[arg(short = 'r', long)]
        reference_directory: PathBuf,

        /// Directory with images to align
        #[arg(short = 't', long)]
        target_directory: PathBuf,

        #[command(flatten)]
        search: SearchArgs,

        /// Output directory (default: ./Alignments/<target basename>_Alignments/)
        #[arg(short = 'o', long)]
        output_directory: Option<PathBuf>,

        /// Directory for the run log (default: current directory)
        #[arg(short = 'l', long)]
        logfile_directory: Option<PathBuf>,

        /// Do not write overlap images
        #[arg(short = 'p', long)]
        suppress_overlap_images: bool,

        /// Pairs processed in parallel
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Overwrite existing outputs without asking
        #[arg(long)]
        yes: bool,
    },

    /// Align a single pair of images
    Pair {
        #[arg(short = 'r', long)]
        reference: PathBuf,

        #[arg(short = 't', long)]
        target: PathBuf,

        #[command(flatten)]
        search: SearchArgs,

        /// Where to write the aligned target
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Where to write the reference/aligned overlay
        #[arg(long)]
        overlay: Option<PathBuf>,
    },

    /// Print the thresholds the search would try for one base threshold
    Grid {
        #[arg(short = 'x', long)]
        threshold: u8,

        #[arg(short = 's', long, default_value = "2")]
        threshold_step: u32,

        #[arg(short = 'm', long, default_value = "20")]
        threshold_max_change: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        log_directory: cli.diagnostics_dir.clone(),
        ..LoggingConfig::from_verbosity(cli.verbose)
    };
    let _guard = init_logging(&logging)?;

    match cli.command {
        Commands::Batch {
            reference_directory,
            target_directory,
            search,
            output_directory,
            logfile_directory,
            suppress_overlap_images,
            jobs,
            yes,
        } => {
            let config = build_config(&search, !suppress_overlap_images, jobs)?;
            handle_batch(
                config,
                &reference_directory,
                &target_directory,
                output_directory.as_deref(),
                logfile_directory.as_deref(),
                yes,
            )
        }
        Commands::Pair {
            reference,
            target,
            search,
            output,
            overlay,
        } => {
            let config = build_config(&search, overlay.is_some(), Some(1))?;
            handle_pair(config, &reference, &target, &output, overlay.as_deref())
        }
        Commands::Grid {
            threshold,
            threshold_step,
            threshold_max_change,
        } => {
            if threshold_step == 0 || threshold_max_change == 0 {
                anyhow::bail!("threshold step and max change must be positive integers");
            }
            let grid = ThresholdGrid::new(threshold, threshold_step, threshold_max_change);
            println!("Offsets: {}", join(grid.offsets()));
            println!("Thresholds: {}", join(&grid.thresholds().collect::<Vec<_>>()));
            Ok(())
        }
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(T::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_config(search: &SearchArgs, overlay: bool, jobs: Option<usize>) -> anyhow::Result<Config> {
    let mut config = match &search.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    config.search.reference_threshold = search.reference_threshold;
    config.search.target_threshold = search.target_threshold;
    if let Some(step) = search.threshold_step {
        config.search.threshold_step = step;
    }
    if let Some(max_change) = search.threshold_max_change {
        config.search.threshold_max_change = max_change;
    }
    if let Some(bounds) = search.scale_factor_bounds {
        config.search.scale_factor_bounds = bounds;
    }
    config.output.overlay = overlay;
    if let Some(jobs) = jobs {
        config.output.jobs = jobs;
    }

    Ok(config.validated()?)
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn handle_batch(
    config: Config,
    reference_directory: &Path,
    target_directory: &Path,
    output_directory: Option<&Path>,
    logfile_directory: Option<&Path>,
    yes: bool,
) -> anyhow::Result<()> {
    let source = PairSource::new(reference_directory, target_directory);
    source.validate()?;

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let default_root = default_output_root(&cwd, target_directory);
    let layout = OutputLayout::prepare(output_directory, &default_root, config.output.overlay)?;

    if !yes && layout.has_existing_files()? {
        let question = format!(
            "Output folder '{}' is not empty. Some files may be overwritten. Proceed? [Y/n] ",
            layout.root().display()
        );
        if !confirm(&question)? {
            println!("Exiting.");
            return Ok(());
        }
    }

    let started = Local::now();
    let file_name = log_file_name(&directory_basename(target_directory), &started);
    let mut log = RunLog::create(logfile_directory, &cwd, &file_name)?;

    let run_id = new_run_id();
    let aligner = Aligner::new(config);
    let search = &aligner.config().search;
    let header = RunHeader {
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
        working_directory: cwd.clone(),
        reference_directory: absolute(reference_directory),
        target_directory: absolute(target_directory),
        output_directory: absolute(layout.root()),
        reference_threshold: search.reference_threshold,
        target_threshold: search.target_threshold,
        reference_thresholds: aligner.controller().reference_grid().thresholds().collect(),
        target_thresholds: aligner.controller().target_grid().thresholds().collect(),
        scale_bounds: search.scale_factor_bounds,
        run_id,
        started,
    };
    println!("{}", log.write_header(&header)?);

    let listing = source.list()?;
    let runner = BatchRunner::new(aligner, layout).with_run_id(run_id);
    draw_progress(&Progress {
        completed: 0,
        total: listing.pairs.len(),
        current: String::new(),
    });
    let summary = runner.run(&listing, &mut log, draw_progress)?;
    eprintln!();

    let log_path = log.finish(&Local::now())?;
    println!(
        "Aligned {}, unsuccessful {}, errors {}, skipped {}. Log: {}",
        summary.aligned,
        summary.unsuccessful,
        summary.errors,
        summary.skipped,
        log_path.display()
    );
    Ok(())
}

fn handle_pair(
    config: Config,
    reference: &Path,
    target: &Path,
    output: &Path,
    overlay: Option<&Path>,
) -> anyhow::Result<()> {
    let reference_image = load_color_image(reference)?;
    let target_image = load_color_image(target)?;
    let aligner = Aligner::new(config);

    let result = match aligner.align_images(&reference_image, &target_image) {
        Ok(result) => result,
        Err(AlignError::AlignmentUnsuccessful { attempts }) => {
            anyhow::bail!("alignment unsuccessful after {} threshold combinations", attempts)
        }
        Err(e) => return Err(e.into()),
    };

    result
        .transformed
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    if let (Some(path), Some(image)) = (overlay, result.overlay.as_ref()) {
        image
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&result.accepted)?);
    Ok(())
}

/// Empty answer means yes.
fn confirm(question: &str) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", question);
        io::stdout().flush()?;
        let answer = match lines.next() {
            Some(line) => line?.trim().to_lowercase(),
            None => return Ok(false),
        };
        match answer.as_str() {
            "" | "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please type 'yes' or 'y', or 'no' or 'n'."),
        }
    }
}

fn draw_progress(progress: &Progress) {
    let fraction = progress.fraction().clamp(0.0, 1.0);
    let filled = (PROGRESS_BAR_WIDTH as f64 * fraction).round() as usize;
    let name = &progress.current;
    let shown = if name.chars().count() > PROGRESS_NAME_WIDTH {
        let tail: String = name
            .chars()
            .skip(name.chars().count() - PROGRESS_NAME_WIDTH)
            .collect();
        format!("...{}", tail)
    } else {
        name.clone()
    };
    eprint!(
        "\rPercent: [{}{}] {:.1}% {} ",
        "#".repeat(filled),
        "-".repeat(PROGRESS_BAR_WIDTH - filled),
        fraction * 100.0,
        shown
    );
    let _ = io::stderr().flush();
}
