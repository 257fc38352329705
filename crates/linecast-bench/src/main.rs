//! linecast-bench: CLI tool for line detection parameter experimentation
//! and diagnostics.
//!
//! Runs the levels -> blur -> gradient -> Canny -> Hough pipeline on a
//! given image
//! file with configurable parameters, printing per-stage diagnostics.
//! Useful for:
//!
//! - Tuning Canny thresholds, blur sigma, and Hough resolution
//! - Measuring per-stage durations and the effect of thread counts
//! - Comparing single- and double-precision kernels
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin linecast-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=linecast_pipeline=debug` to see per-stage log events.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use clap::builder::RangedU64ValueParser;
use linecast_pipeline::diagnostics::{Clock, LinesDiagnostics, run_with_diagnostics};
use linecast_pipeline::grayscale::decode_and_grayscale;
use linecast_pipeline::{
    Cancel, CannySettings, ConfigError, GaussianSettings, GrayImage, HoughSettings, Line,
    LinesChain, LinesSettings, Real,
};
use tracing::info;

/// Line detection parameter experimentation and diagnostics.
///
/// Runs edge and line detection on a given image with configurable
/// parameters and prints per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "linecast-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Input intensity mapped to black.
    #[arg(long, default_value_t = 0)]
    level_low: u8,

    /// Input intensity mapped to white.
    #[arg(long, default_value_t = u8::MAX)]
    level_high: u8,

    /// Fit the level bounds to the image before running.
    #[arg(long)]
    auto_levels: bool,

    /// Fit the gradient scale to the image before running.
    #[arg(long)]
    auto_scale: bool,

    /// Gaussian blur sigma.
    #[arg(long, default_value_t = GaussianSettings::DEFAULT_SIGMA)]
    sigma: f32,

    /// Skip the Gaussian blur.
    #[arg(long)]
    no_blur: bool,

    /// Canny low threshold, as a fraction of the maximum gradient.
    #[arg(long, default_value_t = CannySettings::DEFAULT_LOW)]
    canny_low: f64,

    /// Canny high threshold, as a fraction of the maximum gradient.
    #[arg(long, default_value_t = CannySettings::DEFAULT_HIGH)]
    canny_high: f64,

    /// Maximum hysteresis trace length from a seed, in pixels.
    #[arg(long, default_value_t = CannySettings::DEFAULT_DEPTH)]
    canny_depth: usize,

    /// Worker count for Canny hysteresis and Hough voting/suppression.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_THREADS, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    threads: usize,

    /// Hough accumulator rho bins.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_RHO_COUNT)]
    rho_count: usize,

    /// Hough accumulator theta bins over 0..180 degrees.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_THETA_COUNT)]
    theta_count: usize,

    /// Half-width in degrees of the vote fan around each edge angle.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_ANGLE_RANGE)]
    angle_range: f64,

    /// Peak suppression window side, in accumulator cells.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_WINDOW)]
    window: usize,

    /// Minimum votes for a surviving peak to become a line.
    #[arg(long, default_value_t = HoughSettings::DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Count every edge pixel as one vote instead of its edge strength.
    #[arg(long)]
    unweighted: bool,

    /// Skip peak suppression; no lines are extracted.
    #[arg(long)]
    no_suppress: bool,

    /// Drop lines within this many pixels of an image border.
    #[arg(long)]
    edge_tolerance: Option<f64>,

    /// Run the kernels in single precision.
    #[arg(long)]
    single: bool,

    /// Print the detected lines after the first run.
    #[arg(long)]
    lines: bool,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full settings as a JSON string.
    ///
    /// When provided, all other detection parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build [`LinesSettings`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, settings are
/// assembled from the individual flags.
fn settings_from_cli(cli: &Cli) -> Result<LinesSettings, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let mut settings = LinesSettings::default();
    settings.level.low = cli.level_low;
    settings.level.high = cli.level_high;
    settings.gaussian.enable = !cli.no_blur;
    settings.gaussian.sigma = cli.sigma;
    settings.canny.low = cli.canny_low;
    settings.canny.high = cli.canny_high;
    settings.canny.depth = cli.canny_depth;
    settings.canny.threads = cli.threads;
    settings.hough = HoughSettings {
        rho_count: cli.rho_count,
        theta_count: cli.theta_count,
        angle_range: cli.angle_range,
        weighted: !cli.unweighted,
        suppress: !cli.no_suppress,
        window: cli.window,
        threshold: cli.threshold,
        edge_tolerance: cli.edge_tolerance,
        threads: cli.threads,
        ..HoughSettings::default()
    };
    Ok(settings)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match settings_from_cli(&cli) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let gray = match decode_and_grayscale(&image_bytes) {
        Ok(gray) => gray,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let settings = match auto_detect(&cli, &gray, settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes, {}x{})",
        cli.image_path.display(),
        image_bytes.len(),
        gray.width(),
        gray.height(),
    );
    eprintln!("Settings: {settings:#?}");
    eprintln!(
        "Precision: {}",
        if cli.single { "f32" } else { "f64" }
    );
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    if cli.single {
        bench::<f32>(&cli, &gray, &settings)
    } else {
        bench::<f64>(&cli, &gray, &settings)
    }
}

/// Apply `--auto-levels` and `--auto-scale` by running the detections
/// on a [`LinesChain`] holding `gray`.
fn auto_detect(
    cli: &Cli,
    gray: &GrayImage,
    settings: LinesSettings,
) -> Result<LinesSettings, ConfigError> {
    if !cli.auto_levels && !cli.auto_scale {
        return Ok(settings);
    }

    let chain = LinesChain::<f64>::new(&settings, Cancel::new())?;
    chain.set_image(gray.clone());
    if cli.auto_levels
        && let Some(level) = chain.auto_detect_levels()?
    {
        eprintln!("Detected levels: low={} high={}", level.low, level.high);
    }
    if cli.auto_scale
        && let Some(scale) = chain.auto_detect_settings()?
    {
        eprintln!("Detected gradient scale: {scale}");
    }
    Ok(chain.controls().settings())
}

/// Run the detection `cli.runs` times and print what each run did.
fn bench<T: Real>(cli: &Cli, gray: &GrayImage, settings: &LinesSettings) -> ExitCode {
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match run_with_diagnostics::<T, _>(gray, settings, &StdClock) {
            Ok((result, diagnostics)) => {
                info!(
                    run,
                    lines = result.lines.len(),
                    elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
                    "run finished"
                );
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // List lines on the first run only.
                if run == 0
                    && cli.lines
                    && let Err(e) = print_lines(&result.lines, cli.json)
                {
                    eprintln!("Error serializing lines: {e}");
                    return ExitCode::FAILURE;
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Print detected lines, strongest first.
fn print_lines(lines: &[Line], json: bool) -> Result<(), serde_json::Error> {
    let mut sorted = lines.to_vec();
    sorted.sort_by(|a, b| b.votes.total_cmp(&a.votes));

    if json {
        println!("{}", serde_json::to_string_pretty(&sorted)?);
        return Ok(());
    }

    println!();
    println!("Lines ({})", sorted.len());
    println!("{:>10} {:>10} {:>12}", "rho", "theta", "votes");
    println!("{}", "-".repeat(34));
    for line in &sorted {
        println!(
            "{:>10.2} {:>10.2} {:>12.2}",
            line.rho, line.theta, line.votes
        );
    }
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[LinesDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let Some(first) = all_diagnostics.first() else {
        return;
    };
    for (index, (name, _)) in first.stages().iter().enumerate() {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| d.stages()[index].1.duration.as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
