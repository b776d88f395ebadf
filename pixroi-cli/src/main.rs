//! pixroi command-line interface.
//!
//! Reconstructs 3D hits and track axes from `.pxw` waveform containers.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand, ValueEnum};

use pixroi_algorithms::{reconstruct_events, NoiseMode, ReconstructionOptions, RunSummary};
use pixroi_core::ReconstructionConfig;
use pixroi_io::{ResultsWriter, WaveformFileReader};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    PixroiIo(#[from] pixroi_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] pixroi_core::Error),

    #[error("input has {found} samples per channel, configuration expects {expected}")]
    SampleCount { found: u32, expected: usize },
}

/// Noise estimation mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Noise {
    /// Gaussian fit of the amplitude spectrum
    Fitted,
    /// Mean and standard deviation of the amplitude spectrum
    Fast,
}

/// Pixel/ROI waveform reconstruction.
#[derive(Parser)]
#[command(name = "pixroi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct the events of a waveform container
    Process {
        /// Run parameter JSON file
        #[arg(short, long)]
        config: PathBuf,

        /// Input .pxw container
        input: PathBuf,

        /// Output base path for the CSV and statistics files
        #[arg(short, long)]
        output: PathBuf,

        /// Only reconstruct these event IDs
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<u32>,

        /// Subrun ID recorded on the events
        #[arg(long, default_value = "0")]
        subrun: u32,

        /// Noise estimation mode
        #[arg(long, value_enum, default_value = "fitted")]
        noise: Noise,

        /// Skip the common-mode filter
        #[arg(long)]
        no_common_mode: bool,

        /// Search ROI channels for unipolar pulses
        #[arg(long)]
        unipolar_roi: bool,

        /// Keep all candidates of ambiguous pixel pulses
        #[arg(long)]
        keep_ambiguities: bool,

        /// Skip outlier pruning
        #[arg(long)]
        keep_outliers: bool,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a waveform container
    Info {
        /// Input .pxw container
        input: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            config,
            input,
            output,
            events,
            subrun,
            noise,
            no_common_mode,
            unipolar_roi,
            keep_ambiguities,
            keep_outliers,
            verbose,
        } => {
            init_logging(verbose);

            let config = ReconstructionConfig::from_file(&config)?;
            let reader = WaveformFileReader::open(&input)?;
            let header = *reader.header();
            if config.n_samples > 0 && header.n_samples as usize != config.n_samples {
                return Err(CliError::SampleCount {
                    found: header.n_samples,
                    expected: config.n_samples,
                });
            }

            let mut options = ReconstructionOptions::default()
                .with_common_mode(!no_common_mode)
                .with_bipolar_roi(!unipolar_roi)
                .with_rejection(!keep_ambiguities, !keep_outliers)
                .with_subrun_id(subrun);
            options.noise_mode = match noise {
                Noise::Fitted => NoiseMode::Fitted,
                Noise::Fast => NoiseMode::Fast,
            };
            log::debug!("options: {:?}", options);

            let start = Instant::now();
            let mut raws = reader.read_all()?;
            if !events.is_empty() {
                raws.retain(|raw| events.contains(&raw.event_id));
            }
            log::info!("reconstructing {} of {} events", raws.len(), reader.n_events());

            let reconstructed = reconstruct_events(&raws, &config, &options)?;

            let writer = ResultsWriter::new(&output);
            for event in &reconstructed {
                writer.write_event(event)?;
            }
            let summary = RunSummary::from_events(&reconstructed);
            writer.write_summary(&summary)?;

            println!(
                "Processed {} events in {:.2}s",
                summary.n_events,
                start.elapsed().as_secs_f64()
            );
            println!("Average hit candidates: {:.2}", summary.avg_hit_candidates);
            println!("Average ambiguities: {:.2}", summary.avg_ambiguities);
            println!(
                "Average unmatched pixel pulses: {:.2}",
                summary.avg_unmatched_pixel_pulses
            );
            println!("Failed PCA: {}", summary.n_failed);
            println!("Statistics written to: {}", writer.stats_path().display());
        }

        Commands::Info { input } => {
            init_logging(false);
            let reader = WaveformFileReader::open(&input)?;
            let header = reader.header();
            let size = header.file_len()?;

            println!("File: {}", input.display());
            println!("Version: {}", header.version);
            println!("Events: {}", header.n_events);
            println!("Pixel channels: {}", header.n_pixels);
            println!("ROI channels: {}", header.n_rois);
            println!("Samples per channel: {}", header.n_samples);
            println!(
                "Size: {} bytes ({:.2} MB)",
                size,
                size as f64 / 1_000_000.0
            );

            let ids: Vec<u32> = reader
                .events()
                .take(10)
                .map(|event| event.map(|e| e.event_id))
                .collect::<std::result::Result<_, _>>()?;
            if !ids.is_empty() {
                println!("First event IDs: {:?}", ids);
            }
        }
    }

    Ok(())
}
