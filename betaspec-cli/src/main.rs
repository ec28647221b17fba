//! betaspec CLI: generate and analyze beta-decay spectra.
//!
//! - `generate <base>` samples the spectrum and writes `<base>.<ext>` holding
//!   the true ("E_e") and smeared ("E_e_sm") histograms
//! - `analyze <base>` fits every histogram in the container
//! - `info <base>` lists the container contents
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::doc_markdown,
    clippy::too_many_lines
)]

mod config;

use betaspec_algorithms::{analyze_spectra, generate_spectra, SpectrumFit};
use betaspec_core::{Histogram, SamplingError};
use betaspec_io::{read_spectra, read_spectrum, write_spectra, ContainerFormat};
use clap::{Parser, Subcommand};
use config::{Overrides, RunConfig};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("container error: {0}")]
    Container(#[from] betaspec_io::Error),

    #[error("configuration error: {0}")]
    Core(#[from] betaspec_core::Error),

    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Beta-decay spectrum toy Monte Carlo and endpoint fitter.
#[derive(Parser)]
#[command(name = "betaspec")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample events and write the true and smeared spectra
    Generate {
        /// Output base name; the format extension is appended
        base: PathBuf,

        /// JSON run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Fit the neutrino mass in every spectrum of a container
    Analyze {
        /// Container file or base name
        base: PathBuf,

        /// JSON run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only fit these histograms
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show the histograms stored in a container
    Info {
        /// Container file or base name
        base: PathBuf,

        /// Format used when `base` has no extension
        #[arg(long, value_enum)]
        format: Option<config::FormatArg>,
    },
}

#[derive(Serialize)]
struct AnalysisReport<'a> {
    container: &'a Path,
    q_value_ev: f64,
    fits: &'a [SpectrumFit],
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn print_histogram_summary(name: &str, histogram: &Histogram) {
    println!(
        "{:<10} {:>6} bins  [{}, {}] eV  entries {:>10}  integral {:>12.1}  underflow {:.1}  overflow {:.1}",
        name,
        histogram.bins(),
        histogram.lower(),
        histogram.upper(),
        histogram.entries(),
        histogram.integral(),
        histogram.underflow(),
        histogram.overflow()
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Generate {
            base,
            config,
            overrides,
        } => {
            let config = RunConfig::from_args(config.as_ref(), &overrides)?;
            if !config.format.is_available() {
                return Err(CliError::Config(format!(
                    "{:?} containers need the `hdf5` feature",
                    config.format
                )));
            }
            let run = config.resolve()?;
            let output = config.container_path(&base);

            let spectra = generate_spectra(&run.model, run.window, &run.generation)?;
            write_spectra(&output, &spectra.named())?;
            info!("wrote {}", output.display());

            let report = &spectra.report;
            println!("Container: {}", output.display());
            println!("Seed: {}", report.seed);
            println!(
                "Events: {} ({} attempts, efficiency {:.3e})",
                report.sampler.accepted,
                report.sampler.attempts,
                report.sampler.efficiency()
            );
            if report.smeared_rejected > 0 {
                println!("Smeared values rejected: {}", report.smeared_rejected);
            }
            println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
            for (name, histogram) in spectra.named() {
                print_histogram_summary(name, histogram);
            }
        }

        Commands::Analyze {
            base,
            config,
            names,
            json,
            overrides,
        } => {
            let config = RunConfig::from_args(config.as_ref(), &overrides)?;
            let run = config.resolve()?;
            let container = config.format.container_path(&base);

            let spectra = if names.is_empty() {
                read_spectra(&container)?
            } else {
                names
                    .iter()
                    .map(|name| Ok((name.clone(), read_spectrum(&container, name)?)))
                    .collect::<Result<Vec<_>>>()?
            };
            let fits = analyze_spectra(&spectra, &run.model, &run.fit)?;

            if json {
                let report = AnalysisReport {
                    container: &container,
                    q_value_ev: run.model.q_value(),
                    fits: &fits,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Container: {}", container.display());
                println!(
                    "{:<10} | {:>10} | {:>20} | {:>12} | {:>14} | {}",
                    "Histogram", "Entries", "m_nu (eV)", "scale", "chi2/ndf", "Status"
                );
                println!("{:-<90}", "");
                for fit in &fits {
                    let result = &fit.result;
                    println!(
                        "{:<10} | {:>10} | {:>9.4} +/- {:<7.4} | {:>12.6} | {:>14} | {}",
                        fit.name,
                        fit.entries,
                        result.neutrino_mass.value,
                        result.neutrino_mass.error,
                        result.scale.value,
                        format!("{:.2}/{}", result.chi_square, result.ndf),
                        result.status
                    );
                }
            }
        }

        Commands::Info { base, format } => {
            let format = format.map(ContainerFormat::from).unwrap_or_default();
            let container = format.container_path(&base);
            let spectra = read_spectra(&container)?;

            println!("Container: {}", container.display());
            println!("Histograms: {}", spectra.len());
            for (name, histogram) in &spectra {
                print_histogram_summary(name, histogram);
            }
        }
    }

    Ok(())
}
