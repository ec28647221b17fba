//! Event generation: sample true energies, smear them, fill both spectra.
//!
//! One worker runs serially on the caller's thread; more workers run on the
//! rayon pool, each with its own `StdRng` seeded from `seed + worker` and its
//! own partial histograms, merged bin-wise at the end. For a given seed and
//! worker count the result is reproducible.

use crate::sampler::{RejectionSampler, SamplerConfig, SamplerStats};
use betaspec_core::{Error, Histogram, SamplingError, SamplingWindow, SpectrumModel};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Name of the true-energy spectrum in a container.
pub const TRUE_SPECTRUM_NAME: &str = "E_e";
/// Name of the smeared spectrum in a container.
pub const SMEARED_SPECTRUM_NAME: &str = "E_e_sm";

/// What happens to smeared values outside the sampling window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SmearFilter {
    /// Every smeared value is filled; out-of-range ones land in under/overflow.
    #[default]
    Unfiltered,
    /// Values outside `[lower, upper]` are discarded and counted.
    Window,
}

/// Generation run configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenerationConfig {
    /// Number of accepted events.
    pub event_count: u64,
    /// Gaussian detector resolution sigma (eV).
    pub resolution: f64,
    /// Bins of both histograms.
    pub bins: usize,
    /// Range policy for smeared values.
    pub smear_filter: SmearFilter,
    /// Master seed; drawn from entropy and logged when absent.
    pub seed: Option<u64>,
    /// Independent generation streams (1 = serial).
    pub workers: usize,
    /// Wall-clock budget for the whole run.
    pub deadline: Option<Duration>,
    /// Rejection sampler settings.
    pub sampler: SamplerConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            event_count: 10_000_000,
            resolution: 1.0,
            bins: 100,
            smear_filter: SmearFilter::default(),
            seed: None,
            workers: 1,
            deadline: None,
            sampler: SamplerConfig::default(),
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn with_event_count(mut self, event_count: u64) -> Self {
        self.event_count = event_count;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    #[must_use]
    pub fn with_smear_filter(mut self, smear_filter: SmearFilter) -> Self {
        self.smear_filter = smear_filter;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if !(self.resolution.is_finite() && self.resolution >= 0.0) {
            return Err(Error::ConfigError(format!(
                "resolution must be non-negative, got {}",
                self.resolution
            )));
        }
        if self.bins == 0 {
            return Err(Error::InvalidBinCount(self.bins));
        }
        if self.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Summary of a generation run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenerationReport {
    /// Master seed actually used.
    pub seed: u64,
    pub workers: usize,
    /// Combined sampler counters.
    pub sampler: SamplerStats,
    /// Smeared values dropped by [`SmearFilter::Window`].
    pub smeared_rejected: u64,
    pub elapsed: Duration,
}

/// The two spectra of a run plus its report.
#[derive(Clone, Debug)]
pub struct GeneratedSpectra {
    pub true_spectrum: Histogram,
    pub smeared_spectrum: Histogram,
    pub report: GenerationReport,
}

impl GeneratedSpectra {
    /// Spectra paired with their container names.
    #[must_use]
    pub fn named(&self) -> [(&'static str, &Histogram); 2] {
        [
            (TRUE_SPECTRUM_NAME, &self.true_spectrum),
            (SMEARED_SPECTRUM_NAME, &self.smeared_spectrum),
        ]
    }
}

/// Logs progress at every 1% (debug) and 10% (info) of the target.
struct Progress {
    target: u64,
    done: AtomicU64,
}

impl Progress {
    fn new(target: u64) -> Self {
        Self {
            target,
            done: AtomicU64::new(0),
        }
    }

    fn advance(&self, events: u64) {
        if events == 0 || self.target == 0 {
            return;
        }
        let before = self.done.fetch_add(events, Ordering::Relaxed);
        let after = before + events;
        let percent_before = before * 100 / self.target;
        let percent_after = after * 100 / self.target;
        if percent_after / 10 > percent_before / 10 {
            info!("generated {after}/{} events ({percent_after}%)", self.target);
        } else if percent_after > percent_before {
            debug!("generated {after}/{} events ({percent_after}%)", self.target);
        }
    }
}

struct WorkerOutput {
    true_spectrum: Histogram,
    smeared_spectrum: Histogram,
    stats: SamplerStats,
    smeared_rejected: u64,
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker: usize,
    events: u64,
    seed: u64,
    model: &SpectrumModel,
    window: SamplingWindow,
    config: &GenerationConfig,
    deadline: Option<Instant>,
    progress: &Progress,
) -> Result<WorkerOutput, SamplingError> {
    let mut true_spectrum = Histogram::new(window.lower(), window.upper(), config.bins)?;
    let mut smeared_spectrum = Histogram::new(window.lower(), window.upper(), config.bins)?;
    let noise = Normal::new(0.0, config.resolution).map_err(|err| {
        SamplingError::Config(Error::ConfigError(format!("invalid resolution: {err}")))
    })?;
    let mut sampler =
        RejectionSampler::new(model, window, config.sampler.clone())?.with_deadline(deadline);
    let mut rng = StdRng::seed_from_u64(seed);

    let block = (progress.target / 1000).max(1);
    let mut pending = 0_u64;
    let mut smeared_rejected = 0_u64;
    let filter = config.smear_filter;

    sampler.sample_into(&mut rng, events, |rng, energy| {
        true_spectrum.fill(energy);
        let smeared = energy + noise.sample(rng);
        match filter {
            SmearFilter::Window if !window.contains(smeared) => smeared_rejected += 1,
            _ => {
                smeared_spectrum.fill(smeared);
            }
        }
        pending += 1;
        if pending == block {
            progress.advance(pending);
            pending = 0;
        }
    })?;
    progress.advance(pending);

    let stats = *sampler.stats();
    debug!(
        "worker {worker} finished: {} events, {} attempts",
        stats.accepted, stats.attempts
    );
    Ok(WorkerOutput {
        true_spectrum,
        smeared_spectrum,
        stats,
        smeared_rejected,
    })
}

/// Events assigned to `worker` when `total` is split over `workers`.
fn worker_share(total: u64, workers: usize, worker: usize) -> u64 {
    let workers = workers as u64;
    let worker = worker as u64;
    total / workers + u64::from(worker < total % workers)
}

/// Runs a full generation: `event_count` accepted energies in `window`,
/// filled into a true and a Gaussian-smeared histogram over the same binning.
///
/// # Errors
/// Returns [`SamplingError::Config`] for invalid settings, and propagates
/// sampler stalls and deadline expiry.
pub fn generate_spectra(
    model: &SpectrumModel,
    window: SamplingWindow,
    config: &GenerationConfig,
) -> Result<GeneratedSpectra, SamplingError> {
    config.validate()?;
    let seed = config.seed.unwrap_or_else(|| {
        let seed = rand::thread_rng().gen();
        info!("no seed configured, using {seed}");
        seed
    });
    info!(
        "generating {} events in [{}, {}] eV with {} worker(s), seed {seed}",
        config.event_count,
        window.lower(),
        window.upper(),
        config.workers
    );

    let start = Instant::now();
    // A budget past the clock's range means no deadline.
    let deadline = config.deadline.and_then(|budget| start.checked_add(budget));
    let progress = Progress::new(config.event_count);

    let outputs: Vec<WorkerOutput> = if config.workers == 1 {
        vec![run_worker(
            0,
            config.event_count,
            seed,
            model,
            window,
            config,
            deadline,
            &progress,
        )?]
    } else {
        (0..config.workers)
            .into_par_iter()
            .map(|worker| {
                run_worker(
                    worker,
                    worker_share(config.event_count, config.workers, worker),
                    seed.wrapping_add(worker as u64),
                    model,
                    window,
                    config,
                    deadline,
                    &progress,
                )
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut outputs = outputs.into_iter();
    let Some(first) = outputs.next() else {
        return Err(Error::ConfigError("no generation worker ran".to_string()).into());
    };
    let mut true_spectrum = first.true_spectrum;
    let mut smeared_spectrum = first.smeared_spectrum;
    let mut stats = first.stats;
    let mut smeared_rejected = first.smeared_rejected;
    for output in outputs {
        true_spectrum.merge(&output.true_spectrum)?;
        smeared_spectrum.merge(&output.smeared_spectrum)?;
        stats.merge(&output.stats);
        smeared_rejected += output.smeared_rejected;
    }

    if stats.envelope_truncated() {
        warn!(
            "density exceeded the envelope by a factor {:.3}: spectrum truncated, raise envelope_scale",
            stats.max_ratio
        );
    }
    let elapsed = start.elapsed();
    info!(
        "generation done: {} events, efficiency {:.3e}, {} smeared values rejected, {:.2?}",
        stats.accepted,
        stats.efficiency(),
        smeared_rejected,
        elapsed
    );

    Ok(GeneratedSpectra {
        true_spectrum,
        smeared_spectrum,
        report: GenerationReport {
            seed,
            workers: config.workers,
            sampler: stats,
            smeared_rejected,
            elapsed,
        },
    })
}
