//! Run configuration: JSON file plus command-line overrides.
//!
//! Energies in [`RunConfig`] (resolution, fit window, initial mass) use the
//! unit of `physics.unit`; [`RunConfig::resolve`] turns everything into the
//! eV-based library types before any sampling starts.

use crate::{CliError, Result};
use betaspec_algorithms::{
    FitOptions, FitParameter, FitWindow, GenerationConfig, SamplerConfig, SmearFilter,
};
use betaspec_core::{PhysicalParameters, QValue, SamplingWindow, SpectrumModel};
use betaspec_io::ContainerFormat;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Width of the default sampling and fit window below Q (eV).
const ENDPOINT_WINDOW_EV: f64 = 25.0;

/// Complete configuration of a generation or analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub physics: PhysicalParameters,
    pub event_count: u64,
    /// Gaussian resolution sigma.
    pub resolution: f64,
    /// Envelope scale `h`.
    pub envelope_scale: f64,
    /// Lower sampling limit as a fraction of Q; `None` means `(Q - 25 eV) / Q`.
    pub sampling_limit_fraction: Option<f64>,
    pub bin_count: usize,
    /// Defaults to `Q - 25 eV`.
    pub fit_window_min: Option<f64>,
    /// Defaults to `Q`.
    pub fit_window_max: Option<f64>,
    pub initial_neutrino_mass: f64,
    pub neutrino_mass_min: f64,
    pub neutrino_mass_max: f64,
    pub fix_neutrino_mass: bool,
    pub seed: Option<u64>,
    pub workers: usize,
    pub max_attempts: u64,
    pub smear_filter: SmearFilter,
    pub deadline_secs: Option<f64>,
    pub format: ContainerFormat,
}

impl Default for RunConfig {
    fn default() -> Self {
        let generation = GenerationConfig::default();
        Self {
            physics: PhysicalParameters::default(),
            event_count: generation.event_count,
            resolution: generation.resolution,
            envelope_scale: generation.sampler.envelope_scale,
            sampling_limit_fraction: None,
            bin_count: generation.bins,
            fit_window_min: None,
            fit_window_max: None,
            initial_neutrino_mass: 0.2,
            neutrino_mass_min: 0.0,
            neutrino_mass_max: 1.0,
            fix_neutrino_mass: false,
            seed: None,
            workers: 1,
            max_attempts: generation.sampler.max_attempts,
            smear_filter: SmearFilter::default(),
            deadline_secs: None,
            format: ContainerFormat::default(),
        }
    }
}

/// Library inputs derived from a [`RunConfig`], all in eV.
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub model: SpectrumModel,
    pub window: SamplingWindow,
    pub generation: GenerationConfig,
    pub fit: FitOptions,
}

impl RunConfig {
    /// Reads a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|err| {
            CliError::Config(format!("{}: {err}", path.display()))
        })
    }

    /// Default configuration, or the file given with `--config`.
    pub fn from_args(path: Option<&PathBuf>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        Ok(config)
    }

    /// Replaces fields given on the command line.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(charge) = overrides.charge {
            self.physics.charge = charge;
        }
        if let Some(z) = overrides.parent_z {
            self.physics.parent.atomic_number = z;
        }
        if let Some(mass) = overrides.parent_mass {
            self.physics.parent.mass_u = mass;
        }
        if let Some(z) = overrides.daughter_z {
            self.physics.daughter.atomic_number = z;
        }
        if let Some(mass) = overrides.daughter_mass {
            self.physics.daughter.mass_u = mass;
        }
        if let Some(q) = overrides.q_value {
            self.physics.q_value = QValue::Direct(q);
        }
        if overrides.q_from_masses {
            self.physics.q_value = QValue::MassDifference;
        }
        if let Some(mass) = overrides.neutrino_mass {
            self.physics.neutrino_mass = mass;
        }
        if let Some(events) = overrides.events {
            self.event_count = events;
        }
        if let Some(resolution) = overrides.resolution {
            self.resolution = resolution;
        }
        if let Some(h) = overrides.envelope_scale {
            self.envelope_scale = h;
        }
        if let Some(fraction) = overrides.limit_fraction {
            self.sampling_limit_fraction = Some(fraction);
        }
        if let Some(bins) = overrides.bins {
            self.bin_count = bins;
        }
        if let Some(min) = overrides.fit_min {
            self.fit_window_min = Some(min);
        }
        if let Some(max) = overrides.fit_max {
            self.fit_window_max = Some(max);
        }
        if let Some(mass) = overrides.initial_mass {
            self.initial_neutrino_mass = mass;
        }
        if overrides.fix_mass {
            self.fix_neutrino_mass = true;
        }
        if let Some(seed) = overrides.seed {
            self.seed = Some(seed);
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(attempts) = overrides.max_attempts {
            self.max_attempts = attempts;
        }
        if let Some(filter) = overrides.smear_filter {
            self.smear_filter = filter.into();
        }
        if let Some(secs) = overrides.deadline_secs {
            self.deadline_secs = Some(secs);
        }
        if let Some(format) = overrides.format {
            self.format = format.into();
        }
    }

    /// Validates the configuration and builds the library types.
    pub fn resolve(&self) -> Result<ResolvedRun> {
        let model = SpectrumModel::new(&self.physics)?;
        let q = model.q_value();
        let unit = self.physics.unit;

        let fraction = self
            .sampling_limit_fraction
            .unwrap_or((q - ENDPOINT_WINDOW_EV).max(0.0) / q);
        let window = SamplingWindow::from_fraction(fraction, q)?;

        let deadline = self
            .deadline_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|err| {
                    CliError::Config(format!(
                        "deadline_secs {secs} is not a valid duration: {err}"
                    ))
                })
            })
            .transpose()?;
        let generation = GenerationConfig {
            event_count: self.event_count,
            resolution: unit.to_ev(self.resolution),
            bins: self.bin_count,
            smear_filter: self.smear_filter,
            seed: self.seed,
            workers: self.workers,
            deadline,
            sampler: SamplerConfig::default()
                .with_envelope_scale(self.envelope_scale)
                .with_max_attempts(self.max_attempts),
        };
        if generation.bins == 0 {
            return Err(betaspec_core::Error::InvalidBinCount(0).into());
        }

        let fit_min = self
            .fit_window_min
            .map_or(q - ENDPOINT_WINDOW_EV, |value| unit.to_ev(value));
        let fit_max = self.fit_window_max.map_or(q, |value| unit.to_ev(value));
        let initial_mass = unit.to_ev(self.initial_neutrino_mass);
        let neutrino_mass = if self.fix_neutrino_mass {
            FitParameter::fixed(initial_mass)
        } else {
            FitParameter::free(
                initial_mass,
                unit.to_ev(self.neutrino_mass_min),
                unit.to_ev(self.neutrino_mass_max),
            )
        };
        let fit = FitOptions::for_endpoint(q)
            .with_window(FitWindow::new(fit_min, fit_max)?)
            .with_neutrino_mass(neutrino_mass);

        Ok(ResolvedRun {
            model,
            window,
            generation,
            fit,
        })
    }

    /// Container path for a base name, using the configured format.
    pub fn container_path(&self, base: &Path) -> PathBuf {
        self.format.container_path(base)
    }
}

/// Smear filter choices on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SmearFilterArg {
    /// Fill every smeared value (out-of-range values go to under/overflow)
    Unfiltered,
    /// Drop smeared values outside the sampling window
    Window,
}

impl From<SmearFilterArg> for SmearFilter {
    fn from(value: SmearFilterArg) -> Self {
        match value {
            SmearFilterArg::Unfiltered => Self::Unfiltered,
            SmearFilterArg::Window => Self::Window,
        }
    }
}

/// Container format choices on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Json,
    Hdf5,
}

impl From<FormatArg> for ContainerFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => Self::Json,
            FormatArg::Hdf5 => Self::Hdf5,
        }
    }
}

/// Per-option overrides of the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Decay charge (-1 electron, +1 positron)
    #[arg(long, allow_hyphen_values = true)]
    pub charge: Option<i32>,

    /// Parent atomic number
    #[arg(long)]
    pub parent_z: Option<u32>,

    /// Parent isotope mass (u)
    #[arg(long)]
    pub parent_mass: Option<f64>,

    /// Daughter atomic number
    #[arg(long)]
    pub daughter_z: Option<u32>,

    /// Daughter isotope mass (u)
    #[arg(long)]
    pub daughter_mass: Option<f64>,

    /// Endpoint energy Q
    #[arg(long, conflicts_with = "q_from_masses")]
    pub q_value: Option<f64>,

    /// Derive Q from the parent/daughter mass difference
    #[arg(long)]
    pub q_from_masses: bool,

    /// Neutrino mass used for generation
    #[arg(long)]
    pub neutrino_mass: Option<f64>,

    /// Number of accepted events
    #[arg(short = 'n', long)]
    pub events: Option<u64>,

    /// Gaussian detector resolution sigma
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Envelope scale h applied to N(Q/2)
    #[arg(long)]
    pub envelope_scale: Option<f64>,

    /// Lower sampling limit as a fraction of Q
    #[arg(long)]
    pub limit_fraction: Option<f64>,

    /// Histogram bin count
    #[arg(long)]
    pub bins: Option<usize>,

    /// Lower edge of the fit window
    #[arg(long)]
    pub fit_min: Option<f64>,

    /// Upper edge of the fit window
    #[arg(long)]
    pub fit_max: Option<f64>,

    /// Starting neutrino mass of the fit
    #[arg(long)]
    pub initial_mass: Option<f64>,

    /// Hold the neutrino mass at its initial value
    #[arg(long)]
    pub fix_mass: bool,

    /// Master random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Parallel generation workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Attempt cap per accepted sample
    #[arg(long)]
    pub max_attempts: Option<u64>,

    /// Range policy for smeared values
    #[arg(long, value_enum)]
    pub smear_filter: Option<SmearFilterArg>,

    /// Wall-clock budget for sampling, in seconds
    #[arg(long)]
    pub deadline_secs: Option<f64>,

    /// Container format
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use betaspec_core::{EnergyUnit, Nucleus};

    #[test]
    fn test_default_resolves_to_endpoint_windows() {
        let run = RunConfig::default().resolve().unwrap();
        assert_relative_eq!(run.window.lower(), 18_565.0, max_relative = 1e-12);
        assert_relative_eq!(run.window.upper(), 18_590.0);
        assert_relative_eq!(run.fit.window.min, 18_565.0);
        assert_relative_eq!(run.fit.window.max, 18_590.0);
        assert_eq!(run.generation.bins, 100);
        assert_eq!(run.generation.event_count, 10_000_000);
        assert!(!run.fit.neutrino_mass.fixed);
    }

    #[test]
    fn test_invalid_settings_fail_before_sampling() {
        let mut config = RunConfig::default();
        config.physics.charge = 0;
        assert!(config.resolve().is_err());

        let mut config = RunConfig::default();
        config.physics.q_value = QValue::Direct(-1.0);
        assert!(config.resolve().is_err());

        let mut config = RunConfig::default();
        config.sampling_limit_fraction = Some(1.0);
        assert!(config.resolve().is_err());

        let mut config = RunConfig::default();
        config.bin_count = 0;
        assert!(config.resolve().is_err());

        let mut config = RunConfig::default();
        config.fit_window_min = Some(18_589.8);
        config.fit_window_max = Some(18_565.0);
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_deadline_must_fit_a_duration() {
        for secs in [-1.0, f64::NAN, f64::INFINITY, 1.0e30] {
            let mut config = RunConfig::default();
            config.deadline_secs = Some(secs);
            assert!(
                matches!(config.resolve(), Err(CliError::Config(_))),
                "deadline_secs = {secs}"
            );
        }

        let mut config = RunConfig::default();
        config.deadline_secs = Some(1.0e19);
        let run = config.resolve().unwrap();
        let secs = run.generation.deadline.map(|deadline| deadline.as_secs());
        assert_eq!(secs, Some(10_000_000_000_000_000_000));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = RunConfig::default();
        config.apply(&Overrides {
            events: Some(1_000),
            seed: Some(42),
            fix_mass: true,
            initial_mass: Some(0.5),
            smear_filter: Some(SmearFilterArg::Window),
            format: Some(FormatArg::Hdf5),
            ..Overrides::default()
        });
        assert_eq!(config.event_count, 1_000);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.smear_filter, SmearFilter::Window);
        assert_eq!(config.format, ContainerFormat::Hdf5);

        let run = config.resolve().unwrap();
        assert!(run.fit.neutrino_mass.fixed);
        assert_relative_eq!(run.fit.neutrino_mass.initial, 0.5);
    }

    #[test]
    fn test_kev_energies_are_converted() {
        let mut config = RunConfig::default();
        config.physics = PhysicalParameters::default().with_unit(EnergyUnit::Kev);
        config.resolution = 0.001;
        config.fit_window_min = Some(18.57);
        let run = config.resolve().unwrap();
        assert_relative_eq!(run.model.q_value(), 18_590.0, max_relative = 1e-12);
        assert_relative_eq!(run.generation.resolution, 1.0, max_relative = 1e-12);
        assert_relative_eq!(run.fit.window.min, 18_570.0, max_relative = 1e-12);
    }

    #[test]
    fn test_json_config_with_mass_difference() {
        let text = r#"{
            "physics": { "q_value": { "source": "mass_difference" }, "neutrino_mass": 0.0 },
            "event_count": 500,
            "smear_filter": "window",
            "format": "json"
        }"#;
        let config: RunConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.physics.q_value, QValue::MassDifference);
        assert_eq!(config.physics.parent, Nucleus::tritium());
        assert_eq!(config.event_count, 500);
        let run = config.resolve().unwrap();
        // (3.0160492 - 3.0160293) u
        assert_relative_eq!(run.model.q_value(), 18_536.73, max_relative = 1e-4);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<RunConfig>(r#"{ "event_cont": 5 }"#).is_err());
    }
}
