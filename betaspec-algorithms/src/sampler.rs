//! Von Neumann acceptance-rejection sampler for the decay spectrum.
//!
//! Candidates are drawn uniformly in the open window `(lower, upper)` and
//! accepted with probability `N(T) / M`, where the envelope
//! `M = h * N(Q/2)` is fixed at construction. When the true density exceeds
//! `M` somewhere in the window the spectrum is silently truncated there; the
//! largest observed `N(T) / M` is kept in [`SamplerStats`] so callers can
//! detect that.

use betaspec_core::{Error, SamplingError, SamplingWindow, SpectrumModel};
use rand::Rng;
use std::time::Instant;

/// Attempts between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 4096;

/// Rejection sampler configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerConfig {
    /// Envelope scale `h` applied to `N(Q/2)`.
    pub envelope_scale: f64,
    /// Maximum attempts for one accepted sample before reporting a stall.
    pub max_attempts: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            envelope_scale: 2.0e-5,
            max_attempts: 10_000_000,
        }
    }
}

impl SamplerConfig {
    /// Sets the envelope scale `h`.
    #[must_use]
    pub fn with_envelope_scale(mut self, envelope_scale: f64) -> Self {
        self.envelope_scale = envelope_scale;
        self
    }

    /// Sets the per-sample attempt cap.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Running counters of a sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerStats {
    /// Candidates drawn.
    pub attempts: u64,
    /// Candidates accepted.
    pub accepted: u64,
    /// Largest density seen at a candidate.
    pub max_density: f64,
    /// Largest `density / envelope` seen; above 1 the envelope truncates.
    pub max_ratio: f64,
}

impl SamplerStats {
    /// Accepted fraction of attempts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn efficiency(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempts as f64
        }
    }

    /// True if some candidate had a density above the envelope.
    #[must_use]
    pub fn envelope_truncated(&self) -> bool {
        self.max_ratio > 1.0
    }

    /// Combines counters of independent samplers.
    pub fn merge(&mut self, other: &Self) {
        self.attempts += other.attempts;
        self.accepted += other.accepted;
        self.max_density = self.max_density.max(other.max_density);
        self.max_ratio = self.max_ratio.max(other.max_ratio);
    }
}

/// Rejection sampler bound to one model and window.
#[derive(Clone, Debug)]
pub struct RejectionSampler {
    model: SpectrumModel,
    window: SamplingWindow,
    config: SamplerConfig,
    envelope: f64,
    deadline: Option<Instant>,
    stats: SamplerStats,
}

impl RejectionSampler {
    /// Builds a sampler and computes its envelope.
    ///
    /// # Errors
    /// Returns [`SamplingError::Config`] if `h` is not positive, the attempt
    /// cap is zero, the window starts at or above Q, or the envelope is not a
    /// positive finite number.
    pub fn new(
        model: &SpectrumModel,
        window: SamplingWindow,
        config: SamplerConfig,
    ) -> Result<Self, SamplingError> {
        if !(config.envelope_scale.is_finite() && config.envelope_scale > 0.0) {
            return Err(Error::ConfigError(format!(
                "envelope scale must be positive, got {}",
                config.envelope_scale
            ))
            .into());
        }
        if config.max_attempts == 0 {
            return Err(Error::ConfigError("max_attempts must be at least 1".to_string()).into());
        }
        let q = model.q_value();
        if window.lower() >= q {
            return Err(Error::InvalidWindow {
                lower: window.lower(),
                upper: q,
            }
            .into());
        }

        let envelope =
            config.envelope_scale * model.decay_density(0.5 * q, model.neutrino_mass(), 1.0);
        if !(envelope.is_finite() && envelope > 0.0) {
            return Err(Error::ConfigError(format!(
                "envelope h * N(Q/2) = {envelope:e} is not a positive finite value"
            ))
            .into());
        }

        Ok(Self {
            model: model.clone(),
            window,
            config,
            envelope,
            deadline: None,
            stats: SamplerStats::default(),
        })
    }

    /// Stops sampling with [`SamplingError::DeadlineExceeded`] after `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Envelope value `M = h * N(Q/2)`.
    #[must_use]
    pub fn envelope(&self) -> f64 {
        self.envelope
    }

    /// Sampling window.
    #[must_use]
    pub fn window(&self) -> SamplingWindow {
        self.window
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    /// Draws one accepted kinetic energy, strictly inside the window.
    ///
    /// # Errors
    /// [`SamplingError::Stall`] if `max_attempts` candidates in a row are
    /// rejected, [`SamplingError::DeadlineExceeded`] once the deadline passed.
    pub fn sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<f64, SamplingError> {
        let target = self.stats.accepted + 1;
        self.draw(rng, target)
    }

    /// Draws `count` accepted energies and hands each one to `sink`.
    ///
    /// # Errors
    /// Same as [`RejectionSampler::sample`]; the deadline error reports how
    /// many of the `count` events were produced.
    pub fn sample_into<R, F>(
        &mut self,
        rng: &mut R,
        count: u64,
        mut sink: F,
    ) -> Result<(), SamplingError>
    where
        R: Rng + ?Sized,
        F: FnMut(&mut R, f64),
    {
        let start = self.stats.accepted;
        for _ in 0..count {
            let value = self.draw(rng, count).map_err(|err| match err {
                SamplingError::DeadlineExceeded { .. } => SamplingError::DeadlineExceeded {
                    accepted: self.stats.accepted - start,
                    target: count,
                },
                other => other,
            })?;
            sink(&mut *rng, value);
        }
        Ok(())
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R, target: u64) -> Result<f64, SamplingError> {
        let lower = self.window.lower();
        let upper = self.window.upper();

        for attempt in 0..self.config.max_attempts {
            if attempt % DEADLINE_CHECK_INTERVAL == 0 {
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        return Err(SamplingError::DeadlineExceeded {
                            accepted: self.stats.accepted,
                            target,
                        });
                    }
                }
            }

            self.stats.attempts += 1;
            let energy: f64 = rng.gen_range(lower..upper);
            if energy <= lower {
                continue;
            }
            let density = self.model.density(energy);
            let ratio = density / self.envelope;
            self.stats.max_density = self.stats.max_density.max(density);
            self.stats.max_ratio = self.stats.max_ratio.max(ratio);

            let u: f64 = rng.gen();
            if density > 0.0 && u <= ratio {
                self.stats.accepted += 1;
                return Ok(energy);
            }
        }

        Err(SamplingError::Stall {
            attempts: self.config.max_attempts,
            envelope_scale: self.config.envelope_scale,
            lower,
            upper,
            envelope: self.envelope,
            max_density_seen: self.stats.max_density,
        })
    }
}
