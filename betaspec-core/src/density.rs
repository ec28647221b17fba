//! Unnormalized beta-decay spectrum and Fermi Coulomb correction.
//!
//! `N(T) = C * p * E * (Q - T) * sqrt((Q - T)^2 - m_nu^2) * F(Z, T)` with
//! `p = sqrt(T^2 + 2 T m_e)` and `E = T + m_e`, everything in eV.
#![allow(clippy::doc_markdown)]

use crate::config::{DecayCharge, EnergyUnit, PhysicalParameters};
use crate::{Error, Result};
use std::f64::consts::PI;

/// Below this |2 pi eta| the Fermi factor uses its Taylor expansion.
const SERIES_THRESHOLD: f64 = 1.0e-6;

/// Immutable density model built once per run from [`PhysicalParameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumModel {
    q_value: f64,
    electron_mass: f64,
    neutrino_mass: f64,
    fine_structure: f64,
    coulomb_z: f64,
    charge: DecayCharge,
    unit: EnergyUnit,
}

impl SpectrumModel {
    /// Validates the parameters and converts every energy to eV.
    ///
    /// # Errors
    /// Returns an error for a charge other than +/-1, a non-positive Q, or
    /// non-physical masses / coupling.
    pub fn new(params: &PhysicalParameters) -> Result<Self> {
        let charge = params.decay_charge()?;
        let q_value = params.q_value_ev()?;
        let electron_mass = params.unit.to_ev(params.electron_mass);
        let neutrino_mass = params.unit.to_ev(params.neutrino_mass);

        if !(electron_mass.is_finite() && electron_mass > 0.0) {
            return Err(Error::ConfigError(format!(
                "electron mass must be positive, got {electron_mass} eV"
            )));
        }
        if !(neutrino_mass.is_finite() && neutrino_mass >= 0.0) {
            return Err(Error::ConfigError(format!(
                "neutrino mass must be non-negative, got {neutrino_mass} eV"
            )));
        }
        if neutrino_mass >= q_value {
            return Err(Error::ConfigError(format!(
                "neutrino mass {neutrino_mass} eV leaves no phase space below Q = {q_value} eV"
            )));
        }
        if !(params.fine_structure.is_finite() && params.fine_structure > 0.0) {
            return Err(Error::ConfigError(format!(
                "fine-structure constant must be positive, got {}",
                params.fine_structure
            )));
        }

        Ok(Self {
            q_value,
            electron_mass,
            neutrino_mass,
            fine_structure: params.fine_structure,
            coulomb_z: f64::from(params.coulomb_z()),
            charge,
            unit: params.unit,
        })
    }

    /// Endpoint energy Q (eV).
    #[must_use]
    pub fn q_value(&self) -> f64 {
        self.q_value
    }

    /// Electron rest mass (eV).
    #[must_use]
    pub fn electron_mass(&self) -> f64 {
        self.electron_mass
    }

    /// Neutrino mass used for generation (eV).
    #[must_use]
    pub fn neutrino_mass(&self) -> f64 {
        self.neutrino_mass
    }

    /// Decay charge.
    #[must_use]
    pub fn charge(&self) -> DecayCharge {
        self.charge
    }

    /// Unit the model was configured in.
    #[must_use]
    pub fn unit(&self) -> EnergyUnit {
        self.unit
    }

    /// Highest kinetic energy allowed for a given neutrino mass.
    #[must_use]
    pub fn kinematic_endpoint(&self, neutrino_mass: f64) -> f64 {
        self.q_value - neutrino_mass.abs()
    }

    /// Coulomb parameter `eta = (T + m_e) * charge * alpha * Z / sqrt(2 T m_e)`.
    ///
    /// `None` for `T <= 0` (or NaN), where the square root has no meaning.
    #[must_use]
    pub fn coulomb_eta(&self, kinetic_energy: f64) -> Option<f64> {
        if !(kinetic_energy > 0.0 && kinetic_energy.is_finite()) {
            return None;
        }
        let momentum_scale = (2.0 * kinetic_energy * self.electron_mass).sqrt();
        Some(
            (kinetic_energy + self.electron_mass)
                * self.charge.sign()
                * self.fine_structure
                * self.coulomb_z
                / momentum_scale,
        )
    }

    /// Fermi function `2 pi eta / (1 - exp(-2 pi eta))`.
    ///
    /// `None` for `T <= 0`. Finite for every positive `T`: the removable
    /// singularity at `eta = 0` goes through the series `1 + x/2 + x^2/12`, and
    /// large `|eta|` saturate to `0` (attractive limit of this sign convention)
    /// or to `2 pi eta`.
    #[must_use]
    pub fn fermi_factor(&self, kinetic_energy: f64) -> Option<f64> {
        self.coulomb_eta(kinetic_energy)
            .map(|eta| fermi_from_x(2.0 * PI * eta))
    }

    /// Unnormalized decay rate `dGamma/dT` at `kinetic_energy` (eV).
    ///
    /// Returns exactly `0.0` outside the kinematic domain: `T <= 0`, `T >= Q`,
    /// or `(Q - T)^2 < m_nu^2`.
    #[must_use]
    pub fn decay_density(&self, kinetic_energy: f64, neutrino_mass: f64, scale: f64) -> f64 {
        self.decay_density_mass_squared(kinetic_energy, neutrino_mass * neutrino_mass, scale)
    }

    /// [`SpectrumModel::decay_density`] parameterized by `m_nu^2` (eV^2).
    ///
    /// The spectrum depends on the mass only through its square, and is
    /// smooth in it. A negative `m_nu^2` is accepted and widens the neutrino
    /// phase space past `Q - T`.
    #[must_use]
    pub fn decay_density_mass_squared(
        &self,
        kinetic_energy: f64,
        mass_squared: f64,
        scale: f64,
    ) -> f64 {
        let Some(fermi) = self.fermi_factor(kinetic_energy) else {
            return 0.0;
        };

        let residual = self.q_value - kinetic_energy;
        if residual <= 0.0 {
            return 0.0;
        }
        let neutrino_phase_space = residual * residual - mass_squared;
        if neutrino_phase_space < 0.0 {
            return 0.0;
        }

        let me = self.electron_mass;
        let momentum = (kinetic_energy * kinetic_energy + 2.0 * kinetic_energy * me).sqrt();
        let total_energy = kinetic_energy + me;
        let value =
            scale * momentum * total_energy * residual * neutrino_phase_space.sqrt() * fermi;

        if value.is_finite() {
            value
        } else {
            0.0
        }
    }

    /// Density at the configured neutrino mass with unit scale.
    #[must_use]
    pub fn density(&self, kinetic_energy: f64) -> f64 {
        self.decay_density(kinetic_energy, self.neutrino_mass, 1.0)
    }
}

/// `x / (1 - exp(-x))`, stable for small and large `|x|`.
fn fermi_from_x(x: f64) -> f64 {
    if x.abs() < SERIES_THRESHOLD {
        return 1.0 + 0.5 * x + x * x / 12.0;
    }
    // 1 - exp(-x) == -expm1(-x); expm1 overflows to +inf for very negative x,
    // which drives the ratio to +0.
    x / -(-x).exp_m1()
}
