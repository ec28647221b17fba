//! Physical configuration and sampling window types.
//!
//! Every energy stored in [`PhysicalParameters`] is expressed in its
//! [`EnergyUnit`]; [`SpectrumModel`](crate::SpectrumModel) converts them to eV
//! once at construction. [`SamplingWindow`] is always in eV.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Electron rest mass in eV.
pub const ELECTRON_MASS_EV: f64 = 0.510_998_910e6;

/// Fine-structure constant (rounded to 1/137).
pub const FINE_STRUCTURE: f64 = 1.0 / 137.0;

/// Energy equivalent of one atomic mass unit in eV.
pub const AMU_TO_EV: f64 = 931.494_095e6;

/// Unit in which configured energies are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EnergyUnit {
    /// Electron-volts.
    #[default]
    Ev,
    /// Kilo-electron-volts.
    Kev,
    /// Mega-electron-volts.
    Mev,
}

impl EnergyUnit {
    /// Number of eV in one unit.
    #[must_use]
    pub fn ev_per_unit(self) -> f64 {
        match self {
            Self::Ev => 1.0,
            Self::Kev => 1.0e3,
            Self::Mev => 1.0e6,
        }
    }

    /// Converts a value in this unit to eV.
    #[must_use]
    pub fn to_ev(self, value: f64) -> f64 {
        value * self.ev_per_unit()
    }

    /// Converts a value in eV to this unit.
    #[must_use]
    pub fn from_ev(self, value_ev: f64) -> f64 {
        value_ev / self.ev_per_unit()
    }

    /// Unit symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Ev => "eV",
            Self::Kev => "keV",
            Self::Mev => "MeV",
        }
    }
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for EnergyUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ev" => Ok(Self::Ev),
            "kev" => Ok(Self::Kev),
            "mev" => Ok(Self::Mev),
            other => Err(Error::ConfigError(format!("unknown energy unit '{other}'"))),
        }
    }
}

/// A nucleus taking part in the decay.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Nucleus {
    /// Atomic number Z.
    pub atomic_number: u32,
    /// Isotope mass in atomic mass units.
    pub mass_u: f64,
}

impl Nucleus {
    /// Creates a nucleus description.
    #[must_use]
    pub fn new(atomic_number: u32, mass_u: f64) -> Self {
        Self {
            atomic_number,
            mass_u,
        }
    }

    /// Tritium (3H).
    #[must_use]
    pub fn tritium() -> Self {
        Self::new(1, 3.016_049_2)
    }

    /// Helium-3.
    #[must_use]
    pub fn helium3() -> Self {
        Self::new(2, 3.016_029_3)
    }
}

/// Sign of the emitted lepton's charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayCharge {
    /// beta-minus: an electron is emitted.
    Electron,
    /// beta-plus: a positron is emitted.
    Positron,
}

impl DecayCharge {
    /// Validates an integer charge.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCharge`] for anything but -1 or +1.
    pub fn from_i32(charge: i32) -> Result<Self> {
        match charge {
            -1 => Ok(Self::Electron),
            1 => Ok(Self::Positron),
            other => Err(Error::InvalidCharge(other)),
        }
    }

    /// Charge sign as a float (-1.0 or +1.0).
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Electron => -1.0,
            Self::Positron => 1.0,
        }
    }
}

/// How the endpoint energy Q is obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "source", content = "value", rename_all = "snake_case")
)]
pub enum QValue {
    /// Literature value, in the configured unit.
    Direct(f64),
    /// Parent minus daughter isotope mass, converted with [`AMU_TO_EV`].
    MassDifference,
}

/// Which nucleus' atomic number enters the Coulomb parameter eta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CoulombNucleus {
    #[default]
    Parent,
    Daughter,
}

/// Physical constants for one run.
///
/// Energies (`electron_mass`, `neutrino_mass` and a direct Q) are in `unit`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PhysicalParameters {
    /// Decaying nucleus.
    pub parent: Nucleus,
    /// Daughter nucleus.
    pub daughter: Nucleus,
    /// Charge of the emitted lepton (-1 or +1).
    pub charge: i32,
    /// Endpoint energy source.
    pub q_value: QValue,
    /// Unit of every energy in this struct.
    pub unit: EnergyUnit,
    /// Electron rest mass.
    pub electron_mass: f64,
    /// Neutrino mass used when generating.
    pub neutrino_mass: f64,
    /// Fine-structure constant.
    pub fine_structure: f64,
    /// Nucleus whose Z enters the Fermi function.
    pub coulomb_nucleus: CoulombNucleus,
}

impl Default for PhysicalParameters {
    fn default() -> Self {
        Self {
            parent: Nucleus::tritium(),
            daughter: Nucleus::helium3(),
            charge: -1,
            q_value: QValue::Direct(18_590.0), // KATRIN endpoint
            unit: EnergyUnit::Ev,
            electron_mass: ELECTRON_MASS_EV,
            neutrino_mass: 0.2,
            fine_structure: FINE_STRUCTURE,
            coulomb_nucleus: CoulombNucleus::Parent,
        }
    }
}

impl PhysicalParameters {
    /// Tritium decay with the KATRIN endpoint (same as `default()`).
    #[must_use]
    pub fn tritium() -> Self {
        Self::default()
    }

    /// Sets parent and daughter nuclei.
    #[must_use]
    pub fn with_nuclei(mut self, parent: Nucleus, daughter: Nucleus) -> Self {
        self.parent = parent;
        self.daughter = daughter;
        self
    }

    /// Sets the decay charge.
    #[must_use]
    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = charge;
        self
    }

    /// Sets the endpoint source.
    #[must_use]
    pub fn with_q_value(mut self, q_value: QValue) -> Self {
        self.q_value = q_value;
        self
    }

    /// Sets the neutrino mass (in the current unit).
    #[must_use]
    pub fn with_neutrino_mass(mut self, mass: f64) -> Self {
        self.neutrino_mass = mass;
        self
    }

    /// Selects the nucleus used in the Fermi function.
    #[must_use]
    pub fn with_coulomb_nucleus(mut self, nucleus: CoulombNucleus) -> Self {
        self.coulomb_nucleus = nucleus;
        self
    }

    /// Re-expresses every stored energy in `unit`.
    ///
    /// The physics is unchanged; only the numbers written in the struct move.
    #[must_use]
    pub fn with_unit(mut self, unit: EnergyUnit) -> Self {
        let from = self.unit;
        let convert = |value: f64| unit.from_ev(from.to_ev(value));
        self.electron_mass = convert(self.electron_mass);
        self.neutrino_mass = convert(self.neutrino_mass);
        if let QValue::Direct(q) = self.q_value {
            self.q_value = QValue::Direct(convert(q));
        }
        self.unit = unit;
        self
    }

    /// Validated decay charge.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCharge`] if `charge` is not -1 or +1.
    pub fn decay_charge(&self) -> Result<DecayCharge> {
        DecayCharge::from_i32(self.charge)
    }

    /// Endpoint energy in eV.
    ///
    /// # Errors
    /// Returns [`Error::NonPositiveQValue`] if Q is not positive and finite.
    pub fn q_value_ev(&self) -> Result<f64> {
        let q = match self.q_value {
            QValue::Direct(value) => self.unit.to_ev(value),
            QValue::MassDifference => (self.parent.mass_u - self.daughter.mass_u) * AMU_TO_EV,
        };
        if q.is_finite() && q > 0.0 {
            Ok(q)
        } else {
            Err(Error::NonPositiveQValue(q))
        }
    }

    /// Atomic number used in the Coulomb parameter.
    #[must_use]
    pub fn coulomb_z(&self) -> u32 {
        match self.coulomb_nucleus {
            CoulombNucleus::Parent => self.parent.atomic_number,
            CoulombNucleus::Daughter => self.daughter.atomic_number,
        }
    }
}

/// Support `[lower, upper]` (eV) of the sampled energy distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingWindow {
    lower: f64,
    upper: f64,
}

impl SamplingWindow {
    /// Creates a window, checking `0 <= lower < upper`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWindow`] if the bounds are not ordered,
    /// negative or not finite.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower.is_finite() && upper.is_finite()) || lower < 0.0 || lower >= upper {
            return Err(Error::InvalidWindow { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Window `[fraction * q, q]`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWindow`] unless `0 <= fraction < 1`, and
    /// [`Error::NonPositiveQValue`] for a non-positive `q`.
    pub fn from_fraction(fraction: f64, q: f64) -> Result<Self> {
        if !(q.is_finite() && q > 0.0) {
            return Err(Error::NonPositiveQValue(q));
        }
        if !(0.0..1.0).contains(&fraction) {
            return Err(Error::InvalidWindow {
                lower: fraction * q,
                upper: q,
            });
        }
        Self::new(fraction * q, q)
    }

    /// Lower bound (eV).
    #[must_use]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper bound (eV).
    #[must_use]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Window width (eV).
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// True if `lower <= value <= upper`.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// True if `lower < value < upper`.
    #[must_use]
    pub fn contains_open(&self, value: f64) -> bool {
        value > self.lower && value < self.upper
    }
}
