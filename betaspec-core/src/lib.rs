//! betaspec-core: Core types for the beta-decay spectrum toy Monte Carlo.
//!
//! This crate provides the physical configuration, the unnormalized decay
//! density with its Fermi Coulomb correction, the sampling window and the
//! fixed-binning 1D histogram shared by generation and analysis.
//!

pub mod config;
pub mod density;
pub mod error;
pub mod histogram;

pub use config::{
    CoulombNucleus, DecayCharge, EnergyUnit, Nucleus, PhysicalParameters, QValue, SamplingWindow,
    AMU_TO_EV, ELECTRON_MASS_EV, FINE_STRUCTURE,
};
pub use density::SpectrumModel;
pub use error::{Error, Result, SamplingError};
pub use histogram::{BinLookup, Histogram, HistogramParts};
