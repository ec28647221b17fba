//! betaspec-algorithms: Monte Carlo generation and spectral fitting.
//!
//! - **Sampler** - von Neumann acceptance-rejection with a fixed envelope
//! - **Generation** - true and smeared spectra, serial or rayon-parallel
//! - **Fit** - bounded Levenberg-Marquardt chi-square fit of `(m_nu, scale)`
//!

mod analysis;
mod fit;
mod generation;
mod sampler;

pub use analysis::{analyze_spectra, SpectrumFit};
pub use fit::{
    fit_spectrum, FitOptions, FitParameter, FitResult, FitStatus, FitWindow, ParameterEstimate,
};
pub use generation::{
    generate_spectra, GeneratedSpectra, GenerationConfig, GenerationReport, SmearFilter,
    SMEARED_SPECTRUM_NAME, TRUE_SPECTRUM_NAME,
};
pub use sampler::{RejectionSampler, SamplerConfig, SamplerStats};
