//! Fits a set of named spectra with shared options.

use crate::fit::{fit_spectrum, FitOptions, FitResult};
use betaspec_core::{Histogram, Result, SpectrumModel};
use log::{info, warn};
use rayon::prelude::*;

/// Fit outcome for one named spectrum.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpectrumFit {
    pub name: String,
    pub entries: u64,
    pub result: FitResult,
}

/// Fits every `(name, histogram)` pair; output keeps the input order.
///
/// # Errors
/// Returns an error only for invalid `options`.
pub fn analyze_spectra(
    spectra: &[(String, Histogram)],
    model: &SpectrumModel,
    options: &FitOptions,
) -> Result<Vec<SpectrumFit>> {
    let fits = spectra
        .par_iter()
        .map(|(name, histogram)| {
            fit_spectrum(histogram, model, options).map(|result| SpectrumFit {
                name: name.clone(),
                entries: histogram.entries(),
                result,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for fit in &fits {
        let result = &fit.result;
        if result.status.is_success() {
            info!(
                "{}: m_nu = {:.4} +/- {:.4} eV, chi2/ndf = {:.3}/{}",
                fit.name,
                result.neutrino_mass.value,
                result.neutrino_mass.error,
                result.chi_square,
                result.ndf
            );
        } else {
            warn!("{}: fit {}", fit.name, result.status);
        }
    }
    Ok(fits)
}
