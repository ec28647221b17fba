//! Chi-square fit of the decay spectrum to a histogram.
//!
//! The free parameters are the neutrino mass `m` and a scale `s`. For every
//! bin whose center lies in the fit window the expected content is
//!
//! ```text
//! mu_i = s * total * w * N(c_i, m) / sum_j w * N(c_j, 0)
//! ```
//!
//! with `total` the observed content of the window, so `s` is close to 1 for
//! a well-described spectrum. The objective is Neyman's chi-square
//! `sum (y_i - mu_i)^2 / sumw2_i` over non-empty bins, minimised with
//! Levenberg-Marquardt under box bounds.
//!
//! `N` depends on the mass only through `m^2`, so the minimiser works in
//! `m^2` with bounds `[lower^2, upper^2]`. In `m` the gradient vanishes at
//! `m = 0`; in `m^2` it does not. Errors come from the inverse of `J^T W J`
//! in `(m^2, s)` at the minimum; the mass error is the upward shift
//! `sqrt(m^2 + sigma(m^2)) - m`.
#![allow(clippy::cast_precision_loss, clippy::doc_markdown)]

use betaspec_core::{Error, Histogram, Result, SpectrumModel};
use log::debug;

const MASS: usize = 0;
const SCALE: usize = 1;
const INITIAL_LAMBDA: f64 = 1.0e-3;
const MAX_LAMBDA: f64 = 1.0e12;
/// Outward pull, in conditional sigmas, above which a bound is binding.
const BOUND_PULL: f64 = 1.0e-3;

/// One fit parameter: a starting value, bounds, and whether it may move.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitParameter {
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
    pub fixed: bool,
}

impl FitParameter {
    /// Free parameter bounded to `[lower, upper]`.
    #[must_use]
    pub fn free(initial: f64, lower: f64, upper: f64) -> Self {
        Self {
            initial,
            lower,
            upper,
            fixed: false,
        }
    }

    /// Parameter held at `value`.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        Self {
            initial: value,
            lower: value,
            upper: value,
            fixed: true,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.initial.is_finite() {
            return Err(Error::ConfigError(format!(
                "{name}: initial value must be finite, got {}",
                self.initial
            )));
        }
        if self.fixed {
            return Ok(());
        }
        if self.lower.is_nan() || self.upper.is_nan() || self.lower > self.upper {
            return Err(Error::ConfigError(format!(
                "{name}: invalid bounds [{}, {}]",
                self.lower, self.upper
            )));
        }
        if self.initial < self.lower || self.initial > self.upper {
            return Err(Error::ConfigError(format!(
                "{name}: initial value {} outside bounds [{}, {}]",
                self.initial, self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Energy interval whose bin centers take part in the fit.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitWindow {
    pub min: f64,
    pub max: f64,
}

impl FitWindow {
    /// Creates a window, requiring `min < max`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidWindow`] for reversed or non-finite bounds.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let window = Self { min, max };
        window.validate()?;
        Ok(window)
    }

    /// Last `width` eV below the endpoint `q`.
    ///
    /// # Errors
    /// Same as [`FitWindow::new`].
    pub fn below_endpoint(q: f64, width: f64) -> Result<Self> {
        Self::new(q - width, q)
    }

    /// True if `min <= value <= max`.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min >= self.max {
            return Err(Error::InvalidWindow {
                lower: self.min,
                upper: self.max,
            });
        }
        Ok(())
    }
}

/// Fit settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitOptions {
    pub neutrino_mass: FitParameter,
    pub scale: FitParameter,
    pub window: FitWindow,
    pub max_iterations: usize,
    /// Relative chi-square change below which the fit has converged.
    pub tolerance: f64,
}

impl FitOptions {
    /// Default options for an endpoint `q`: free mass starting at 0.2 eV in
    /// `[0, 1]`, free scale starting at 1, window `[q - 25, q]`.
    #[must_use]
    pub fn for_endpoint(q: f64) -> Self {
        Self {
            neutrino_mass: FitParameter::free(0.2, 0.0, 1.0),
            scale: FitParameter::free(1.0, 0.0, f64::INFINITY),
            window: FitWindow {
                min: q - 25.0,
                max: q,
            },
            max_iterations: 500,
            tolerance: 1.0e-10,
        }
    }

    #[must_use]
    pub fn with_neutrino_mass(mut self, parameter: FitParameter) -> Self {
        self.neutrino_mass = parameter;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, parameter: FitParameter) -> Self {
        self.scale = parameter;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: FitWindow) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.neutrino_mass.validate("neutrino_mass")?;
        self.scale.validate("scale")?;
        if !self.neutrino_mass.fixed && self.neutrino_mass.lower < 0.0 {
            return Err(Error::ConfigError(
                "neutrino_mass: lower bound must be non-negative".to_string(),
            ));
        }
        if self.neutrino_mass.fixed && self.neutrino_mass.initial < 0.0 {
            return Err(Error::ConfigError(
                "neutrino_mass: fixed value must be non-negative".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(Error::ConfigError(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::ConfigError(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Outcome of a fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FitStatus {
    Converged,
    /// A free parameter ended on a bound with the minimum beyond it.
    AtBound,
    IterationLimit,
    /// Not more populated bins in the window than free parameters.
    InsufficientData,
    /// The objective became non-finite.
    Diverged,
    /// The curvature matrix is singular; some free parameter has no error.
    Singular,
}

impl FitStatus {
    /// True for [`FitStatus::Converged`].
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Converged
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Converged => "converged",
            Self::AtBound => "parameter at bound",
            Self::IterationLimit => "iteration limit reached",
            Self::InsufficientData => "insufficient data",
            Self::Diverged => "diverged",
            Self::Singular => "singular curvature",
        };
        f.write_str(text)
    }
}

/// Fitted value and 1-sigma error; fixed parameters have error 0.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterEstimate {
    pub value: f64,
    pub error: f64,
}

/// Fit result.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitResult {
    pub neutrino_mass: ParameterEstimate,
    /// The parameter actually fitted, in eV^2.
    pub neutrino_mass_squared: ParameterEstimate,
    pub scale: ParameterEstimate,
    pub chi_square: f64,
    /// Bins used minus free parameters.
    pub ndf: usize,
    pub bins_used: usize,
    pub iterations: usize,
    pub status: FitStatus,
}

impl FitResult {
    /// `chi_square / ndf`, if `ndf > 0`.
    #[must_use]
    pub fn chi_square_per_ndf(&self) -> Option<f64> {
        (self.ndf > 0).then(|| self.chi_square / self.ndf as f64)
    }
}

/// Bins entering the fit.
struct FitData<'a> {
    model: &'a SpectrumModel,
    centers: Vec<f64>,
    values: Vec<f64>,
    variances: Vec<f64>,
    /// `total * w / sum_j w * N(c_j, 0)`.
    normalization: f64,
}

impl<'a> FitData<'a> {
    fn new(histogram: &Histogram, model: &'a SpectrumModel, window: FitWindow) -> Self {
        let width = histogram.bin_width();
        let mut centers = Vec::new();
        let mut values = Vec::new();
        let mut variances = Vec::new();
        let mut total = 0.0;
        let mut reference = 0.0;

        for bin in 0..histogram.bins() {
            let center = histogram.bin_center(bin);
            if !window.contains(center) {
                continue;
            }
            let value = histogram.content(bin);
            total += value;
            reference += width * model.decay_density(center, 0.0, 1.0);
            let variance = histogram.sumw2()[bin];
            if variance > 0.0 {
                centers.push(center);
                values.push(value);
                variances.push(variance);
            }
        }

        let normalization = if reference > 0.0 {
            total * width / reference
        } else {
            0.0
        };
        Self {
            model,
            centers,
            values,
            variances,
            normalization,
        }
    }

    fn len(&self) -> usize {
        self.centers.len()
    }

    /// Expected content without the scale factor.
    fn shape(&self, index: usize, mass_squared: f64) -> f64 {
        self.normalization
            * self
                .model
                .decay_density_mass_squared(self.centers[index], mass_squared, 1.0)
    }

    fn chi_square(&self, params: [f64; 2]) -> f64 {
        (0..self.len())
            .map(|i| {
                let residual = self.values[i] - params[SCALE] * self.shape(i, params[MASS]);
                residual * residual / self.variances[i]
            })
            .sum()
    }

    /// Residual and gradient in `(m^2, s)` of the expected content at `index`.
    fn linearize(&self, index: usize, params: [f64; 2]) -> (f64, [f64; 2]) {
        let shape = self.shape(index, params[MASS]);
        let expected = params[SCALE] * shape;
        let distance = self.model.q_value() - self.centers[index];
        let phase_space = distance * distance - params[MASS];
        let d_mass_squared = if phase_space > 0.0 && shape > 0.0 {
            -0.5 * expected / phase_space
        } else {
            0.0
        };
        (self.values[index] - expected, [d_mass_squared, shape])
    }

    /// `J^T W J` and `J^T W r` restricted to the free parameters.
    fn normal_equations(&self, params: [f64; 2], free: &[usize]) -> ([[f64; 2]; 2], [f64; 2]) {
        let mut jtj = [[0.0; 2]; 2];
        let mut jtr = [0.0; 2];
        for i in 0..self.len() {
            let (residual, gradient) = self.linearize(i, params);
            let weight = 1.0 / self.variances[i];
            for (row, &p) in free.iter().enumerate() {
                jtr[row] += weight * gradient[p] * residual;
                for (col, &q) in free.iter().enumerate() {
                    jtj[row][col] += weight * gradient[p] * gradient[q];
                }
            }
        }
        (jtj, jtr)
    }

    /// Marquardt step for the `active` parameters; `None` if singular.
    fn damped_step(&self, params: [f64; 2], active: &[usize], lambda: f64) -> Option<[f64; 2]> {
        let (mut jtj, jtr) = self.normal_equations(params, active);
        for (k, row) in jtj.iter_mut().enumerate().take(active.len()) {
            row[k] *= 1.0 + lambda;
        }
        solve(jtj, jtr, active.len())
    }
}

/// True if `value` sits on a bound and `step` points out of the box.
fn is_pinned(value: f64, parameter: &FitParameter, step: f64) -> bool {
    (value <= parameter.lower && step < 0.0) || (value >= parameter.upper && step > 0.0)
}

/// Solves the `n x n` (n <= 2) system; `None` if singular.
fn solve(matrix: [[f64; 2]; 2], rhs: [f64; 2], n: usize) -> Option<[f64; 2]> {
    match n {
        0 => Some([0.0; 2]),
        1 => (matrix[0][0] > 0.0).then(|| [rhs[0] / matrix[0][0], 0.0]),
        _ => {
            let det = matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0];
            if !det.is_normal() {
                return None;
            }
            Some([
                (rhs[0] * matrix[1][1] - matrix[0][1] * rhs[1]) / det,
                (matrix[0][0] * rhs[1] - matrix[1][0] * rhs[0]) / det,
            ])
        }
    }
}

/// Diagonal of the inverse of an `n x n` (n <= 2) matrix; infinite if singular.
fn inverse_diagonal(matrix: [[f64; 2]; 2], n: usize) -> [f64; 2] {
    match n {
        0 => [0.0; 2],
        1 if matrix[0][0] > 0.0 => [1.0 / matrix[0][0], 0.0],
        1 => [f64::INFINITY, 0.0],
        _ => {
            let det = matrix[0][0] * matrix[1][1] - matrix[0][1] * matrix[1][0];
            if det.is_normal() && det > 0.0 {
                [matrix[1][1] / det, matrix[0][0] / det]
            } else {
                [f64::INFINITY; 2]
            }
        }
    }
}

/// Parameters in minimiser coordinates: mass bounds squared.
fn bounds(options: &FitOptions) -> [FitParameter; 2] {
    let mass = options.neutrino_mass;
    let squared = FitParameter {
        initial: mass.initial * mass.initial,
        lower: mass.lower * mass.lower,
        upper: mass.upper * mass.upper,
        fixed: mass.fixed,
    };
    [squared, options.scale]
}

/// Mass and its upward 1-sigma shift from an `m^2` estimate.
fn mass_from_squared(squared: ParameterEstimate) -> ParameterEstimate {
    let value = squared.value.max(0.0).sqrt();
    ParameterEstimate {
        value,
        error: (squared.value.max(0.0) + squared.error).sqrt() - value,
    }
}

/// Fits `histogram` with the decay spectrum of `model`.
///
/// Only `model`'s endpoint and constants are used; its configured neutrino
/// mass plays no role. Fit failures are reported through
/// [`FitResult::status`].
///
/// # Errors
/// Returns an error only for invalid `options`.
pub fn fit_spectrum(
    histogram: &Histogram,
    model: &SpectrumModel,
    options: &FitOptions,
) -> Result<FitResult> {
    options.validate()?;
    let parameters = bounds(options);
    let free: Vec<usize> = (0..2).filter(|&p| !parameters[p].fixed).collect();
    let data = FitData::new(histogram, model, options.window);
    let mut params = [parameters[MASS].initial, parameters[SCALE].initial];

    let result = |params: [f64; 2], chi_square: f64, iterations: usize, status: FitStatus| {
        let (jtj, _) = data.normal_equations(params, &free);
        let variances = inverse_diagonal(jtj, free.len());
        let mut errors = [0.0; 2];
        for (slot, &p) in free.iter().enumerate() {
            errors[p] = variances[slot].sqrt();
        }
        let mass_squared = ParameterEstimate {
            value: params[MASS],
            error: errors[MASS],
        };
        let neutrino_mass = if parameters[MASS].fixed {
            ParameterEstimate {
                value: options.neutrino_mass.initial,
                error: 0.0,
            }
        } else {
            mass_from_squared(mass_squared)
        };
        FitResult {
            neutrino_mass,
            neutrino_mass_squared: mass_squared,
            scale: ParameterEstimate {
                value: params[SCALE],
                error: errors[SCALE],
            },
            chi_square,
            ndf: data.len().saturating_sub(free.len()),
            bins_used: data.len(),
            iterations,
            status,
        }
    };

    if data.len() <= free.len() || data.normalization <= 0.0 {
        debug!(
            "fit skipped: {} populated bins for {} free parameters",
            data.len(),
            free.len()
        );
        let chi_square = if data.normalization > 0.0 {
            data.chi_square(params)
        } else {
            f64::NAN
        };
        return Ok(result(params, chi_square, 0, FitStatus::InsufficientData));
    }

    let mut chi_square = data.chi_square(params);
    if !chi_square.is_finite() {
        return Ok(result(params, chi_square, 0, FitStatus::Diverged));
    }
    if free.is_empty() {
        return Ok(result(params, chi_square, 0, FitStatus::Converged));
    }

    let mut lambda = INITIAL_LAMBDA;
    let mut status = FitStatus::IterationLimit;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;
        // Parameters pinned on a bound by the full step are held for this one.
        let mut active = free.clone();
        let mut step = data.damped_step(params, &active, lambda);
        if let Some(full) = step {
            let unpinned: Vec<usize> = active
                .iter()
                .enumerate()
                .filter(|&(slot, &p)| !is_pinned(params[p], &parameters[p], full[slot]))
                .map(|(_, &p)| p)
                .collect();
            if unpinned.is_empty() {
                status = FitStatus::Converged;
                break;
            }
            if unpinned.len() < active.len() {
                active = unpinned;
                step = data.damped_step(params, &active, lambda);
            }
        }
        let Some(step) = step else {
            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                status = FitStatus::Singular;
                break;
            }
            continue;
        };

        let mut trial = params;
        for (slot, &p) in active.iter().enumerate() {
            trial[p] = (params[p] + step[slot]).clamp(parameters[p].lower, parameters[p].upper);
        }
        let trial_chi_square = data.chi_square(trial);
        if !trial_chi_square.is_finite() {
            status = FitStatus::Diverged;
            break;
        }

        if trial_chi_square < chi_square {
            let improvement = chi_square - trial_chi_square;
            params = trial;
            chi_square = trial_chi_square;
            lambda = (lambda * 0.5).max(f64::MIN_POSITIVE);
            // Small gains under heavy damping only mean the step was short.
            if lambda <= INITIAL_LAMBDA && improvement <= options.tolerance * chi_square.max(1.0)
            {
                status = FitStatus::Converged;
                break;
            }
        } else {
            lambda *= 2.0;
            if lambda > MAX_LAMBDA {
                status = FitStatus::Converged;
                break;
            }
        }
    }

    if status == FitStatus::Converged && pushes_past_bound(&data, params, &parameters, &free) {
        status = FitStatus::AtBound;
    }
    let mut fitted = result(params, chi_square, iterations, status);
    let errors_finite = free.iter().all(|&p| match p {
        MASS => fitted.neutrino_mass_squared.error.is_finite(),
        _ => fitted.scale.error.is_finite(),
    });
    if fitted.status == FitStatus::Converged && !errors_finite {
        fitted.status = FitStatus::Singular;
    }
    debug!(
        "fit {} after {iterations} iterations: m^2 = {}, s = {}, chi2 = {chi_square}",
        fitted.status, params[MASS], params[SCALE]
    );
    Ok(fitted)
}

/// True if a free parameter sits on a bound and chi-square still descends
/// out of the box along it.
///
/// `J^T W r` is half the descent direction of chi-square; divided by the
/// square root of the curvature it is the pull in units of that parameter's
/// conditional error.
fn pushes_past_bound(
    data: &FitData<'_>,
    params: [f64; 2],
    parameters: &[FitParameter; 2],
    free: &[usize],
) -> bool {
    let (jtj, jtr) = data.normal_equations(params, free);
    free.iter().enumerate().any(|(slot, &p)| {
        let range = (parameters[p].upper - parameters[p].lower).abs();
        let tolerance = if range.is_finite() {
            1e-9 * range.max(1e-12)
        } else {
            1e-12
        };
        let at_lower = (params[p] - parameters[p].lower).abs() <= tolerance;
        let at_upper = (params[p] - parameters[p].upper).abs() <= tolerance;
        let curvature = jtj[slot][slot];
        let pull = if curvature > 0.0 {
            jtr[slot] / curvature.sqrt()
        } else {
            jtr[slot]
        };
        (at_lower && pull < -BOUND_PULL) || (at_upper && pull > BOUND_PULL)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_rejects_reversed_bounds() {
        assert!(FitWindow::new(18_589.8, 18_565.0).is_err());
        assert!(FitWindow::new(18_565.0, 18_565.0).is_err());
        let window = FitWindow::below_endpoint(18_590.0, 25.0).unwrap();
        assert!(window.contains(18_565.0));
        assert!(!window.contains(18_590.1));
    }

    #[test]
    fn test_options_validation() {
        let base = FitOptions::for_endpoint(18_590.0);
        assert!(base.validate().is_ok());
        assert!(base
            .clone()
            .with_neutrino_mass(FitParameter::free(2.0, 0.0, 1.0))
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_neutrino_mass(FitParameter::free(0.2, -1.0, 1.0))
            .validate()
            .is_err());
        assert!(base.clone().with_max_iterations(0).validate().is_err());
        assert!(base
            .with_neutrino_mass(FitParameter::fixed(0.5))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_solve_two_by_two() {
        let x = solve([[2.0, 1.0], [1.0, 3.0]], [3.0, 5.0], 2).unwrap();
        assert_relative_eq!(x[0], 0.8, max_relative = 1e-12);
        assert_relative_eq!(x[1], 1.4, max_relative = 1e-12);
        assert!(solve([[1.0, 2.0], [2.0, 4.0]], [1.0, 1.0], 2).is_none());
        let diag = inverse_diagonal([[4.0, 0.0], [0.0, 0.25]], 2);
        assert_relative_eq!(diag[0], 0.25);
        assert_relative_eq!(diag[1], 4.0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(FitStatus::Converged.to_string(), "converged");
        assert_eq!(FitStatus::Singular.to_string(), "singular curvature");
        assert!(FitStatus::Converged.is_success());
        assert!(!FitStatus::InsufficientData.is_success());
        assert!(!FitStatus::Singular.is_success());
    }

    #[test]
    fn test_mass_error_from_squared_mass() {
        let interior = mass_from_squared(ParameterEstimate {
            value: 0.04,
            error: 0.02,
        });
        assert_relative_eq!(interior.value, 0.2, max_relative = 1e-12);
        assert_relative_eq!(interior.error, 0.06f64.sqrt() - 0.2, max_relative = 1e-12);

        // At m^2 = 0 the error stays finite.
        let at_zero = mass_from_squared(ParameterEstimate {
            value: 0.0,
            error: 0.01,
        });
        assert_relative_eq!(at_zero.value, 0.0);
        assert_relative_eq!(at_zero.error, 0.1, max_relative = 1e-12);
    }

    #[test]
    fn test_mass_bounds_are_squared() {
        let options = FitOptions::for_endpoint(18_590.0)
            .with_neutrino_mass(FitParameter::free(0.5, 0.1, 2.0));
        let [mass, scale] = bounds(&options);
        assert_relative_eq!(mass.initial, 0.25);
        assert_relative_eq!(mass.lower, 0.01, max_relative = 1e-12);
        assert_relative_eq!(mass.upper, 4.0);
        assert!(!mass.fixed);
        assert_eq!(scale, options.scale);
    }
}
