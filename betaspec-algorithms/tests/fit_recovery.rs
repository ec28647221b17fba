#![allow(clippy::float_cmp)]
use approx::assert_relative_eq;
use betaspec_algorithms::{fit_spectrum, FitOptions, FitParameter, FitStatus, FitWindow};
use betaspec_core::{Histogram, PhysicalParameters, SpectrumModel};

const Q: f64 = 18_590.0;
const EVENTS: f64 = 1.0e7;

fn tritium() -> SpectrumModel {
    SpectrumModel::new(&PhysicalParameters::default()).unwrap()
}

/// Expected bin contents of `EVENTS` decays with neutrino mass `mass` in the
/// last 25 eV.
fn noiseless_spectrum(model: &SpectrumModel, mass: f64) -> Histogram {
    noiseless_spectrum_squared(model, mass * mass)
}

fn noiseless_spectrum_squared(model: &SpectrumModel, mass_squared: f64) -> Histogram {
    let template = Histogram::new(Q - 25.0, Q, 100).unwrap();
    let density: Vec<f64> = (0..template.bins())
        .map(|bin| model.decay_density_mass_squared(template.bin_center(bin), mass_squared, 1.0))
        .collect();
    let total: f64 = density.iter().sum();
    let counts = density.iter().map(|value| EVENTS * value / total).collect();
    Histogram::from_counts(Q - 25.0, Q, counts).unwrap()
}

#[test]
fn test_recovers_neutrino_mass_from_noiseless_spectrum() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options = FitOptions::for_endpoint(Q)
        .with_neutrino_mass(FitParameter::free(0.3, 0.0, 1.0));

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert!(
        (result.neutrino_mass.value - 0.2).abs() < 0.05,
        "fitted m_nu = {}",
        result.neutrino_mass.value
    );
    assert!(result.chi_square < 1e-3, "chi2 = {}", result.chi_square);
    assert!(result.neutrino_mass.error.is_finite() && result.neutrino_mass.error > 0.0);
    assert_eq!(result.ndf, result.bins_used - 2);
}

#[test]
fn test_fixed_mass_is_returned_unchanged() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options = FitOptions::for_endpoint(Q)
        .with_neutrino_mass(FitParameter::fixed(0.2))
        .with_scale(FitParameter::free(0.5, 0.0, 10.0));

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert_eq!(result.neutrino_mass.value, 0.2);
    assert_eq!(result.neutrino_mass.error, 0.0);
    assert!(result.scale.value > 0.9 && result.scale.value < 1.1);
    assert!(result.scale.error > 0.0);
    assert_eq!(result.ndf, result.bins_used - 1);
}

#[test]
fn test_only_window_bins_are_used() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options = FitOptions::for_endpoint(Q).with_window(FitWindow::new(Q - 10.0, Q).unwrap());

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    // 40 bin centers in [Q - 10, Q]; the last one is empty for m_nu = 0.2.
    assert_eq!(result.bins_used, 39);
}

#[test]
fn test_sparse_histogram_reports_insufficient_data() {
    let model = tritium();
    let mut histogram = Histogram::new(Q - 25.0, Q, 100).unwrap();
    histogram.fill(Q - 12.0);
    histogram.fill(Q - 12.0);

    let result = fit_spectrum(&histogram, &model, &FitOptions::for_endpoint(Q)).unwrap();
    assert_eq!(result.status, FitStatus::InsufficientData);
    assert_eq!(result.bins_used, 1);
    assert_eq!(result.iterations, 0);
}

#[test]
fn test_window_outside_histogram_reports_insufficient_data() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options =
        FitOptions::for_endpoint(Q).with_window(FitWindow::new(10_000.0, 11_000.0).unwrap());

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.status, FitStatus::InsufficientData);
    assert_eq!(result.bins_used, 0);
    assert_eq!(result.chi_square_per_ndf(), None);
}

#[test]
fn test_bounds_excluding_minimum_are_flagged() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options = FitOptions::for_endpoint(Q)
        .with_neutrino_mass(FitParameter::free(0.35, 0.3, 0.37));

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.status, FitStatus::AtBound);
    assert_relative_eq!(result.neutrino_mass.value, 0.3, epsilon = 1e-9);
}

#[test]
fn test_fit_started_at_zero_mass_moves_off_it() {
    let model = tritium();
    let histogram = noiseless_spectrum(&model, 0.2);
    let options = FitOptions::for_endpoint(Q)
        .with_neutrino_mass(FitParameter::free(0.0, 0.0, 1.0));

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.status, FitStatus::Converged);
    assert_relative_eq!(result.neutrino_mass.value, 0.2, epsilon = 1e-3);
    assert_relative_eq!(result.neutrino_mass_squared.value, 0.04, epsilon = 1e-4);
    assert!(result.neutrino_mass.error.is_finite() && result.neutrino_mass.error > 0.0);
    assert!(result.neutrino_mass_squared.error.is_finite());
}

#[test]
fn test_minimum_below_zero_mass_is_flagged_at_bound() {
    let model = tritium();
    // Negative m^2: the best physical mass is 0 and the fit is pushed below it.
    let histogram = noiseless_spectrum_squared(&model, -0.1);

    for initial in [0.0, 0.2] {
        let options = FitOptions::for_endpoint(Q)
            .with_neutrino_mass(FitParameter::free(initial, 0.0, 1.0));
        let result = fit_spectrum(&histogram, &model, &options).unwrap();
        assert_eq!(result.status, FitStatus::AtBound, "start at {initial}");
        assert_relative_eq!(result.neutrino_mass.value, 0.0);
        assert!(result.neutrino_mass.error.is_finite() && result.neutrino_mass.error > 0.0);
    }
}

#[test]
fn test_flat_curvature_is_not_reported_as_converged() {
    let model = tritium();
    // Only the last 4 bins (centers within 1 eV of Q) are populated, and a
    // mass pinned at 1 eV predicts nothing there.
    let mut counts = vec![0.0; 100];
    for count in &mut counts[96..] {
        *count = 5.0;
    }
    let histogram = Histogram::from_counts(Q - 25.0, Q, counts).unwrap();
    let options = FitOptions::for_endpoint(Q)
        .with_neutrino_mass(FitParameter::free(1.0, 1.0, 1.0));

    let result = fit_spectrum(&histogram, &model, &options).unwrap();
    assert_eq!(result.bins_used, 4);
    assert_eq!(result.status, FitStatus::Singular);
    assert!(result.neutrino_mass.error.is_infinite());
}
