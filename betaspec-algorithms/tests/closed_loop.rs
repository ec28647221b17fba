//! Generate, store, reload and fit: the full analysis chain on sampled data.

use betaspec_algorithms::{
    fit_spectrum, generate_spectra, FitOptions, FitStatus, GenerationConfig,
    SMEARED_SPECTRUM_NAME, TRUE_SPECTRUM_NAME,
};
use betaspec_core::{PhysicalParameters, SamplingWindow, SpectrumModel};
use betaspec_io::{read_spectrum, write_spectra};
use tempfile::tempdir;

const Q: f64 = 18_590.0;

#[test]
fn test_sampled_spectra_fit_after_reload() {
    let model = SpectrumModel::new(&PhysicalParameters::default()).unwrap();
    let window = SamplingWindow::new(Q - 25.0, Q).unwrap();
    let config = GenerationConfig::default()
        .with_event_count(50_000)
        .with_seed(3)
        .with_workers(2);
    let spectra = generate_spectra(&model, window, &config).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("run.json");
    write_spectra(&path, &spectra.named()).unwrap();

    let options = FitOptions::for_endpoint(Q);
    for (name, generated) in spectra.named() {
        let reloaded = read_spectrum(&path, name).unwrap();
        assert_eq!(&reloaded, generated, "{name} changed on reload");

        let result = fit_spectrum(&reloaded, &model, &options).unwrap();
        let mass = result.neutrino_mass;
        assert!(
            matches!(result.status, FitStatus::Converged | FitStatus::AtBound),
            "{name}: {}",
            result.status
        );
        assert!(result.bins_used > 80, "{name}: {} bins", result.bins_used);
        assert!((0.0..=1.0).contains(&mass.value), "{name}: m = {}", mass.value);
        assert!(
            mass.error.is_finite() && mass.error > 0.0,
            "{name}: m error {}",
            mass.error
        );
        assert!(result.scale.error.is_finite() && result.scale.error > 0.0);

        // The unsmeared model only describes the true spectrum.
        if name == TRUE_SPECTRUM_NAME {
            assert!((result.scale.value - 1.0).abs() < 0.05, "s = {}", result.scale.value);
            let per_ndf = result.chi_square_per_ndf().unwrap();
            assert!(per_ndf < 3.0, "chi2/ndf = {per_ndf}");
        }
    }
    assert_eq!(
        spectra.named().map(|(name, _)| name),
        [TRUE_SPECTRUM_NAME, SMEARED_SPECTRUM_NAME]
    );
}
