#![allow(clippy::float_cmp)]
use betaspec_core::Histogram;
use betaspec_io::{list_spectra, read_spectra, read_spectrum, write_spectra, ContainerFormat, Error};
use tempfile::tempdir;

fn spectra() -> (Histogram, Histogram) {
    let mut truth = Histogram::new(18_565.0, 18_590.0, 100).unwrap();
    let mut smeared = Histogram::new(18_565.0, 18_590.0, 100).unwrap();
    // Values with long decimal expansions exercise float round-tripping.
    for i in 0..500_u32 {
        let value = 18_565.0 + 25.0 * f64::from(i) / 501.0 + 1.0 / 3.0;
        truth.fill(value);
        smeared.fill_weighted(value - 0.1, 1.0 / 7.0);
    }
    smeared.fill(10.0);
    smeared.fill(20_000.0);
    (truth, smeared)
}

#[test]
fn test_json_roundtrip_is_bit_identical() {
    let dir = tempdir().unwrap();
    let path = ContainerFormat::Json.container_path(dir.path().join("run"));
    let (truth, smeared) = spectra();

    write_spectra(&path, &[("E_e", &truth), ("E_e_sm", &smeared)]).unwrap();

    let loaded = read_spectrum(&path, "E_e_sm").unwrap();
    for (a, b) in loaded.contents().iter().zip(smeared.contents()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    assert_eq!(loaded, smeared);
    assert_eq!(loaded.underflow(), 1.0);
    assert_eq!(loaded.overflow(), 1.0);
    assert_eq!(read_spectrum(&path, "E_e").unwrap(), truth);
}

#[test]
fn test_json_preserves_order_and_names() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.json");
    let (truth, smeared) = spectra();

    write_spectra(&path, &[("E_e_sm", &smeared), ("E_e", &truth)]).unwrap();

    assert_eq!(list_spectra(&path).unwrap(), vec!["E_e_sm", "E_e"]);
    let all = read_spectra(&path).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].0, "E_e");
    assert_eq!(all[1].1, truth);
}

#[test]
fn test_missing_name_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.json");
    let (truth, _) = spectra();
    write_spectra(&path, &[("E_e", &truth)]).unwrap();

    match read_spectrum(&path, "E_e_sm") {
        Err(Error::MissingHistogram { name, .. }) => assert_eq!(name, "E_e_sm"),
        other => panic!("expected missing histogram, got {other:?}"),
    }
}

#[test]
fn test_unreadable_container_is_an_error() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert!(matches!(read_spectrum(&missing, "E_e"), Err(Error::Io(_))));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, b"{ not json").unwrap();
    assert!(matches!(read_spectra(&garbage), Err(Error::Json(_))));

    let (truth, _) = spectra();
    assert!(matches!(
        write_spectra(dir.path().join("run.root"), &[("E_e", &truth)]),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_tampered_contents_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.json");
    let truth = Histogram::from_counts(0.0, 2.0, vec![1.0, 2.0]).unwrap();
    write_spectra(&path, &[("E_e", &truth)]).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut document: serde_json::Value = serde_json::from_str(&text).unwrap();
    document["histograms"][0]["contents"][1] = serde_json::json!(-4.0);
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

    assert!(matches!(read_spectrum(&path, "E_e"), Err(Error::CoreError(_))));
}

#[cfg(not(feature = "hdf5"))]
#[test]
fn test_hdf5_requires_feature() {
    let dir = tempdir().unwrap();
    let (truth, _) = spectra();
    assert!(!ContainerFormat::Hdf5.is_available());
    assert!(matches!(
        write_spectra(dir.path().join("run.h5"), &[("E_e", &truth)]),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[cfg(feature = "hdf5")]
#[test]
fn test_hdf5_roundtrip_through_container_api() {
    let dir = tempdir().unwrap();
    let path = ContainerFormat::Hdf5.container_path(dir.path().join("run"));
    let (truth, smeared) = spectra();

    write_spectra(&path, &[("E_e", &truth), ("E_e_sm", &smeared)]).unwrap();
    assert_eq!(read_spectrum(&path, "E_e").unwrap(), truth);
    assert_eq!(read_spectrum(&path, "E_e_sm").unwrap(), smeared);
}
