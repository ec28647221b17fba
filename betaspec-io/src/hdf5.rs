//! HDF5/NeXus spectrum containers.
//!
//! Layout:
//! ```text
//! /                      betaspec_format_version
//! /entry                 NXentry
//! /entry/<name>          NXdata (signal = counts, axes = bin_edges)
//!     counts     f64[bins]
//!     sumw2      f64[bins]
//!     bin_edges  f64[bins + 1]   units = eV
//!     @lower @upper @underflow @overflow @entries
//! ```

use crate::container::{validate_names, FORMAT_VERSION};
use crate::{Error, Result};
use betaspec_core::{Histogram, HistogramParts};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::ArrayView1;
use std::path::Path;
use std::str::FromStr;

/// Writes named histograms to a new HDF5 file.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_spectra_hdf5<P: AsRef<Path>>(path: P, spectra: &[(&str, &Histogram)]) -> Result<()> {
    validate_names(spectra.iter().map(|(name, _)| *name))?;

    let file = File::create(path)?;
    set_attr_str_file(&file, "betaspec_format_version", FORMAT_VERSION)?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    set_attr_str_group(&entry, "energy_unit", "eV")?;

    for (name, histogram) in spectra {
        write_histogram_group(&entry, name, histogram)?;
    }
    Ok(())
}

/// Reads every histogram under `/entry`.
///
/// # Errors
/// Returns an error if HDF5 I/O fails or a group is malformed.
pub fn read_spectra_hdf5<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Histogram)>> {
    let file = File::open(path)?;
    let entry = open_entry(&file)?;
    entry
        .member_names()?
        .into_iter()
        .map(|name| {
            let group = entry.group(&name)?;
            read_histogram_group(&group).map(|histogram| (name, histogram))
        })
        .collect()
}

/// Reads the histogram `/entry/<name>`.
///
/// # Errors
/// Returns [`Error::MissingHistogram`] if there is no such group.
pub fn read_spectrum_hdf5<P: AsRef<Path>>(path: P, name: &str) -> Result<Histogram> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let entry = open_entry(&file)?;
    if name.is_empty() || name.contains('/') || !entry.link_exists(name) {
        return Err(Error::MissingHistogram {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }
    read_histogram_group(&entry.group(name)?)
}

/// Names of the histogram groups under `/entry`.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn list_spectra_hdf5<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let file = File::open(path)?;
    Ok(open_entry(&file)?.member_names()?)
}

fn open_entry(file: &File) -> Result<Group> {
    match read_attr_opt_string_file(file, "betaspec_format_version")? {
        Some(version) if version == FORMAT_VERSION => {}
        Some(version) => {
            return Err(Error::InvalidFormat(format!(
                "unsupported container version {version}"
            )))
        }
        None => {
            return Err(Error::InvalidFormat(
                "missing betaspec_format_version attribute".to_string(),
            ))
        }
    }
    Ok(file.group("entry")?)
}

fn write_histogram_group(entry: &Group, name: &str, histogram: &Histogram) -> Result<()> {
    let group = entry.create_group(name)?;
    set_attr_str_group(&group, "NX_class", "NXdata")?;
    set_attr_str_group(&group, "signal", "counts")?;
    set_attr_str_group(&group, "axes", "bin_edges")?;

    write_vec(&group, "counts", histogram.contents())?;
    write_vec(&group, "sumw2", histogram.sumw2())?;
    let edges = write_vec(&group, "bin_edges", &histogram.bin_edges())?;
    set_dataset_units(&edges, "eV")?;

    set_attr_scalar(&group, "lower", histogram.lower())?;
    set_attr_scalar(&group, "upper", histogram.upper())?;
    set_attr_scalar(&group, "underflow", histogram.underflow())?;
    set_attr_scalar(&group, "overflow", histogram.overflow())?;
    set_attr_scalar(&group, "entries", histogram.entries())?;
    Ok(())
}

fn read_histogram_group(group: &Group) -> Result<Histogram> {
    let contents = group.dataset("counts")?.read_raw::<f64>()?;
    let sumw2 = group.dataset("sumw2")?.read_raw::<f64>()?;
    let parts = HistogramParts {
        lower: read_attr::<f64>(group, "lower")?,
        upper: read_attr::<f64>(group, "upper")?,
        contents,
        sumw2,
        underflow: read_attr::<f64>(group, "underflow")?,
        overflow: read_attr::<f64>(group, "overflow")?,
        entries: read_attr::<u64>(group, "entries")?,
    };
    let bins = parts.contents.len();
    let histogram = Histogram::from_parts(parts)?;

    if let Ok(edges) = group.dataset("bin_edges") {
        if edges.size() != bins + 1 {
            return Err(Error::InvalidFormat(format!(
                "{}: {} bin edges for {bins} bins",
                group.name(),
                edges.size()
            )));
        }
    }
    Ok(histogram)
}

fn write_vec(group: &Group, name: &str, data: &[f64]) -> Result<Dataset> {
    let dataset = group.new_dataset::<f64>().shape((data.len(),)).create(name)?;
    dataset.write(ArrayView1::from(data))?;
    Ok(dataset)
}

fn set_attr_scalar<T: H5Type>(group: &Group, name: &str, value: T) -> Result<()> {
    group.new_attr::<T>().create(name)?.write_scalar(&value)?;
    Ok(())
}

fn read_attr<T: H5Type>(group: &Group, name: &str) -> Result<T> {
    group.attr(name)?.read_scalar::<T>().map_err(|err| {
        Error::InvalidFormat(format!("{}: attribute {name}: {err}", group.name()))
    })
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

/// `None` only if the attribute does not exist; unreadable ones are errors.
fn read_attr_opt_string_file(file: &File, name: &str) -> Result<Option<String>> {
    if !file.attr_names()?.iter().any(|existing| existing == name) {
        return Ok(None);
    }
    let value: VarLenUnicode = file.attr(name)?.read_scalar()?;
    Ok(Some(value.to_string()))
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{Builder, NamedTempFile};

    fn h5_file() -> NamedTempFile {
        Builder::new().suffix(".h5").tempfile().unwrap()
    }

    #[test]
    fn test_hdf5_spectra_roundtrip() {
        let mut truth = Histogram::new(18_565.0, 18_590.0, 100).unwrap();
        let mut smeared = Histogram::new(18_565.0, 18_590.0, 100).unwrap();
        for value in [18_570.1, 18_580.3, 18_589.9, 18_564.0] {
            truth.fill(value);
            smeared.fill(value + 0.7);
        }

        let file = h5_file();
        write_spectra_hdf5(file.path(), &[("E_e", &truth), ("E_e_sm", &smeared)]).unwrap();

        assert_eq!(list_spectra_hdf5(file.path()).unwrap(), vec!["E_e", "E_e_sm"]);
        let loaded = read_spectrum_hdf5(file.path(), "E_e_sm").unwrap();
        assert_eq!(loaded, smeared);
        let all = read_spectra_hdf5(file.path()).unwrap();
        assert_eq!(all[0].1, truth);
    }

    #[test]
    fn test_hdf5_missing_histogram() {
        let truth = Histogram::new(0.0, 1.0, 4).unwrap();
        let file = h5_file();
        write_spectra_hdf5(file.path(), &[("E_e", &truth)]).unwrap();

        assert!(matches!(
            read_spectrum_hdf5(file.path(), "E_mu"),
            Err(Error::MissingHistogram { .. })
        ));
    }

    #[test]
    fn test_hdf5_version_attribute_missing_or_unreadable() {
        let bare = h5_file();
        File::create(bare.path()).unwrap();
        match list_spectra_hdf5(bare.path()) {
            Err(Error::InvalidFormat(message)) => assert!(message.contains("missing")),
            other => panic!("expected missing version, got {other:?}"),
        }

        let numeric = h5_file();
        {
            let file = File::create(numeric.path()).unwrap();
            file.new_attr::<i32>()
                .create("betaspec_format_version")
                .unwrap()
                .write_scalar(&1)
                .unwrap();
        }
        match list_spectra_hdf5(numeric.path()) {
            Err(Error::InvalidFormat(message)) => {
                assert!(!message.contains("missing"), "{message}");
            }
            Err(_) => {}
            Ok(names) => panic!("numeric version accepted: {names:?}"),
        }
    }
}
