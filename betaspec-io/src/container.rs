//! Named-spectrum containers.
//!
//! A container holds several histograms keyed by name and is written once
//! per run. The format follows the file extension: `.json` for the JSON
//! document, `.h5` / `.hdf5` for HDF5/NeXus (with the `hdf5` feature).

use crate::{Error, Result};
use betaspec_core::{Histogram, HistogramParts};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Version tag written into every container.
pub const FORMAT_VERSION: &str = "0.1";

/// On-disk container format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Json,
    Hdf5,
}

impl ContainerFormat {
    /// Format implied by the extension of `path`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFormat`] for a missing or unknown extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("h5" | "hdf5") => Ok(Self::Hdf5),
            _ => Err(Error::UnsupportedFormat(format!(
                "cannot infer container format from {}",
                path.display()
            ))),
        }
    }

    /// Default file extension.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Hdf5 => "h5",
        }
    }

    /// True if this build can read and write the format.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Json => true,
            Self::Hdf5 => cfg!(feature = "hdf5"),
        }
    }

    /// `<base>.<ext>`, unless `base` already names a container file.
    #[must_use]
    pub fn container_path<P: AsRef<Path>>(self, base: P) -> PathBuf {
        let base = base.as_ref();
        if Self::from_path(base).is_ok() {
            return base.to_path_buf();
        }
        let mut name = base.as_os_str().to_os_string();
        name.push(".");
        name.push(self.extension());
        PathBuf::from(name)
    }
}

impl FromStr for ContainerFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "hdf5" | "h5" => Ok(Self::Hdf5),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Serialized form of one histogram.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramRecord {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub contents: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    pub entries: u64,
}

impl HistogramRecord {
    /// Copies `histogram` under `name`.
    #[must_use]
    pub fn from_histogram(name: &str, histogram: &Histogram) -> Self {
        let parts = histogram.to_parts();
        Self {
            name: name.to_string(),
            lower: parts.lower,
            upper: parts.upper,
            contents: parts.contents,
            sumw2: parts.sumw2,
            underflow: parts.underflow,
            overflow: parts.overflow,
            entries: parts.entries,
        }
    }

    /// Rebuilds the histogram, checking its invariants.
    ///
    /// # Errors
    /// Returns [`Error::CoreError`] if the stored data is inconsistent.
    pub fn into_histogram(self) -> Result<Histogram> {
        Ok(Histogram::from_parts(HistogramParts {
            lower: self.lower,
            upper: self.upper,
            contents: self.contents,
            sumw2: self.sumw2,
            underflow: self.underflow,
            overflow: self.overflow,
            entries: self.entries,
        })?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonContainer {
    format_version: String,
    energy_unit: String,
    histograms: Vec<HistogramRecord>,
}

/// Rejects empty, slash-containing or duplicate names.
pub(crate) fn validate_names<'a, I>(names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() || name.contains('/') {
            return Err(Error::InvalidFormat(format!(
                "invalid histogram name '{name}'"
            )));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidFormat(format!(
                "duplicate histogram name '{name}'"
            )));
        }
    }
    Ok(())
}

/// Writes all `spectra` to a new container at `path`, replacing any file.
///
/// # Errors
/// Returns an error for invalid names, an unsupported extension, or I/O failure.
pub fn write_spectra<P: AsRef<Path>>(path: P, spectra: &[(&str, &Histogram)]) -> Result<()> {
    let path = path.as_ref();
    validate_names(spectra.iter().map(|(name, _)| *name))?;
    match ContainerFormat::from_path(path)? {
        ContainerFormat::Json => write_json(path, spectra),
        ContainerFormat::Hdf5 => write_hdf5(path, spectra),
    }
}

/// Reads every histogram in the container, in stored order.
///
/// # Errors
/// Returns an error if the container cannot be read or holds invalid data.
pub fn read_spectra<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Histogram)>> {
    let path = path.as_ref();
    match ContainerFormat::from_path(path)? {
        ContainerFormat::Json => read_json(path)?
            .histograms
            .into_iter()
            .map(|record| {
                let name = record.name.clone();
                record.into_histogram().map(|histogram| (name, histogram))
            })
            .collect(),
        ContainerFormat::Hdf5 => read_hdf5_all(path),
    }
}

/// Reads the histogram called `name`.
///
/// # Errors
/// Returns [`Error::MissingHistogram`] if the container has no such name.
pub fn read_spectrum<P: AsRef<Path>>(path: P, name: &str) -> Result<Histogram> {
    let path = path.as_ref();
    match ContainerFormat::from_path(path)? {
        ContainerFormat::Json => read_json(path)?
            .histograms
            .into_iter()
            .find(|record| record.name == name)
            .ok_or_else(|| Error::MissingHistogram {
                name: name.to_string(),
                path: path.to_path_buf(),
            })?
            .into_histogram(),
        ContainerFormat::Hdf5 => read_hdf5_one(path, name),
    }
}

/// Names of the histograms in the container.
///
/// # Errors
/// Returns an error if the container cannot be read.
pub fn list_spectra<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    match ContainerFormat::from_path(path)? {
        ContainerFormat::Json => Ok(read_json(path)?
            .histograms
            .into_iter()
            .map(|record| record.name)
            .collect()),
        ContainerFormat::Hdf5 => list_hdf5(path),
    }
}

fn write_json(path: &Path, spectra: &[(&str, &Histogram)]) -> Result<()> {
    let document = JsonContainer {
        format_version: FORMAT_VERSION.to_string(),
        energy_unit: "eV".to_string(),
        histograms: spectra
            .iter()
            .map(|(name, histogram)| HistogramRecord::from_histogram(name, histogram))
            .collect(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn read_json(path: &Path) -> Result<JsonContainer> {
    let reader = BufReader::new(File::open(path)?);
    let document: JsonContainer = serde_json::from_reader(reader)?;
    if document.format_version != FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported container version {}",
            document.format_version
        )));
    }
    validate_names(document.histograms.iter().map(|record| record.name.as_str()))?;
    Ok(document)
}

#[cfg(feature = "hdf5")]
fn write_hdf5(path: &Path, spectra: &[(&str, &Histogram)]) -> Result<()> {
    crate::hdf5::write_spectra_hdf5(path, spectra)
}

#[cfg(feature = "hdf5")]
fn read_hdf5_all(path: &Path) -> Result<Vec<(String, Histogram)>> {
    crate::hdf5::read_spectra_hdf5(path)
}

#[cfg(feature = "hdf5")]
fn read_hdf5_one(path: &Path, name: &str) -> Result<Histogram> {
    crate::hdf5::read_spectrum_hdf5(path, name)
}

#[cfg(feature = "hdf5")]
fn list_hdf5(path: &Path) -> Result<Vec<String>> {
    crate::hdf5::list_spectra_hdf5(path)
}

#[cfg(not(feature = "hdf5"))]
fn hdf5_disabled(path: &Path) -> Error {
    Error::UnsupportedFormat(format!(
        "{}: HDF5 support not compiled in (enable the `hdf5` feature)",
        path.display()
    ))
}

#[cfg(not(feature = "hdf5"))]
fn write_hdf5(path: &Path, _spectra: &[(&str, &Histogram)]) -> Result<()> {
    Err(hdf5_disabled(path))
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5_all(path: &Path) -> Result<Vec<(String, Histogram)>> {
    Err(hdf5_disabled(path))
}

#[cfg(not(feature = "hdf5"))]
fn read_hdf5_one(path: &Path, _name: &str) -> Result<Histogram> {
    Err(hdf5_disabled(path))
}

#[cfg(not(feature = "hdf5"))]
fn list_hdf5(path: &Path) -> Result<Vec<String>> {
    Err(hdf5_disabled(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ContainerFormat::from_path("run.json").unwrap(),
            ContainerFormat::Json
        );
        assert_eq!(
            ContainerFormat::from_path("run.H5").unwrap(),
            ContainerFormat::Hdf5
        );
        assert_eq!(
            ContainerFormat::from_path("run.hdf5").unwrap(),
            ContainerFormat::Hdf5
        );
        assert!(matches!(
            ContainerFormat::from_path("run.root"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(ContainerFormat::from_path("run").is_err());
    }

    #[test]
    fn test_container_path_appends_extension() {
        assert_eq!(
            ContainerFormat::Json.container_path("out/run"),
            PathBuf::from("out/run.json")
        );
        assert_eq!(
            ContainerFormat::Hdf5.container_path("run.v2"),
            PathBuf::from("run.v2.h5")
        );
        assert_eq!(
            ContainerFormat::Json.container_path("run.json"),
            PathBuf::from("run.json")
        );
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ContainerFormat>().unwrap(), ContainerFormat::Json);
        assert_eq!("h5".parse::<ContainerFormat>().unwrap(), ContainerFormat::Hdf5);
        assert!("root".parse::<ContainerFormat>().is_err());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_names(["E_e", "E_e_sm"]).is_ok());
        assert!(validate_names(["E_e", "E_e"]).is_err());
        assert!(validate_names([""]).is_err());
        assert!(validate_names(["a/b"]).is_err());
    }
}
