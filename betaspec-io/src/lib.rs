//! betaspec-io: Named-spectrum containers for betaspec.
//!
//! A generation run writes its histograms once into a single container; an
//! analysis run loads them back by name. JSON is always available; HDF5/NeXus
//! is enabled with the `hdf5` feature.
//!

mod container;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;

pub use container::{
    list_spectra, read_spectra, read_spectrum, write_spectra, ContainerFormat, HistogramRecord,
    FORMAT_VERSION,
};
pub use error::{Error, Result};
