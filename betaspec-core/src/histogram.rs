//! Fixed-binning 1D histogram over an energy interval.
//!
//! Bins are equal-width and cover `[lower, upper]`; a value equal to `upper`
//! lands in the last bin. Out-of-range values are not an error: they are
//! added to the underflow/overflow totals and never reach a bin.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::{Error, Result};

/// Where a value falls relative to the binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinLookup {
    /// Below `lower`.
    Underflow,
    /// Inside the range, at this bin index.
    Bin(usize),
    /// Above `upper` (or NaN).
    Overflow,
}

impl BinLookup {
    /// Bin index if the value was in range.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Bin(index) => Some(index),
            Self::Underflow | Self::Overflow => None,
        }
    }
}

/// Raw histogram contents, used to rebuild a histogram from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramParts {
    pub lower: f64,
    pub upper: f64,
    pub contents: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    pub entries: u64,
}

/// Equal-width binned counter.
///
/// Each bin keeps the sum of weights and the sum of squared weights, so
/// `bin_error` is the Poisson error for unit-weight fills.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    lower: f64,
    upper: f64,
    width: f64,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Histogram {
    /// Creates an empty histogram with `bins` bins over `[lower, upper]`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBinCount`] for zero bins and
    /// [`Error::InvalidWindow`] for an empty or non-finite range.
    pub fn new(lower: f64, upper: f64, bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(Error::InvalidBinCount(bins));
        }
        if !(lower.is_finite() && upper.is_finite()) || lower >= upper {
            return Err(Error::InvalidWindow { lower, upper });
        }
        Ok(Self {
            lower,
            upper,
            width: (upper - lower) / bins as f64,
            contents: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        })
    }

    /// Histogram with the given bin contents and Poisson variances.
    ///
    /// # Errors
    /// Same as [`Histogram::from_parts`].
    pub fn from_counts(lower: f64, upper: f64, counts: Vec<f64>) -> Result<Self> {
        let entries = counts.iter().sum::<f64>().round().max(0.0) as u64;
        Self::from_parts(HistogramParts {
            lower,
            upper,
            sumw2: counts.clone(),
            contents: counts,
            underflow: 0.0,
            overflow: 0.0,
            entries,
        })
    }

    /// Rebuilds a histogram, checking its invariants.
    ///
    /// # Errors
    /// Returns an error if the range or bin count is invalid, if `contents`
    /// and `sumw2` differ in length, or if any value is negative or not finite.
    pub fn from_parts(parts: HistogramParts) -> Result<Self> {
        let mut histogram = Self::new(parts.lower, parts.upper, parts.contents.len())?;
        if parts.sumw2.len() != parts.contents.len() {
            return Err(Error::InvalidHistogram(format!(
                "{} contents but {} squared-weight sums",
                parts.contents.len(),
                parts.sumw2.len()
            )));
        }
        let valid = |value: &f64| value.is_finite() && *value >= 0.0;
        if !parts.contents.iter().all(valid) || !parts.sumw2.iter().all(valid) {
            return Err(Error::InvalidHistogram(
                "bin contents must be finite and non-negative".to_string(),
            ));
        }
        if !valid(&parts.underflow) || !valid(&parts.overflow) {
            return Err(Error::InvalidHistogram(
                "underflow/overflow must be finite and non-negative".to_string(),
            ));
        }

        histogram.contents = parts.contents;
        histogram.sumw2 = parts.sumw2;
        histogram.underflow = parts.underflow;
        histogram.overflow = parts.overflow;
        histogram.entries = parts.entries;
        Ok(histogram)
    }

    /// Copies the raw contents out.
    #[must_use]
    pub fn to_parts(&self) -> HistogramParts {
        HistogramParts {
            lower: self.lower,
            upper: self.upper,
            contents: self.contents.clone(),
            sumw2: self.sumw2.clone(),
            underflow: self.underflow,
            overflow: self.overflow,
            entries: self.entries,
        }
    }

    /// Number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.contents.len()
    }

    /// Lower edge of the first bin.
    #[must_use]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper edge of the last bin.
    #[must_use]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Width of every bin.
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.width
    }

    /// Lower edge of bin `index`.
    #[must_use]
    pub fn bin_low_edge(&self, index: usize) -> f64 {
        self.lower + index as f64 * self.width
    }

    /// Center of bin `index`.
    #[must_use]
    pub fn bin_center(&self, index: usize) -> f64 {
        self.lower + (index as f64 + 0.5) * self.width
    }

    /// All `bins + 1` edges; the last one is exactly `upper`.
    #[must_use]
    pub fn bin_edges(&self) -> Vec<f64> {
        let mut edges: Vec<f64> = (0..self.bins()).map(|i| self.bin_low_edge(i)).collect();
        edges.push(self.upper);
        edges
    }

    /// Locates `value` in the binning.
    #[must_use]
    pub fn find_bin(&self, value: f64) -> BinLookup {
        if value < self.lower {
            return BinLookup::Underflow;
        }
        if !(value <= self.upper) {
            return BinLookup::Overflow;
        }
        let index = ((value - self.lower) / self.width) as usize;
        BinLookup::Bin(index.min(self.bins() - 1))
    }

    /// Adds one count at `value`.
    pub fn fill(&mut self, value: f64) -> BinLookup {
        self.fill_weighted(value, 1.0)
    }

    /// Adds `weight` at `value`; weights are expected to be non-negative.
    pub fn fill_weighted(&mut self, value: f64, weight: f64) -> BinLookup {
        debug_assert!(weight >= 0.0, "negative histogram weight {weight}");
        self.entries += 1;
        let lookup = self.find_bin(value);
        match lookup {
            BinLookup::Underflow => self.underflow += weight,
            BinLookup::Overflow => self.overflow += weight,
            BinLookup::Bin(index) => {
                self.contents[index] += weight;
                self.sumw2[index] += weight * weight;
            }
        }
        lookup
    }

    /// Content of bin `index`.
    #[must_use]
    pub fn content(&self, index: usize) -> f64 {
        self.contents[index]
    }

    /// Statistical error of bin `index` (`sqrt(sum w^2)`).
    #[must_use]
    pub fn bin_error(&self, index: usize) -> f64 {
        self.sumw2[index].sqrt()
    }

    /// Bin contents.
    #[must_use]
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Per-bin sums of squared weights.
    #[must_use]
    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    /// Weight that fell below `lower`.
    #[must_use]
    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    /// Weight that fell above `upper`.
    #[must_use]
    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Number of fill calls, in range or not.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum of the in-range bin contents.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// True if both histograms share bin count and edges.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        let tolerance = 1e-9 * self.width;
        self.bins() == other.bins()
            && (self.lower - other.lower).abs() <= tolerance
            && (self.upper - other.upper).abs() <= tolerance
    }

    /// Adds `other` bin by bin.
    ///
    /// # Errors
    /// Returns [`Error::BinningMismatch`] if the binnings differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if !self.is_compatible(other) {
            return Err(Error::BinningMismatch(format!(
                "{} bins over [{}, {}] vs {} bins over [{}, {}]",
                self.bins(),
                self.lower,
                self.upper,
                other.bins(),
                other.lower,
                other.upper
            )));
        }
        for (dst, src) in self.contents.iter_mut().zip(&other.contents) {
            *dst += src;
        }
        for (dst, src) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *dst += src;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.entries += other.entries;
        Ok(())
    }
}
