use std::ops::Range;

use super::PointSource;
use crate::error::{KMeansErr, Result};

/// The contiguous slice of the global point set owned by one process.
///
/// Points are stored row-major and never change during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet {
    dimension: usize,
    offset: usize,
    values: Vec<f64>,
}

impl PointSet {
    /// Creates a new `PointSet`.
    ///
    /// # Arguments
    /// * `dimension` - The amount of coordinates per point.
    /// * `offset` - The global index of the first point.
    /// * `values` - The flattened points.
    ///
    /// # Returns
    /// A `KMeansErr::SizeMismatch` if `values` doesn't hold whole points.
    pub fn new(dimension: usize, offset: usize, values: Vec<f64>) -> Result<Self> {
        check_rows("point set", dimension, &values)?;

        Ok(Self {
            dimension,
            offset,
            values,
        })
    }

    /// Reads the points of `range` from `source`.
    pub fn load<S: PointSource>(source: &mut S, range: Range<usize>) -> Result<Self> {
        let values = source.read_rows(range.start, range.len())?;
        Self::new(source.dimension(), range.start, values)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The global index of the first local point.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The local points of `range`, one slice per point.
    pub fn rows(&self, range: Range<usize>) -> impl Iterator<Item = &[f64]> {
        let start = range.start * self.dimension;
        let end = range.end * self.dimension;
        self.values[start..end].chunks_exact(self.dimension)
    }
}

/// The K centers, replicated on every process and thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterSet {
    dimension: usize,
    values: Vec<f64>,
}

impl CenterSet {
    /// Creates a new `CenterSet` from flattened centers.
    pub fn new(dimension: usize, values: Vec<f64>) -> Result<Self> {
        check_rows("center set", dimension, &values)?;
        Ok(Self { dimension, values })
    }

    /// Reads the first `k` rows of `source` as the initial centers.
    pub fn load<S: PointSource>(source: &mut S, k: usize) -> Result<Self> {
        let values = source.read_rows(0, k)?;
        Self::new(source.dimension(), values)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn center(&self, idx: usize) -> &[f64] {
        let start = idx * self.dimension;
        &self.values[start..start + self.dimension]
    }

    pub fn center_mut(&mut self, idx: usize) -> &mut [f64] {
        let start = idx * self.dimension;
        &mut self.values[start..start + self.dimension]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.dimension)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

fn check_rows(what: &'static str, dimension: usize, values: &[f64]) -> Result<()> {
    if dimension == 0 {
        return Err(KMeansErr::Config(format!("{what} dimension must be positive")));
    }

    if values.len() % dimension != 0 {
        return Err(KMeansErr::SizeMismatch {
            what,
            got: values.len(),
            expected: values.len().next_multiple_of(dimension),
        });
    }

    Ok(())
}
