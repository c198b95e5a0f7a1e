use crate::error::{KMeansErr, Result};

/// Running per-center coordinate sums and point counts.
///
/// Stored flat as `centers` rows of `dimension + 1` values, the count last, which is
/// also the layout exchanged by the inter-process reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    dimension: usize,
    values: Vec<f64>,
}

impl Accumulator {
    /// Creates a new zeroed `Accumulator`.
    ///
    /// # Arguments
    /// * `centers` - The amount of centers.
    /// * `dimension` - The amount of coordinates per center.
    pub fn new(centers: usize, dimension: usize) -> Self {
        Self {
            dimension,
            values: vec![0.; centers * (dimension + 1)],
        }
    }

    fn stride(&self) -> usize {
        self.dimension + 1
    }

    pub fn centers(&self) -> usize {
        self.values.len() / self.stride()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn reset(&mut self) {
        self.values.fill(0.);
    }

    /// Adds `point` to the sum of `center` and counts it.
    pub fn add(&mut self, center: usize, point: &[f64]) {
        let stride = self.stride();
        let row = &mut self.values[center * stride..(center + 1) * stride];
        let (sum, count) = row.split_at_mut(self.dimension);

        sum.iter_mut().zip(point).for_each(|(s, x)| *s += x);
        count[0] += 1.;
    }

    /// Adds every sum and count of `other` into `self`.
    ///
    /// # Returns
    /// A `KMeansErr::SizeMismatch` if both accumulators don't have the same shape.
    pub fn merge(&mut self, other: &Accumulator) -> Result<()> {
        if self.dimension != other.dimension || self.values.len() != other.values.len() {
            return Err(KMeansErr::SizeMismatch {
                what: "accumulator",
                got: other.values.len(),
                expected: self.values.len(),
            });
        }

        self.values
            .iter_mut()
            .zip(&other.values)
            .for_each(|(acc, v)| *acc += v);

        Ok(())
    }

    /// The coordinate sum of `center`.
    pub fn sum(&self, center: usize) -> &[f64] {
        let start = center * self.stride();
        &self.values[start..start + self.dimension]
    }

    /// The amount of points counted for `center`.
    pub fn count(&self, center: usize) -> f64 {
        self.values[center * self.stride() + self.dimension]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }
}
