use std::ops::Range;

use super::Accumulator;
use crate::data::{CenterSet, PointSet};

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Finds the center closest to `point`.
///
/// Only a strictly smaller distance replaces the current best, so ties go to the
/// lowest center index.
///
/// # Returns
/// The index of the nearest center, `None` if there are no centers.
pub fn nearest_center(point: &[f64], centers: &CenterSet) -> Option<usize> {
    let mut best = None;
    let mut best_dist = f64::MAX;

    for (idx, center) in centers.iter().enumerate() {
        let dist = euclidean_distance(point, center);
        if dist < best_dist || best.is_none() {
            best_dist = dist;
            best = Some(idx);
        }
    }

    best
}

/// Assigns every point of `range` to its nearest center and accumulates it there.
///
/// This is the work of one thread in one iteration: it reads the shared points and
/// centers and only writes its own labels and accumulator. An empty range does nothing.
///
/// # Arguments
/// * `points` - The points of this process.
/// * `centers` - The centers of the current iteration.
/// * `range` - The local indices owned by the calling thread.
/// * `labels` - The labels of `range`, `labels[i]` belongs to point `range.start + i`.
/// * `acc` - The calling thread's accumulator.
pub fn assign_and_accumulate(
    points: &PointSet,
    centers: &CenterSet,
    range: Range<usize>,
    labels: &mut [u32],
    acc: &mut Accumulator,
) {
    for (point, label) in points.rows(range).zip(labels) {
        if let Some(center) = nearest_center(point, centers) {
            acc.add(center, point);
            *label = center as u32;
        }
    }
}
