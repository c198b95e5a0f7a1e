use super::{Accumulator, euclidean_distance};
use crate::data::CenterSet;

/// What happened to the centers in one update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateReport {
    /// The largest distance any center moved.
    pub max_displacement: f64,
    /// Whether every center moved at most the error threshold.
    pub converged: bool,
    /// Centers without points, kept where they were.
    pub empty_clusters: usize,
}

/// Moves every center to the mean of its points and checks for convergence.
///
/// Every center is recomputed even after the outcome is known. A center without
/// points keeps its previous position and counts as not having moved.
///
/// # Arguments
/// * `global` - The accumulator summed over every thread of every process.
/// * `centers` - The current centers, replaced by the new ones.
/// * `threshold` - The largest displacement a converged center may have.
///
/// # Returns
/// An `UpdateReport` of the iteration.
pub fn update_centers(global: &Accumulator, centers: &mut CenterSet, threshold: f64) -> UpdateReport {
    let mut report = UpdateReport {
        max_displacement: 0.,
        converged: true,
        empty_clusters: 0,
    };

    let mut next = vec![0.; centers.dimension()];

    for c in 0..centers.len() {
        let count = global.count(c);

        if count == 0. {
            report.empty_clusters += 1;
            continue;
        }

        next.iter_mut()
            .zip(global.sum(c))
            .for_each(|(x, sum)| *x = sum / count);

        let center = centers.center_mut(c);
        let displacement = euclidean_distance(&next, center);
        center.copy_from_slice(&next);

        report.max_displacement = report.max_displacement.max(displacement);
        if displacement > threshold {
            report.converged = false;
        }
    }

    report
}
