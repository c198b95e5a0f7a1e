use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use super::PointSource;
use crate::{
    clustering::UNASSIGNED,
    error::{KMeansErr, Result},
};

const ROWS_PER_READ: usize = 4096;

/// Writes one tab separated line per point: its index, its coordinates and its center.
///
/// Points are re-read from `source` in blocks so the whole set is never held in memory.
/// Unassigned points are written with center `-1`.
///
/// # Arguments
/// * `source` - The global point set.
/// * `labels` - The center of every point, in global order.
/// * `out` - The destination.
pub fn write_assignments<S, W>(source: &mut S, labels: &[u32], mut out: W) -> Result<()>
where
    S: PointSource,
    W: Write,
{
    let dimension = source.dimension();
    let mut index = 0;

    for block in labels.chunks(ROWS_PER_READ) {
        let values = source.read_rows(index, block.len())?;

        if values.len() != block.len() * dimension {
            return Err(KMeansErr::SizeMismatch {
                what: "point rows",
                got: values.len(),
                expected: block.len() * dimension,
            });
        }

        for (point, &label) in values.chunks_exact(dimension).zip(block) {
            write!(out, "{index}")?;
            for coord in point {
                write!(out, "\t{coord}")?;
            }

            if label == UNASSIGNED {
                writeln!(out, "\t-1")?;
            } else {
                writeln!(out, "\t{label}")?;
            }

            index += 1;
        }
    }

    out.flush()?;
    Ok(())
}

/// Creates, or truncates, `path` and writes the assignments into it.
pub fn write_assignment_file<S, P>(path: P, source: &mut S, labels: &[u32]) -> Result<()>
where
    S: PointSource,
    P: AsRef<Path>,
{
    let file = File::create(path)?;
    write_assignments(source, labels, BufWriter::new(file))
}
