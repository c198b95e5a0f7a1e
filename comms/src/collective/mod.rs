//! Collective operations over a fixed group of processes.

mod solo;
mod tcp;

use std::io;

pub use solo::SoloComm;
pub use tcp::TcpComm;

/// The element-wise combination applied by `Communicator::all_reduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// Folds `other` into `acc` element by element.
    ///
    /// # Arguments
    /// * `acc` - The running result, overwritten in place.
    /// * `other` - A contribution of the same length.
    pub fn fold(self, acc: &mut [f64], other: &[f64]) {
        let pairs = acc.iter_mut().zip(other);

        match self {
            ReduceOp::Sum => pairs.for_each(|(a, b)| *a += b),
            ReduceOp::Min => pairs.for_each(|(a, b)| *a = a.min(*b)),
            ReduceOp::Max => pairs.for_each(|(a, b)| *a = a.max(*b)),
        }
    }
}

/// A process group able to run blocking collective operations.
///
/// Every member must call the same collectives in the same order, a member that never
/// arrives stalls all the others.
pub trait Communicator {
    /// The index of this process inside the group, in `[0, size)`.
    fn rank(&self) -> usize;

    /// The amount of processes in the group.
    fn size(&self) -> usize;

    /// Combines `buf` across every process and leaves the identical result on all of them.
    ///
    /// Contributions are folded in ascending rank order so the result does not depend
    /// on arrival order.
    ///
    /// # Arguments
    /// * `buf` - This process' contribution, replaced by the combined result.
    /// * `op` - The element-wise combination.
    ///
    /// # Returns
    /// An `io::Error` if the transport fails or the buffer lengths differ between processes.
    fn all_reduce(&mut self, buf: &mut [f64], op: ReduceOp) -> io::Result<()>;

    /// Concatenates every process' slice in rank order and hands the result to all of them.
    ///
    /// # Arguments
    /// * `local` - This process' contribution.
    /// * `counts` - The expected contribution length of every rank.
    ///
    /// # Returns
    /// The gathered values or an `io::Error` if a contribution doesn't match its count.
    fn all_gather(&mut self, local: &[u32], counts: &[usize]) -> io::Result<Vec<u32>>;

    /// Leaves the group, waiting for every other member to do the same.
    fn finalize(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Tells the group this process is failing, so members blocked in a collective
    /// fail with `reason` instead of waiting forever.
    ///
    /// # Arguments
    /// * `reason` - The cause of the failure.
    fn abort(&mut self, _reason: &str) -> io::Result<()> {
        Ok(())
    }
}

fn count_mismatch<T>(rank: usize, got: usize, expected: usize) -> io::Result<T> {
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("rank {rank} contributed {got} values, expected {expected}"),
    ))
}

fn check_counts(size: usize, counts: &[usize]) -> io::Result<()> {
    if counts.len() != size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("got {} counts for a group of {size}", counts.len()),
        ));
    }

    Ok(())
}
