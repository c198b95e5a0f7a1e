use std::io;

use super::{Communicator, ReduceOp, check_counts, count_mismatch};

/// A group made of a single process, every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloComm;

impl SoloComm {
    pub fn new() -> Self {
        Self
    }
}

impl Communicator for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce(&mut self, _buf: &mut [f64], _op: ReduceOp) -> io::Result<()> {
        Ok(())
    }

    fn all_gather(&mut self, local: &[u32], counts: &[usize]) -> io::Result<Vec<u32>> {
        check_counts(1, counts)?;

        if counts[0] != local.len() {
            return count_mismatch(0, local.len(), counts[0]);
        }

        Ok(local.to_vec())
    }
}
