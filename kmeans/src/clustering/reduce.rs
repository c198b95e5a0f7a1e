use comms::{Communicator, ReduceOp};

use super::Accumulator;
use crate::error::{KMeansErr, Result};

/// Folds every thread's accumulator into the first one, in thread index order.
///
/// Must only be called once every thread finished its local work for the iteration.
///
/// # Arguments
/// * `accs` - One accumulator per thread.
///
/// # Returns
/// The process-local accumulator, which is `accs[0]`.
pub fn fold_threads(accs: &mut [Accumulator]) -> Result<&mut Accumulator> {
    let (head, tail) = accs
        .split_first_mut()
        .ok_or_else(|| KMeansErr::Config("there must be at least one thread".into()))?;

    for acc in tail.iter() {
        head.merge(acc)?;
    }

    Ok(head)
}

/// Sums the process-local accumulators of every process, in place and on all of them.
///
/// Blocks until every process in the group contributes.
///
/// # Arguments
/// * `comm` - The process group.
/// * `acc` - This process' accumulator, replaced by the global one.
pub fn all_reduce<C: Communicator>(comm: &mut C, acc: &mut Accumulator) -> Result<()> {
    if comm.size() == 1 {
        return Ok(());
    }

    comm.all_reduce(acc.as_mut_slice(), ReduceOp::Sum)
        .map_err(KMeansErr::Comm)
}

#[cfg(test)]
mod tests {
    use comms::SoloComm;

    use super::*;

    #[test]
    fn test_fold_threads_into_first() {
        let mut accs = vec![Accumulator::new(2, 1); 3];
        accs[0].add(0, &[1.0]);
        accs[1].add(1, &[2.0]);
        accs[2].add(1, &[4.0]);

        let local = fold_threads(&mut accs).unwrap();
        assert_eq!(local.as_slice(), &[1.0, 1.0, 6.0, 2.0]);
    }

    #[test]
    fn test_fold_single_thread_is_identity() {
        let mut accs = vec![Accumulator::new(1, 2)];
        accs[0].add(0, &[3.0, 4.0]);
        let expected = accs[0].clone();

        assert_eq!(*fold_threads(&mut accs).unwrap(), expected);
    }

    #[test]
    fn test_fold_without_threads() {
        assert!(fold_threads(&mut []).is_err());
    }

    #[test]
    fn test_all_reduce_single_process_is_a_no_op() {
        let mut acc = Accumulator::new(1, 1);
        acc.add(0, &[2.5]);
        let expected = acc.clone();

        all_reduce(&mut SoloComm::new(), &mut acc).unwrap();
        assert_eq!(acc, expected);
    }
}
