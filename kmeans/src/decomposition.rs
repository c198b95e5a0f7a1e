//! Deterministic splitting of points, and CPUs, into contiguous balanced ranges.

use std::ops::Range;

use crate::error::{KMeansErr, Result};

/// Splits `total` items among `parts` and returns the range of `part`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1, the first `total % parts` ranges get the extra item.
/// - Ranges may be empty when `total < parts`.
pub fn shard_range(total: usize, part: usize, parts: usize) -> Range<usize> {
    assert!(parts > 0);
    assert!(part < parts);

    let base = total / parts;
    let rem = total % parts;

    let start = part * base + part.min(rem);
    let extra = if part < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Where this process sits in the process group and how many threads it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    rank: usize,
    size: usize,
    nodes: usize,
    threads: usize,
}

impl Topology {
    /// Creates a new `Topology`.
    ///
    /// # Arguments
    /// * `rank` - This process' rank in the group.
    /// * `size` - The amount of processes in the group.
    /// * `nodes` - The amount of machines the group spans, must divide `size`.
    /// * `threads` - Worker threads per process.
    ///
    /// # Returns
    /// A `KMeansErr::Config` if the numbers don't describe a valid layout.
    pub fn new(rank: usize, size: usize, nodes: usize, threads: usize) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(KMeansErr::Config(format!(
                "rank {rank} is out of range for {size} processes"
            )));
        }

        if threads == 0 {
            return Err(KMeansErr::Config("threads must be positive".into()));
        }

        if nodes == 0 || size % nodes != 0 {
            return Err(KMeansErr::Config(format!(
                "{size} processes can't be evenly placed on {nodes} nodes"
            )));
        }

        Ok(Self {
            rank,
            size,
            nodes,
            threads,
        })
    }

    /// A single process layout.
    pub fn single(threads: usize) -> Result<Self> {
        Self::new(0, 1, 1, threads)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn procs_per_node(&self) -> usize {
        self.size / self.nodes
    }

    /// The node hosting `rank`, ranks are packed onto nodes in order.
    pub fn node_of(&self, rank: usize) -> usize {
        rank / self.procs_per_node()
    }

    /// The node hosting this process.
    pub fn node(&self) -> usize {
        self.node_of(self.rank)
    }

    /// This process' index among the processes sharing its node.
    pub fn local_rank(&self) -> usize {
        self.rank % self.procs_per_node()
    }
}

/// The point ranges owned by this process and by each of its threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompositionPlan {
    total_points: usize,
    process: Range<usize>,
    threads: Vec<Range<usize>>,
    counts: Vec<usize>,
}

impl DecompositionPlan {
    /// Splits `total_points` first across processes and then across this process' threads.
    ///
    /// # Arguments
    /// * `total_points` - The size of the whole point set.
    /// * `topology` - The process layout.
    ///
    /// # Returns
    /// A new `DecompositionPlan`, thread ranges are relative to the process range.
    pub fn new(total_points: usize, topology: &Topology) -> Self {
        let size = topology.size();
        let process = shard_range(total_points, topology.rank(), size);

        let threads = (0..topology.threads())
            .map(|thread| shard_range(process.len(), thread, topology.threads()))
            .collect();

        let counts = (0..size)
            .map(|rank| shard_range(total_points, rank, size).len())
            .collect();

        Self {
            total_points,
            process,
            threads,
            counts,
        }
    }

    pub fn total_points(&self) -> usize {
        self.total_points
    }

    /// The global range of points owned by this process.
    pub fn process_range(&self) -> Range<usize> {
        self.process.clone()
    }

    /// The amount of points owned by this process.
    pub fn local_points(&self) -> usize {
        self.process.len()
    }

    /// The ranges of each thread, relative to the start of `process_range`.
    pub fn thread_ranges(&self) -> &[Range<usize>] {
        &self.threads
    }

    /// The amount of points owned by every rank, in rank order.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(ranges: &[Range<usize>], total: usize) {
        let mut next = 0;
        for range in ranges {
            assert_eq!(range.start, next, "gap or overlap at {range:?}");
            next = range.end;
        }
        assert_eq!(next, total);

        let max = ranges.iter().map(Range::len).max().unwrap();
        let min = ranges.iter().map(Range::len).min().unwrap();
        assert!(max - min <= 1, "unbalanced partition {ranges:?}");
    }

    #[test]
    fn test_shard_range_balanced() {
        // total 10, parts 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn test_shard_range_partitions_exactly_once() {
        for total in 0..40 {
            for parts in 1..9 {
                let ranges: Vec<_> = (0..parts).map(|p| shard_range(total, p, parts)).collect();
                assert_partition(&ranges, total);
            }
        }
    }

    #[test]
    fn test_fewer_points_than_parts_gives_empty_ranges() {
        assert_eq!(shard_range(2, 0, 4), 0..1);
        assert_eq!(shard_range(2, 1, 4), 1..2);
        assert!(shard_range(2, 2, 4).is_empty());
        assert!(shard_range(2, 3, 4).is_empty());
    }

    #[test]
    fn test_plan_covers_all_points_across_processes_and_threads() {
        const POINTS: usize = 103;
        const PROCS: usize = 4;
        const THREADS: usize = 3;

        let mut global = Vec::new();
        for rank in 0..PROCS {
            let topology = Topology::new(rank, PROCS, 2, THREADS).unwrap();
            let plan = DecompositionPlan::new(POINTS, &topology);
            let process = plan.process_range();

            assert_eq!(plan.counts()[rank], process.len());
            assert_partition(plan.thread_ranges(), process.len());

            global.extend(
                plan.thread_ranges()
                    .iter()
                    .map(|r| process.start + r.start..process.start + r.end),
            );
        }

        assert_partition(&global[..THREADS], 26);
        let mut next = 0;
        for range in &global {
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, POINTS);
    }

    #[test]
    fn test_plan_counts_sum_to_total() {
        let topology = Topology::new(1, 3, 1, 2).unwrap();
        let plan = DecompositionPlan::new(10, &topology);

        assert_eq!(plan.counts(), &[4, 3, 3]);
        assert_eq!(plan.process_range(), 4..7);
        assert_eq!(plan.thread_ranges(), &[0..2, 2..3]);
    }

    #[test]
    fn test_empty_point_set() {
        let topology = Topology::single(4).unwrap();
        let plan = DecompositionPlan::new(0, &topology);

        assert_eq!(plan.local_points(), 0);
        assert!(plan.thread_ranges().iter().all(Range::is_empty));
    }

    #[test]
    fn test_topology_node_grouping() {
        let topology = Topology::new(5, 6, 2, 1).unwrap();

        assert_eq!(topology.procs_per_node(), 3);
        assert_eq!(topology.node(), 1);
        assert_eq!(topology.local_rank(), 2);
        assert_eq!(topology.node_of(2), 0);
    }

    #[test]
    fn test_invalid_topologies() {
        assert!(Topology::new(2, 2, 1, 1).is_err());
        assert!(Topology::new(0, 3, 2, 1).is_err());
        assert!(Topology::new(0, 2, 0, 1).is_err());
        assert!(Topology::new(0, 2, 1, 0).is_err());
    }
}
