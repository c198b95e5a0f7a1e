use crate::decomposition::{Topology, shard_range};

/// A logical CPU index within a node.
pub type CpuId = usize;

/// The CPUs of its node a worker thread should run on.
///
/// The node's CPUs are split evenly among the processes sharing it, and the share of
/// this process is split again among its threads, both with `shard_range`.
///
/// # Arguments
/// * `topology` - The process layout.
/// * `cpus_per_node` - The amount of logical CPUs of each node.
/// * `thread` - The thread index inside this process.
///
/// # Returns
/// The CPU ids of `thread`, empty if there are more workers than CPUs.
pub fn cpu_set(topology: &Topology, cpus_per_node: usize, thread: usize) -> Vec<CpuId> {
    let process = shard_range(cpus_per_node, topology.local_rank(), topology.procs_per_node());
    let own = shard_range(process.len(), thread, topology.threads());

    (process.start + own.start..process.start + own.end).collect()
}

/// The CPU set of every thread of this process, computed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityPlan {
    sets: Vec<Vec<CpuId>>,
}

impl AffinityPlan {
    pub fn new(topology: &Topology, cpus_per_node: usize) -> Self {
        let sets = (0..topology.threads())
            .map(|thread| cpu_set(topology, cpus_per_node, thread))
            .collect();

        Self { sets }
    }

    /// The CPUs of `thread`, empty for threads outside the plan.
    pub fn cpus(&self, thread: usize) -> &[CpuId] {
        self.sets.get(thread).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn threads(&self) -> usize {
        self.sets.len()
    }
}
