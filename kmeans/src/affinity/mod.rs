//! Pinning worker threads to the logical CPUs of their node.

mod binder;
mod plan;

use std::sync::Arc;

use log::{debug, warn};

pub use binder::{CpuBinder, OsBinder, online_cpus};
pub use plan::{AffinityPlan, CpuId, cpu_set};

/// An `AffinityPlan` together with the means to apply it.
#[derive(Clone)]
pub struct Affinity {
    plan: AffinityPlan,
    binder: Arc<dyn CpuBinder>,
}

impl Affinity {
    /// Creates a new `Affinity`.
    ///
    /// # Arguments
    /// * `plan` - The CPU set of each thread.
    /// * `binder` - The service binding the calling thread to a CPU set.
    pub fn new(plan: AffinityPlan, binder: Arc<dyn CpuBinder>) -> Self {
        Self { plan, binder }
    }

    pub fn plan(&self) -> &AffinityPlan {
        &self.plan
    }

    /// Binds the calling thread to the CPU set of `thread`.
    ///
    /// A thread without CPUs of its own is left floating, a binding failure is logged
    /// and the thread keeps running unbound.
    ///
    /// # Arguments
    /// * `thread` - The index of the calling worker thread.
    pub fn apply(&self, thread: usize) {
        let cpus = self.plan.cpus(thread);

        if cpus.is_empty() {
            debug!(thread = thread; "no cpus left for this thread, leaving it unbound");
            return;
        }

        match self.binder.bind(cpus) {
            Ok(()) => debug!(thread = thread; "bound to cpus {cpus:?}"),
            Err(e) => warn!(thread = thread; "failed to bind to cpus {cpus:?}: {e}"),
        }
    }
}
