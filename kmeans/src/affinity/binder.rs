use std::io;

use super::CpuId;

/// Binds the calling thread to a set of logical CPUs.
pub trait CpuBinder: Send + Sync {
    /// Restricts the calling thread to `cpus`. Binding twice to the same set is a no-op.
    ///
    /// # Arguments
    /// * `cpus` - A non empty set of logical CPU ids.
    fn bind(&self, cpus: &[CpuId]) -> io::Result<()>;
}

/// The logical CPUs online on this node.
///
/// Unlike `num_cpus::get`, the count ignores the affinity mask and cgroup quota of the
/// calling process, since the node's CPUs are split among all the processes sharing it.
#[cfg(target_os = "linux")]
pub fn online_cpus() -> usize {
    use nix::unistd::{SysconfVar, sysconf};

    match sysconf(SysconfVar::_NPROCESSORS_ONLN) {
        Ok(Some(cpus)) if cpus > 0 => cpus as usize,
        _ => num_cpus::get(),
    }
}

/// The logical CPUs online on this node.
#[cfg(not(target_os = "linux"))]
pub fn online_cpus() -> usize {
    num_cpus::get()
}

/// Binds threads through the operating system scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsBinder;

#[cfg(target_os = "linux")]
impl CpuBinder for OsBinder {
    fn bind(&self, cpus: &[CpuId]) -> io::Result<()> {
        use nix::{
            sched::{CpuSet, sched_setaffinity},
            unistd::Pid,
        };

        let mut set = CpuSet::new();
        for &cpu in cpus {
            set.set(cpu)?;
        }

        // Pid 0 is the calling thread.
        sched_setaffinity(Pid::from_raw(0), &set)?;
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl CpuBinder for OsBinder {
    fn bind(&self, _cpus: &[CpuId]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "thread affinity is only supported on linux",
        ))
    }
}
