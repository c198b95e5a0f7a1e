//! The clustering loop: reset, local work, intra-process fold, inter-process reduction,
//! center update, until convergence or the iteration cap.

use std::{
    mem,
    ops::Range,
    time::{Duration, Instant},
};

use comms::{Communicator, ReduceOp};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    affinity::Affinity,
    clustering::{self, Accumulator, MAX_CENTERS, UNASSIGNED},
    config::ClusteringParams,
    data::{CenterSet, PointSet},
    decomposition::DecompositionPlan,
    error::{KMeansErr, Result},
};

/// The fastest and slowest thread's accumulated local work time, across all processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComputeTimes {
    pub min: Duration,
    pub max: Duration,
}

/// The result of a clustering run on one process.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The final centers, identical on every process.
    pub centers: CenterSet,
    /// The center of every local point, `UNASSIGNED` if no iteration ran.
    pub assignments: Vec<u32>,
    pub iterations: usize,
    pub converged: bool,
    /// The largest center displacement of the last iteration.
    pub max_displacement: f64,
    pub compute: ComputeTimes,
    /// Wall time of the iteration loop on this process.
    pub elapsed: Duration,
    /// Wall time of the iteration loop averaged over every process.
    pub mean_elapsed: Duration,
}

/// Runs K-Means over the points of this process, cooperating with the rest of the group.
pub struct Engine<C: Communicator> {
    params: ClusteringParams,
    plan: DecompositionPlan,
    comm: C,
    pool: ThreadPool,
}

impl<C: Communicator> Engine<C> {
    /// Creates a new `Engine` and starts its worker threads.
    ///
    /// # Arguments
    /// * `params` - The clustering parameters, identical on every process.
    /// * `plan` - The point ranges of this process and its threads.
    /// * `comm` - The process group.
    /// * `affinity` - The CPU sets to bind the worker threads to, `None` to let them float.
    ///
    /// # Returns
    /// A `KMeansErr` if the plan doesn't match the group or the pool can't be started.
    pub fn new(
        params: ClusteringParams,
        plan: DecompositionPlan,
        comm: C,
        affinity: Option<Affinity>,
    ) -> Result<Self> {
        if plan.counts().len() != comm.size() {
            return Err(KMeansErr::Config(format!(
                "the decomposition is for {} processes but the group has {}",
                plan.counts().len(),
                comm.size()
            )));
        }

        if params.num_centers > MAX_CENTERS {
            return Err(KMeansErr::Config(format!(
                "at most {MAX_CENTERS} centers are supported, got {}",
                params.num_centers
            )));
        }

        let pool = build_pool(plan.thread_ranges().len(), affinity)?;

        Ok(Self {
            params,
            plan,
            comm,
            pool,
        })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn plan(&self) -> &DecompositionPlan {
        &self.plan
    }

    /// Iterates until every center moves at most the error threshold or the iteration cap
    /// is reached, whichever comes first.
    ///
    /// Every process of the group must call `run` with the same initial centers.
    ///
    /// # Arguments
    /// * `points` - The points of this process, as given by the plan.
    /// * `centers` - The initial centers.
    ///
    /// # Returns
    /// The `Outcome` of the run, or a `KMeansErr` if the inputs don't match the parameters
    /// or a collective fails.
    pub fn run(&mut self, points: &PointSet, mut centers: CenterSet) -> Result<Outcome> {
        self.check_inputs(points, &centers)?;

        let ClusteringParams {
            dimension,
            num_centers,
            error_threshold,
            max_iterations,
        } = self.params;

        let threads = self.plan.thread_ranges().len();
        let mut labels = vec![UNASSIGNED; points.len()];
        let mut accs = vec![Accumulator::new(num_centers, dimension); threads];
        let mut busy = vec![Duration::ZERO; threads];

        let mut iterations = 0;
        let mut converged = false;
        let mut max_displacement = 0.;

        if num_centers == 0 {
            self.log(|| info!("no centers to compute, skipping the iterations"));
            return Ok(Outcome {
                centers,
                assignments: labels,
                iterations,
                converged: true,
                max_displacement,
                compute: ComputeTimes::default(),
                elapsed: Duration::ZERO,
                mean_elapsed: Duration::ZERO,
            });
        }

        self.log(|| info!("computing k-means"));
        let started = Instant::now();

        while !converged && iterations < max_iterations {
            iterations += 1;

            accs.iter_mut().for_each(Accumulator::reset);
            self.local_work(points, &centers, &mut labels, &mut accs, &mut busy);

            let acc = clustering::fold_threads(&mut accs)?;
            clustering::all_reduce(&mut self.comm, acc)?;

            let report = clustering::update_centers(acc, &mut centers, error_threshold);
            debug!(
                iteration = iterations,
                max_displacement = report.max_displacement,
                empty_clusters = report.empty_clusters;
                "centers updated"
            );

            converged = report.converged;
            max_displacement = report.max_displacement;
        }

        let elapsed = started.elapsed();
        let mean_elapsed = self.mean_elapsed(elapsed)?;
        let compute = self.compute_times(&busy)?;

        if !converged {
            self.log(|| info!("stopping k-means as max iteration count {max_iterations} has been reached"));
        }

        self.log(|| {
            info!(
                "done in {iterations} iterations and {} ms on average across all processes, compute time ms (across all threads and procs) min {} max {} diff {}",
                mean_elapsed.as_millis(),
                compute.min.as_millis(),
                compute.max.as_millis(),
                compute.max.saturating_sub(compute.min).as_millis(),
            )
        });

        Ok(Outcome {
            centers,
            assignments: labels,
            iterations,
            converged,
            max_displacement,
            compute,
            elapsed,
            mean_elapsed,
        })
    }

    /// Gathers the assignments of every process, in global point order.
    ///
    /// # Arguments
    /// * `local` - The assignments of this process' points.
    pub fn gather_assignments(&mut self, local: &[u32]) -> Result<Vec<u32>> {
        self.log(|| info!("gathering cluster assignments"));
        let started = Instant::now();

        let labels = self
            .comm
            .all_gather(local, self.plan.counts())
            .map_err(KMeansErr::Comm)?;

        self.log(|| info!("gathered in {} ms", started.elapsed().as_millis()));
        Ok(labels)
    }

    /// Leaves the process group once every process is done.
    pub fn finalize(mut self) -> Result<()> {
        self.comm.finalize().map_err(KMeansErr::Comm)
    }

    /// Leaves the process group after a failure, handing `err` to the other processes.
    pub fn abort(mut self, err: &KMeansErr) {
        if let Err(e) = self.comm.abort(&err.to_string()) {
            warn!("failed to notify the process group: {e}");
        }
    }

    fn check_inputs(&self, points: &PointSet, centers: &CenterSet) -> Result<()> {
        let checks = [
            ("first point", points.offset(), self.plan.process_range().start),
            ("local points", points.len(), self.plan.local_points()),
            ("point dimension", points.dimension(), self.params.dimension),
            ("centers", centers.len(), self.params.num_centers),
            ("center dimension", centers.dimension(), self.params.dimension),
        ];

        match checks.into_iter().find(|(_, got, expected)| got != expected) {
            Some((what, got, expected)) => Err(KMeansErr::SizeMismatch {
                what,
                got,
                expected,
            }),
            None => Ok(()),
        }
    }

    /// Runs every thread's assignment over its own range and waits for all of them.
    ///
    /// Range `t` always runs on pool worker `t`, the one bound to the CPU set of thread `t`.
    fn local_work(
        &self,
        points: &PointSet,
        centers: &CenterSet,
        labels: &mut [u32],
        accs: &mut [Accumulator],
        busy: &mut [Duration],
    ) {
        let ranges = self.plan.thread_ranges();
        let slots: Vec<_> = accs
            .iter_mut()
            .zip(busy.iter_mut())
            .zip(split_by_ranges(labels, ranges))
            .zip(ranges.iter().cloned())
            .collect();

        on_own_worker(&self.pool, slots, |(((acc, busy), labels), range)| {
            let started = Instant::now();
            clustering::assign_and_accumulate(points, centers, range, labels, acc);
            *busy += started.elapsed();
        });
    }

    fn mean_elapsed(&mut self, elapsed: Duration) -> Result<Duration> {
        let size = self.comm.size();
        if size == 1 {
            return Ok(elapsed);
        }

        let mut total = [elapsed.as_secs_f64()];
        self.comm
            .all_reduce(&mut total, ReduceOp::Sum)
            .map_err(KMeansErr::Comm)?;

        Ok(Duration::from_secs_f64(total[0] / size as f64))
    }

    fn compute_times(&mut self, busy: &[Duration]) -> Result<ComputeTimes> {
        let secs = busy.iter().map(Duration::as_secs_f64);
        let mut min = [secs.clone().fold(f64::INFINITY, f64::min)];
        let mut max = [secs.fold(0., f64::max)];

        if self.comm.size() > 1 {
            self.comm
                .all_reduce(&mut min, ReduceOp::Min)
                .map_err(KMeansErr::Comm)?;
            self.comm
                .all_reduce(&mut max, ReduceOp::Max)
                .map_err(KMeansErr::Comm)?;
        }

        Ok(ComputeTimes {
            min: Duration::from_secs_f64(min[0]),
            max: Duration::from_secs_f64(max[0]),
        })
    }

    /// Logs only on rank 0, the other processes would repeat the same lines.
    fn log<F: FnOnce()>(&self, f: F) {
        if self.comm.rank() == 0 {
            f();
        }
    }
}

fn build_pool(threads: usize, affinity: Option<Affinity>) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("kmeans-{idx}"));

    if let Some(affinity) = affinity {
        builder = builder.start_handler(move |idx| affinity.apply(idx));
    }

    let pool = builder.build()?;

    // Wait for every worker to start, and so to be bound, before the first iteration.
    pool.broadcast(|_| ());

    Ok(pool)
}

/// Splits `labels` into one mutable slice per range, ranges must be contiguous from 0.
fn split_by_ranges<'a>(mut labels: &'a mut [u32], ranges: &[Range<usize>]) -> Vec<&'a mut [u32]> {
    ranges
        .iter()
        .map(|range| {
            let (head, tail) = mem::take(&mut labels).split_at_mut(range.len());
            labels = tail;
            head
        })
        .collect()
}

/// Runs `f` once per slot, slot `i` on pool worker `i`, and waits for all of them.
///
/// The pool must have exactly one worker per slot.
fn on_own_worker<T, F>(pool: &ThreadPool, slots: Vec<T>, f: F)
where
    T: Send,
    F: Fn(T) + Sync,
{
    debug_assert_eq!(pool.current_num_threads(), slots.len());

    let slots: Vec<_> = slots.into_iter().map(|slot| Mutex::new(Some(slot))).collect();

    pool.broadcast(|ctx| {
        // Each worker locks its own slot only, the lock is never contended.
        let slot = slots.get(ctx.index()).and_then(|slot| slot.lock().take());

        if let Some(slot) = slot {
            f(slot);
        }
    });
}
