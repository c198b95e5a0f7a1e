use std::{
    env,
    io,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Instant,
};

use clap::{ArgAction, Parser};
use comms::{Communicator, SoloComm, TcpComm};
use env_logger::Env;
use log::info;

use kmeans::{
    DecompositionPlan, Engine, KMeansConfig, KMeansErr, Outcome, Result, Topology,
    affinity::{Affinity, AffinityPlan, OsBinder},
    config::{DEFAULT_MMAP_DIR, DEFAULT_MMAPS_PER_NODE},
    data::{self, BinaryPointFile, CenterSet, PointSet},
};

const WORLD_SIZE_VAR: &str = "KMEANS_WORLD_SIZE";
const RANK_VAR: &str = "KMEANS_RANK";
const ROOT_VAR: &str = "KMEANS_ROOT";

/// Hybrid multi-process and multi-thread K-Means.
#[derive(Parser, Debug)]
#[command(name = "kmeans")]
struct Args {
    /// Number of points
    #[arg(short = 'n')]
    num_points: usize,

    /// Dimensionality
    #[arg(short = 'd')]
    dimension: usize,

    /// Number of centers
    #[arg(short = 'k')]
    num_centers: usize,

    /// Error threshold
    #[arg(short = 't')]
    error_threshold: f64,

    /// Max iteration count
    #[arg(short = 'm')]
    max_iterations: usize,

    /// Is big-endian?
    #[arg(short = 'b', action = ArgAction::Set)]
    big_endian: bool,

    /// Number of threads
    #[arg(short = 'T')]
    num_threads: usize,

    /// Initial center file
    #[arg(short = 'c')]
    centers: PathBuf,

    /// Points file
    #[arg(short = 'p')]
    points: PathBuf,

    /// Cluster assignment output file
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// mmaps per node
    #[arg(long = "mmpn", default_value_t = DEFAULT_MMAPS_PER_NODE)]
    mmaps_per_node: usize,

    /// mmaps dir
    #[arg(long = "mmdir", default_value = DEFAULT_MMAP_DIR)]
    mmap_dir: PathBuf,

    /// Bind threads [true/false]
    #[arg(long = "bind", action = ArgAction::Set, default_value_t = true)]
    bind: bool,

    /// Number of nodes the processes are spread over
    #[arg(long = "nodes", default_value_t = 1)]
    nodes: usize,

    /// Logical CPUs per node, defaults to the online CPUs of this node
    #[arg(long = "cpus-per-node")]
    cpus_per_node: Option<usize>,
}

impl From<Args> for KMeansConfig {
    fn from(args: Args) -> Self {
        Self {
            num_points: args.num_points,
            dimension: args.dimension,
            num_centers: args.num_centers,
            error_threshold: args.error_threshold,
            max_iterations: args.max_iterations,
            big_endian: args.big_endian,
            num_threads: args.num_threads,
            centers_path: args.centers,
            points_path: args.points,
            output_path: args.output,
            mmaps_per_node: args.mmaps_per_node,
            mmap_dir: args.mmap_dir,
            bind_threads: args.bind,
            nodes: args.nodes,
            cpus_per_node: args.cpus_per_node,
        }
    }
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cfg = KMeansConfig::from(Args::parse());
    cfg.validate()?;

    let size = env_var(WORLD_SIZE_VAR, 1)?;
    let rank = env_var(RANK_VAR, 0)?;

    if size == 1 {
        return run(cfg, SoloComm::new());
    }

    let root = root_addr()?;
    let comm = if rank == 0 {
        TcpComm::bind(root, size)?
    } else {
        TcpComm::join(root, rank, size)?
    };

    run(cfg, comm)
}

fn run<C: Communicator>(cfg: KMeansConfig, comm: C) -> io::Result<()> {
    let main_timer = Instant::now();
    let topology = Topology::new(comm.rank(), comm.size(), cfg.nodes, cfg.num_threads)?;
    let plan = DecompositionPlan::new(cfg.num_points, &topology);
    let leader = topology.rank() == 0;

    if leader {
        info!(
            "{} processes on {} nodes, {} threads each, {} mmaps per node in {}",
            topology.size(),
            topology.nodes(),
            topology.threads(),
            cfg.mmaps_per_node,
            cfg.mmap_dir.display(),
        );
    }

    let affinity = cfg.bind_threads.then(|| {
        let plan = AffinityPlan::new(&topology, cfg.cpus_per_node());
        Affinity::new(plan, Arc::new(OsBinder))
    });

    let mut engine = Engine::new(cfg.params(), plan, comm, affinity)?;

    let outcome = match cluster(&cfg, &mut engine, leader) {
        Ok(outcome) => outcome,
        Err(e) => {
            engine.abort(&e);
            return Err(e.into());
        }
    };

    engine.finalize()?;

    if leader {
        info!(
            converged = outcome.converged,
            iterations = outcome.iterations;
            "program finished in {} ms",
            main_timer.elapsed().as_millis()
        );
    }

    Ok(())
}

/// Reads the inputs, clusters them and writes the assignments if asked to.
fn cluster<C: Communicator>(
    cfg: &KMeansConfig,
    engine: &mut Engine<C>,
    leader: bool,
) -> Result<Outcome> {
    let order = cfg.byte_order();

    let timer = Instant::now();
    let mut source = BinaryPointFile::open(&cfg.points_path, cfg.dimension, order)?;
    let points = PointSet::load(&mut source, engine.plan().process_range())?;
    if leader {
        info!("read points in {} ms", timer.elapsed().as_millis());
    }

    let timer = Instant::now();
    let mut centers_source = BinaryPointFile::open(&cfg.centers_path, cfg.dimension, order)?;
    let centers = CenterSet::load(&mut centers_source, cfg.num_centers)?;
    if leader {
        info!("read centers in {} ms", timer.elapsed().as_millis());
    }

    let outcome = engine.run(&points, centers)?;

    if let Some(path) = &cfg.output_path {
        let labels = engine.gather_assignments(&outcome.assignments)?;

        if leader {
            let timer = Instant::now();
            data::write_assignment_file(path, &mut source, &labels)?;
            info!(
                "wrote output file {} in {} ms",
                path.display(),
                timer.elapsed().as_millis()
            );
        }
    }

    Ok(outcome)
}

fn env_var<T: FromStr>(name: &str, default: T) -> io::Result<T> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| {
            KMeansErr::Config(format!("{name} must be a non negative integer, got {value}")).into()
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(io::Error::other(e)),
    }
}

fn root_addr() -> io::Result<SocketAddr> {
    let root = env::var(ROOT_VAR)
        .map_err(|_| KMeansErr::Config(format!("{ROOT_VAR} is required for more than one process")))?;

    root.to_socket_addrs()?
        .next()
        .ok_or_else(|| KMeansErr::Config(format!("{ROOT_VAR} {root} doesn't resolve")).into())
}
