use std::{
    env, fs,
    fs::File,
    io,
    net::TcpListener,
    path::PathBuf,
    sync::Arc,
    thread,
};

use comms::{SoloComm, TcpComm};
use kmeans::{
    ClusteringParams, DecompositionPlan, Engine, KMeansErr, Outcome, Topology,
    affinity::{Affinity, AffinityPlan, CpuBinder, CpuId},
    clustering::UNASSIGNED,
    data::{self, BinaryPointFile, ByteOrder, CenterSet, PointSet},
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

const EIGHT_POINTS: [f64; 16] = [
    0.0, 0.0, 0.0, 2.0, 2.0, 0.0, 2.0, 2.0, //
    10.0, 10.0, 10.0, 12.0, 12.0, 10.0, 12.0, 12.0,
];

fn params(dimension: usize, num_centers: usize, max_iterations: usize) -> ClusteringParams {
    ClusteringParams {
        dimension,
        num_centers,
        error_threshold: 0.001,
        max_iterations,
    }
}

fn solo_run(values: &[f64], centers: &[f64], params: ClusteringParams, threads: usize) -> Outcome {
    let d = params.dimension;
    let topology = Topology::single(threads).unwrap();
    let plan = DecompositionPlan::new(values.len() / d, &topology);

    let points = PointSet::new(d, 0, values.to_vec()).unwrap();
    let centers = CenterSet::new(d, centers.to_vec()).unwrap();

    let mut engine = Engine::new(params, plan, SoloComm::new(), None).unwrap();
    engine.run(&points, centers).unwrap()
}

/// Integer coordinates around `k` seeds, so every partial sum is exact in any order.
fn clustered(seed: u64, n: usize, d: usize, k: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let seeds: Vec<Vec<i64>> = (0..k)
        .map(|_| (0..d).map(|_| rng.random_range(-1000..1000)).collect())
        .collect();

    (0..n)
        .flat_map(|i| {
            let seed = &seeds[i % k];
            seed.iter()
                .map(|&c| (c + rng.random_range(-50..50)) as f64)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn temp_path(name: &str) -> PathBuf {
    env::temp_dir().join(format!("kmeans-{}-{name}", std::process::id()))
}

#[test]
fn test_one_iteration_moves_centers_to_centroids() {
    let outcome = solo_run(&EIGHT_POINTS, &[0.0, 0.0, 12.0, 12.0], params(2, 2, 1), 2);

    assert_eq!(outcome.iterations, 1);
    assert!(!outcome.converged);
    assert_eq!(outcome.centers.as_slice(), &[1.0, 1.0, 11.0, 11.0]);
    assert_eq!(outcome.assignments, vec![0, 0, 0, 0, 1, 1, 1, 1]);
}

#[test]
fn test_converges_on_separated_clusters() {
    let outcome = solo_run(&EIGHT_POINTS, &[0.0, 0.0, 12.0, 12.0], params(2, 2, 100), 3);

    assert!(outcome.converged);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.max_displacement, 0.0);
    assert_eq!(outcome.centers.as_slice(), &[1.0, 1.0, 11.0, 11.0]);
    assert!(outcome.compute.min <= outcome.compute.max);
}

#[test]
fn test_zero_max_iterations() {
    let centers = [0.0, 0.0, 12.0, 12.0];
    let outcome = solo_run(&EIGHT_POINTS, &centers, params(2, 2, 0), 2);

    assert_eq!(outcome.iterations, 0);
    assert_eq!(outcome.centers.as_slice(), &centers);
    assert!(outcome.assignments.iter().all(|&l| l == UNASSIGNED));
}

#[test]
fn test_no_points_converges_immediately() {
    let centers = [1.0, 2.0, 3.0, 4.0];
    let outcome = solo_run(&[], &centers, params(2, 2, 10), 4);

    assert_eq!(outcome.iterations, 1);
    assert!(outcome.converged);
    assert_eq!(outcome.centers.as_slice(), &centers);
    assert!(outcome.assignments.is_empty());
}

#[test]
fn test_no_centers_skips_the_loop() {
    let outcome = solo_run(&EIGHT_POINTS, &[], params(2, 0, 10), 2);

    assert_eq!(outcome.iterations, 0);
    assert!(outcome.converged);
    assert!(outcome.centers.is_empty());
    assert_eq!(outcome.assignments, vec![UNASSIGNED; 8]);
}

#[test]
fn test_result_does_not_depend_on_thread_count() {
    let (n, d, k) = (997, 3, 5);
    let values = clustered(7, n, d, k);
    let centers = &values[..k * d];

    let expected = solo_run(&values, centers, params(d, k, 50), 1);

    for threads in [2, 3, 7] {
        let outcome = solo_run(&values, centers, params(d, k, 50), threads);
        assert_eq!(outcome.centers, expected.centers, "{threads} threads");
        assert_eq!(outcome.assignments, expected.assignments, "{threads} threads");
        assert_eq!(outcome.iterations, expected.iterations, "{threads} threads");
    }
}

#[test]
fn test_process_group_matches_single_process() {
    let (n, d, k, size, threads) = (500, 2, 4, 3, 2);
    let values = Arc::new(clustered(11, n, d, k));
    let centers = values[..k * d].to_vec();
    let expected = solo_run(&values, &centers, params(d, k, 50), 1);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let ranks: Vec<_> = (0..size)
        .map(|rank| {
            let values = Arc::clone(&values);
            let centers = centers.clone();
            let listener = (rank == 0).then(|| listener.try_clone().unwrap());

            thread::spawn(move || -> io::Result<(Outcome, Vec<u32>)> {
                let comm = match listener {
                    Some(listener) => TcpComm::root(listener, size)?,
                    None => TcpComm::join(addr, rank, size)?,
                };

                let topology = Topology::new(rank, size, 1, threads)?;
                let plan = DecompositionPlan::new(n, &topology);
                let range = plan.process_range();
                let points = PointSet::new(d, range.start, values[range.start * d..range.end * d].to_vec())?;
                let centers = CenterSet::new(d, centers)?;

                let mut engine = Engine::new(params(d, k, 50), plan, comm, None)?;
                let outcome = engine.run(&points, centers)?;
                let labels = engine.gather_assignments(&outcome.assignments)?;
                engine.finalize()?;

                Ok((outcome, labels))
            })
        })
        .collect();

    let mut mean_elapsed = Vec::new();
    for rank in ranks {
        let (outcome, labels) = rank.join().unwrap().unwrap();
        mean_elapsed.push(outcome.mean_elapsed);

        assert_eq!(outcome.centers, expected.centers);
        assert_eq!(outcome.iterations, expected.iterations);
        assert_eq!(outcome.converged, expected.converged);
        assert_eq!(labels, expected.assignments);
        assert!(outcome.compute.min <= outcome.compute.max);
    }

    assert!(mean_elapsed.iter().all(|&mean| mean == mean_elapsed[0]));
}

#[test]
fn test_failing_process_stops_the_group() {
    let (n, d, k, size) = (8, 2, 2, 2);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let leaf = thread::spawn(move || -> kmeans::Result<()> {
        let topology = Topology::new(1, size, 1, 1)?;
        let plan = DecompositionPlan::new(n, &topology);
        let comm = TcpComm::join(addr, 1, size)?;

        let engine = Engine::new(params(d, k, 10), plan, comm, None)?;
        engine.abort(&KMeansErr::Config("points file is missing".into()));
        Ok(())
    });

    let topology = Topology::new(0, size, 1, 1).unwrap();
    let plan = DecompositionPlan::new(n, &topology);
    let comm = TcpComm::root(listener, size).unwrap();
    let mut engine = Engine::new(params(d, k, 10), plan, comm, None).unwrap();

    let points = PointSet::new(d, 0, EIGHT_POINTS[..8].to_vec()).unwrap();
    let centers = CenterSet::new(d, vec![0.0, 0.0, 12.0, 12.0]).unwrap();
    let err = engine.run(&points, centers).unwrap_err();

    leaf.join().unwrap().unwrap();
    assert!(matches!(err, KMeansErr::Comm(_)));
    assert!(err.to_string().contains("rank 1 failed"));
    assert!(err.to_string().contains("points file is missing"));
}

#[test]
fn test_output_file_lists_every_point() {
    let (d, k) = (2, 2);
    let points_path = temp_path("points.bin");
    let output_path = temp_path("assignments.txt");
    data::write_points(File::create(&points_path).unwrap(), &EIGHT_POINTS, ByteOrder::Big).unwrap();

    let mut source = BinaryPointFile::open(&points_path, d, ByteOrder::Big).unwrap();
    let points = PointSet::load(&mut source, 0..8).unwrap();
    let centers = CenterSet::load(&mut source, k).unwrap();

    let topology = Topology::single(2).unwrap();
    let plan = DecompositionPlan::new(8, &topology);
    let mut engine = Engine::new(params(d, k, 10), plan, SoloComm::new(), None).unwrap();
    let outcome = engine.run(&points, centers).unwrap();
    let labels = engine.gather_assignments(&outcome.assignments).unwrap();

    data::write_assignment_file(&output_path, &mut source, &labels).unwrap();
    let text = fs::read_to_string(&output_path).unwrap();
    fs::remove_file(&points_path).ok();
    fs::remove_file(&output_path).ok();

    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 8);

    for (idx, line) in lines.iter().enumerate() {
        let fields: Vec<_> = line.split('\t').collect();
        assert_eq!(fields.len(), d + 2);
        assert_eq!(fields[0], idx.to_string());
        assert_eq!(fields[d + 1], labels[idx].to_string());
    }
}

#[derive(Default)]
struct RecordingBinder {
    /// The CPU set bound by each pool worker, with the worker's index.
    bound: Mutex<Vec<(Option<usize>, Vec<CpuId>)>>,
}

impl CpuBinder for RecordingBinder {
    fn bind(&self, cpus: &[CpuId]) -> io::Result<()> {
        self.bound.lock().push((rayon::current_thread_index(), cpus.to_vec()));
        Ok(())
    }
}

fn bound_sets(threads: usize, cpus: usize) -> Vec<(Option<usize>, Vec<CpuId>)> {
    let topology = Topology::single(threads).unwrap();
    let binder = Arc::new(RecordingBinder::default());
    let affinity = Affinity::new(AffinityPlan::new(&topology, cpus), binder.clone());

    let plan = DecompositionPlan::new(8, &topology);
    let mut engine = Engine::new(params(2, 2, 5), plan, SoloComm::new(), Some(affinity)).unwrap();

    let points = PointSet::new(2, 0, EIGHT_POINTS.to_vec()).unwrap();
    let centers = CenterSet::new(2, vec![0.0, 0.0, 12.0, 12.0]).unwrap();
    engine.run(&points, centers).unwrap();

    let mut bound = binder.bound.lock().clone();
    bound.sort();
    bound
}

#[test]
fn test_every_worker_is_bound_before_running() {
    assert_eq!(
        bound_sets(3, 6),
        vec![
            (Some(0), vec![0, 1]),
            (Some(1), vec![2, 3]),
            (Some(2), vec![4, 5]),
        ]
    );
}

#[test]
fn test_workers_without_cpus_float() {
    assert_eq!(bound_sets(4, 2), vec![(Some(0), vec![0]), (Some(1), vec![1])]);
}
