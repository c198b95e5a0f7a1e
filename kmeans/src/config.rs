use std::path::PathBuf;

use crate::{
    affinity,
    clustering::MAX_CENTERS,
    data::ByteOrder,
    error::{KMeansErr, Result},
};

pub const DEFAULT_MMAPS_PER_NODE: usize = 1;
pub const DEFAULT_MMAP_DIR: &str = "/dev/shm";

/// The numeric knobs of the clustering loop, shared by every process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringParams {
    pub dimension: usize,
    pub num_centers: usize,
    pub error_threshold: f64,
    pub max_iterations: usize,
}

/// Every option recognized at startup.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    pub num_points: usize,
    pub dimension: usize,
    pub num_centers: usize,
    pub error_threshold: f64,
    pub max_iterations: usize,
    pub big_endian: bool,
    pub num_threads: usize,
    pub centers_path: PathBuf,
    pub points_path: PathBuf,
    pub output_path: Option<PathBuf>,
    /// Shared memory maps per node for the node-local all-reduce.
    pub mmaps_per_node: usize,
    pub mmap_dir: PathBuf,
    pub bind_threads: bool,
    pub nodes: usize,
    /// Logical CPUs of each node, the online CPUs of this node if unset.
    pub cpus_per_node: Option<usize>,
}

impl KMeansConfig {
    /// Checks the options that can be validated without touching the environment.
    ///
    /// # Returns
    /// A `KMeansErr::Config` describing the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("dimension", self.dimension),
            ("threads", self.num_threads),
            ("nodes", self.nodes),
            ("mmaps per node", self.mmaps_per_node),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(KMeansErr::Config(format!("{name} must be positive")));
        }

        if self.cpus_per_node == Some(0) {
            return Err(KMeansErr::Config("cpus per node must be positive".into()));
        }

        if self.num_centers > MAX_CENTERS {
            return Err(KMeansErr::Config(format!(
                "at most {MAX_CENTERS} centers are supported, got {}",
                self.num_centers
            )));
        }

        if !self.error_threshold.is_finite() || self.error_threshold < 0. {
            return Err(KMeansErr::Config(format!(
                "error threshold must be a finite non negative number, got {}",
                self.error_threshold
            )));
        }

        Ok(())
    }

    /// The byte order of the points and centers files.
    pub fn byte_order(&self) -> ByteOrder {
        if self.big_endian {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// The logical CPUs of each node to split among its processes.
    pub fn cpus_per_node(&self) -> usize {
        self.cpus_per_node.unwrap_or_else(affinity::online_cpus)
    }

    pub fn params(&self) -> ClusteringParams {
        ClusteringParams {
            dimension: self.dimension,
            num_centers: self.num_centers,
            error_threshold: self.error_threshold,
            max_iterations: self.max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KMeansConfig {
        KMeansConfig {
            num_points: 8,
            dimension: 2,
            num_centers: 2,
            error_threshold: 0.001,
            max_iterations: 10,
            big_endian: true,
            num_threads: 2,
            centers_path: PathBuf::from("centers.bin"),
            points_path: PathBuf::from("points.bin"),
            output_path: None,
            mmaps_per_node: DEFAULT_MMAPS_PER_NODE,
            mmap_dir: PathBuf::from(DEFAULT_MMAP_DIR),
            bind_threads: true,
            nodes: 1,
            cpus_per_node: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config();
        config.validate().unwrap();
        assert_eq!(config.byte_order(), ByteOrder::Big);
        assert_eq!(config.params().num_centers, 2);
    }

    #[test]
    fn test_empty_problem_is_valid() {
        let config = KMeansConfig {
            num_points: 0,
            num_centers: 0,
            ..config()
        };

        config.validate().unwrap();
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        let config = KMeansConfig {
            num_threads: 0,
            ..config()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: threads must be positive");
    }

    #[test]
    fn test_cpus_per_node() {
        assert_eq!(config().cpus_per_node(), affinity::online_cpus());

        let zero = KMeansConfig {
            cpus_per_node: Some(0),
            ..config()
        };
        assert!(matches!(zero.validate(), Err(KMeansErr::Config(_))));

        let fixed = KMeansConfig {
            cpus_per_node: Some(48),
            ..config()
        };
        fixed.validate().unwrap();
        assert_eq!(fixed.cpus_per_node(), 48);
    }

    #[test]
    fn test_too_many_centers_are_rejected() {
        let too_many = KMeansConfig {
            num_centers: MAX_CENTERS + 1,
            ..config()
        };
        assert!(matches!(too_many.validate(), Err(KMeansErr::Config(_))));

        let most = KMeansConfig {
            num_centers: MAX_CENTERS,
            ..config()
        };
        most.validate().unwrap();
    }

    #[test]
    fn test_bad_threshold_is_rejected() {
        for threshold in [-1.0, f64::NAN, f64::INFINITY] {
            let config = KMeansConfig {
                error_threshold: threshold,
                ..config()
            };

            assert!(matches!(config.validate(), Err(KMeansErr::Config(_))));
        }
    }
}
