pub mod affinity;
pub mod clustering;
pub mod config;
pub mod data;
pub mod decomposition;
pub mod driver;
pub mod error;

pub use config::{ClusteringParams, KMeansConfig};
pub use decomposition::{DecompositionPlan, Topology};
pub use driver::{ComputeTimes, Engine, Outcome};
pub use error::{KMeansErr, Result};
