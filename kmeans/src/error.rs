use std::{error::Error, fmt, io};

/// The kmeans crate's result type.
pub type Result<T> = std::result::Result<T, KMeansErr>;

/// Failures that abort a clustering run.
#[derive(Debug)]
pub enum KMeansErr {
    /// Missing or invalid options, reported before any computation starts.
    Config(String),
    /// Reading points or centers, or writing the output, failed.
    Io(io::Error),
    /// A collective operation failed, the process group can't continue.
    Comm(io::Error),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ThreadPool(String),
}

impl fmt::Display for KMeansErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KMeansErr::Config(msg) => write!(f, "invalid configuration: {msg}"),
            KMeansErr::Io(e) => write!(f, "io error: {e}"),
            KMeansErr::Comm(e) => write!(f, "communication error: {e}"),
            KMeansErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} size mismatch: got {got}, expected {expected}"),
            KMeansErr::ThreadPool(msg) => write!(f, "thread pool error: {msg}"),
        }
    }
}

impl Error for KMeansErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            KMeansErr::Io(e) | KMeansErr::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for KMeansErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rayon::ThreadPoolBuildError> for KMeansErr {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<KMeansErr> for io::Error {
    fn from(value: KMeansErr) -> Self {
        match value {
            KMeansErr::Io(e) | KMeansErr::Comm(e) => e,
            KMeansErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
