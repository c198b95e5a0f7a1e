mod output;
mod points;
mod source;

pub use output::{write_assignment_file, write_assignments};
pub use points::{CenterSet, PointSet};
pub use source::{BinaryPointFile, ByteOrder, PointSource, write_points};
