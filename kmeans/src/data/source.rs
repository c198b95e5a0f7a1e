use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom, Write},
    path::Path,
};

const VALUE_SIZE: usize = size_of::<f64>();

/// The layout of the numbers in a binary point file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    fn decode(self, bytes: [u8; VALUE_SIZE]) -> f64 {
        match self {
            ByteOrder::Big => f64::from_be_bytes(bytes),
            ByteOrder::Little => f64::from_le_bytes(bytes),
        }
    }

    fn encode(self, value: f64) -> [u8; VALUE_SIZE] {
        match self {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }
}

/// Supplies rows of D-dimensional points by index.
pub trait PointSource {
    /// The amount of coordinates of every row.
    fn dimension(&self) -> usize;

    /// Reads `count` rows starting at row `start`.
    ///
    /// # Returns
    /// The rows flattened in row-major order, or an `io::Error` if they aren't available.
    fn read_rows(&mut self, start: usize, count: usize) -> io::Result<Vec<f64>>;
}

/// A headerless file of row-major `f64` values.
#[derive(Debug)]
pub struct BinaryPointFile {
    file: BufReader<File>,
    dimension: usize,
    order: ByteOrder,
}

impl BinaryPointFile {
    /// Opens a point file.
    ///
    /// # Arguments
    /// * `path` - The file location.
    /// * `dimension` - The amount of values per row.
    /// * `order` - The byte order the values were written with.
    pub fn open<P: AsRef<Path>>(path: P, dimension: usize, order: ByteOrder) -> io::Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            file: BufReader::new(file),
            dimension,
            order,
        })
    }
}

impl PointSource for BinaryPointFile {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn read_rows(&mut self, start: usize, count: usize) -> io::Result<Vec<f64>> {
        let row_size = self.dimension * VALUE_SIZE;
        let mut bytes = vec![0; count * row_size];

        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        self.file.seek(SeekFrom::Start((start * row_size) as u64))?;
        self.file.read_exact(&mut bytes)?;

        let values = bytes
            .chunks_exact(VALUE_SIZE)
            // SAFETY: `chunks_exact` yields slices of exactly `VALUE_SIZE` bytes.
            .map(|chunk| self.order.decode(chunk.try_into().unwrap()))
            .collect();

        Ok(values)
    }
}

/// Writes row-major values in the layout read by `BinaryPointFile`.
///
/// # Arguments
/// * `out` - The destination.
/// * `values` - The flattened rows.
/// * `order` - The byte order to write the values with.
pub fn write_points<W: Write>(mut out: W, values: &[f64], order: ByteOrder) -> io::Result<()> {
    for &value in values {
        out.write_all(&order.encode(value))?;
    }

    out.flush()
}
