use std::fmt::Display;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A byte count displayed in mebibytes with one decimal, e.g. `953.7MB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Megabytes(pub u64);

impl Display for Megabytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}MB", self.0 as f64 / BYTES_PER_MB)
    }
}
