mod extension;
mod size;

pub use extension::MediaExtensions;
pub use size::Megabytes;
