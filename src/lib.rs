//! Split large media files into store-mode RAR volumes and keep track of how
//! complete each file's archive is.

pub mod deleter;
pub mod inventory;
pub mod outside;
pub mod paths;
pub mod result;
pub mod service;
pub mod settings;
pub mod supervisor;
pub mod types;
mod utils;

#[cfg(test)]
mod testing;

pub use result::{Error, Result};
pub use service::{ArchiveService, BatchStarted, DeleteMode, DeleteSummary};
pub use settings::Settings;
