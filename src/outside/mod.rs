mod command;
mod rar;

pub use command::{run_command, Capture};
pub use rar::{ArchiveProcess, Archiver, OutputLines, Rar, RAR};
