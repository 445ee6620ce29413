use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("RARSPLIT_", $v)
    };
}

/// Split large media files into store-mode RAR volumes of just under 4 GiB,
/// and see which files of a directory are already fully archived.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// TOML settings file. Its values are overridden by the `RARSPLIT_*`
    /// environment variables, then by the command line
    #[arg(long, global = true, env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The directory every path is relative to
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Log more details, twice for everything
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Show the folders and media files of a directory with their archive status
    List {
        /// Directory to list, relative to the root
        #[arg(default_value = "")]
        path: String,

        /// Do not count the subtitles in the expected archive size
        #[arg(long)]
        no_subtitles: bool,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Archive media files one after the other.
    /// Ctrl-C cancels the batch and kills the running archiver.
    Split {
        /// Media files, relative to the root
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Delete archive volumes
    Delete {
        /// Media file whose volumes and leftovers are deleted, or directory with `--all`
        path: String,

        /// Delete every `.rar` file of the directory
        #[arg(long)]
        all: bool,
    },
}
