mod cli;
mod logging;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use clap::Parser;
use miette::{miette, IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use rarsplit::{
    inventory::{Listing, SplitStatus},
    supervisor::CancelOutcome,
    ArchiveService, DeleteMode, Settings,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, error, info, warn, Level};

use crate::{
    cli::{Action, Args},
    logging::init_logging,
};

/// How often a running batch is polled
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(root) = args.root {
        settings.root = root;
    }

    let level = match args.verbose {
        0 => settings.log_level()?,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    init_logging(level)?;
    debug!("{settings:?}");

    let service = ArchiveService::new(&settings)?;
    debug!("Managed root: {}", service.root().path().display());

    match args.command {
        Action::List {
            path,
            no_subtitles,
            json,
        } => {
            let listing = service.list_directory(&path, !no_subtitles && service.include_subtitles())?;
            if json {
                let out = serde_json::to_string_pretty(&listing).into_diagnostic()?;
                println!("{out}");
            } else {
                print_listing(&listing);
            }
        }
        Action::Split { paths } => split(&service, paths)?,
        Action::Delete { path, all } => {
            let mode = if all {
                DeleteMode::AllInDirectory(path)
            } else {
                DeleteMode::Single(path)
            };
            let summary = service.delete_artifacts(mode)?;
            println!("{} file(s) deleted", summary.deleted_count);
        }
    }

    Ok(())
}

/// Run a batch to its end, forwarding termination signals as a cancellation
fn split(service: &ArchiveService, paths: Vec<String>) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, interrupted.clone()).into_diagnostic()?;
    }

    let started = service.start_batch(paths)?;
    info!("{} file(s) queued", started.count);

    let mut current = None;
    let mut last_output = String::new();
    loop {
        if interrupted.swap(false, Ordering::Relaxed)
            && service.cancel_batch() == CancelOutcome::Requested
        {
            warn!("Cancelling the batch");
        }

        let status = service.batch_status();
        if status.current_file != current {
            if let Some(file) = &status.current_file {
                info!(
                    "[{}/{}] {file}",
                    status.processed_files + 1,
                    status.total_files
                );
            }
            current = status.current_file.clone();
        }
        if status.last_output != last_output {
            info!("{}", status.last_output);
            last_output = status.last_output.clone();
        }

        if !status.is_running {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    service.wait();

    let status = service.batch_status();
    for failure in &status.failures {
        error!("{}: {:?}", failure.file, failure.reason);
    }
    info!(
        "{} of {} file(s) processed",
        status.processed_files, status.total_files
    );

    if status.failures.is_empty() && status.processed_files == status.total_files {
        Ok(())
    } else {
        Err(miette!(
            "{} file(s) failed, {} not processed",
            status.failures.len(),
            status.total_files - status.processed_files
        ))
    }
}

fn print_listing(listing: &Listing) {
    println!("/{}", listing.current_path);

    for folder in &listing.folders {
        println!("  {}/", folder.name.blue());
    }

    for file in &listing.files {
        let status = match file.status {
            SplitStatus::Split => format!("{:<7}", "SPLIT").green().to_string(),
            SplitStatus::Partial => format!("{:<7}", "PARTIAL").red().to_string(),
            SplitStatus::None => format!("{:<7}", "NONE").dimmed().to_string(),
        };
        println!(
            "  {status} {:<22} {:>3} vol  {}",
            file.size_info, file.volume_count, file.name
        );
    }
}
