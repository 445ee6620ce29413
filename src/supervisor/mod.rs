mod state;

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::RecvTimeoutError;
use miette::{miette, Context, IntoDiagnostic};
use state::BatchJob;
pub use state::{BatchStatus, CancelOutcome, FailureReason, FileFailure};
use tracing::{debug, error, info, trace, warn};

use crate::{
    deleter::ResilientDeleter,
    inventory::{find_companions, ArtifactSet},
    outside::{Archiver, OutputLines},
    paths::ManagedRoot,
    result::{Error, Result},
    utils::MutexUtils,
};

/// How often the archiver process is checked for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to keep reading output still in the pipes once the process exited
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// Owner of the single batch job.
///
/// A batch archives its files one after the other on a dedicated worker
/// thread. Callers start it, poll its status and cancel it; every access to
/// the job state goes through one mutex that is never held while waiting on
/// the archiver.
#[derive(Debug)]
pub struct Supervisor {
    worker: Arc<Worker>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct Worker {
    job: Mutex<BatchJob>,
    root: ManagedRoot,
    archiver: Arc<dyn Archiver>,
    deleter: ResilientDeleter,
    include_subtitles: Arc<AtomicBool>,
}

/// What became of one file of the batch
enum Step {
    /// Cancellation was requested before the file was started
    Stop,
    Done(std::result::Result<(), FailureReason>),
}

impl Supervisor {
    pub fn new(
        root: ManagedRoot,
        archiver: Arc<dyn Archiver>,
        deleter: ResilientDeleter,
        include_subtitles: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                job: Mutex::new(BatchJob::default()),
                root,
                archiver,
                deleter,
                include_subtitles,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start archiving the root-relative `files` in order, in the background.
    ///
    /// Returns the number of queued files once the job is running; the batch
    /// itself is followed with [`Supervisor::status`].
    pub fn start(&self, files: Vec<String>) -> Result<usize> {
        let count = files.len();
        self.worker.job.with_lock(|mut job| {
            if job.running {
                return Err(Error::AlreadyRunning);
            }
            if files.is_empty() {
                return Err(Error::EmptyInput);
            }
            job.begin(count);
            Ok(())
        })?;

        let worker = self.worker.clone();
        let spawned = thread::Builder::new()
            .name("batch-worker".to_owned())
            .spawn(move || worker.run(files));

        match spawned {
            Ok(handle) => {
                self.handle.with_lock(|mut slot| *slot = Some(handle));
                Ok(count)
            }
            Err(err) => {
                self.worker.job.with_lock(|mut job| job.finish());
                Err(err)
                    .into_diagnostic()
                    .wrap_err("Could not spawn the batch worker")
                    .map_err(Error::from)
            }
        }
    }

    /// Stop the batch before its next file and kill the running archiver, if any
    pub fn cancel(&self) -> CancelOutcome {
        self.worker.job.with_lock(|mut job| {
            if !job.running {
                return CancelOutcome::NotRunning;
            }

            job.cancel_requested = true;
            if let Some(process) = job.process.as_mut() {
                info!("Killing archiver process {} immediately", process.id());
                process.kill();
            }
            CancelOutcome::Requested
        })
    }

    pub fn status(&self) -> BatchStatus {
        self.worker.job.with_lock(|job| job.snapshot())
    }

    /// Block until the last started batch has ended
    pub fn join(&self) {
        let handle = self.handle.with_lock(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("The batch worker panicked");
            }
        }
    }
}

/// Resets the job to idle however the worker loop is left
struct IdleOnDrop<'a>(&'a Mutex<BatchJob>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.with_lock(|mut job| job.finish());
    }
}

impl Worker {
    fn run(&self, files: Vec<String>) {
        let _idle = IdleOnDrop(&self.job);
        info!("Batch of {} file(s) started", files.len());

        for file in &files {
            let outcome = match self.archive(file) {
                Step::Stop => {
                    info!("Cancellation requested, stopping before '{file}'");
                    break;
                }
                Step::Done(outcome) => outcome,
            };

            self.job.with_lock(|mut job| {
                job.processed += 1;
                if let Err(reason) = outcome {
                    job.failures.push(FileFailure {
                        file: file.clone(),
                        reason,
                    });
                }
            });
        }

        info!("Batch ended");
    }

    fn archive(&self, file: &str) -> Step {
        let cancelled = self.job.with_lock(|mut job| {
            if !job.cancel_requested {
                job.current_file = Some(file.to_owned());
            }
            job.cancel_requested
        });
        if cancelled {
            return Step::Stop;
        }

        let media = match self.root.resolve(file) {
            Ok(media) => media,
            Err(err) => {
                warn!("{err}. Skipping it");
                return Step::Done(Err(FailureReason::Forbidden));
            }
        };
        if !media.is_file() {
            warn!("File not found: {}", media.display());
            return Step::Done(Err(FailureReason::Missing));
        }

        self.clean_stale_artifacts(&media);

        let companions = if self.include_subtitles.load(Ordering::Relaxed) {
            find_companions(&media).unwrap_or_else(|err| {
                warn!("Could not look for subtitles of {}: {err}", media.display());
                vec![]
            })
        } else {
            vec![]
        };
        debug!("{} companion(s) for '{file}'", companions.len());

        let lines = match self.spawn_unless_cancelled(file, &media, &companions) {
            None => return Step::Stop,
            Some(Ok(lines)) => lines,
            Some(Err(err)) => {
                warn!("Could not start archiving '{file}': {err}");
                return Step::Done(Err(FailureReason::ToolError {
                    message: err.to_string(),
                }));
            }
        };

        let exit = self.follow(&lines);

        let (process, cancelled) =
            self.job.with_lock(|mut job| (job.process.take(), job.cancel_requested));
        if let (Some(mut process), Err(_)) = (process, &exit) {
            process.kill_and_reap();
        }

        match exit {
            Ok(status) if status.success() => {
                info!("Archived '{file}'");
                Step::Done(Ok(()))
            }
            Ok(_) if cancelled => {
                warn!("Archiving '{file}' was interrupted");
                Step::Done(Err(FailureReason::Interrupted))
            }
            Ok(status) => {
                warn!("Archiving '{file}' failed: rar {status}");
                Step::Done(Err(FailureReason::ToolFailed {
                    exit_code: status.code(),
                }))
            }
            Err(err) => {
                error!("Lost track of the archiver for '{file}': {err}");
                Step::Done(Err(FailureReason::ToolError {
                    message: err.to_string(),
                }))
            }
        }
    }

    /// Start the archiver unless a cancel came in first.
    ///
    /// The check and the spawn share one lock: a cancel either happens before
    /// and is seen here, or after and finds the process to kill.
    fn spawn_unless_cancelled(
        &self,
        file: &str,
        media: &Path,
        companions: &[PathBuf],
    ) -> Option<Result<OutputLines>> {
        self.job.with_lock(|mut job| {
            if job.cancel_requested {
                debug!("Cancelled before archiving '{file}'");
                return None;
            }
            Some(
                self.archiver
                    .spawn(media, companions)
                    .map(|(process, lines)| {
                        info!("Archiving '{file}' (pid {})", process.id());
                        job.process = Some(process);
                        lines
                    }),
            )
        })
    }

    /// Remove what a previous run left for this file, volumes and temporaries
    fn clean_stale_artifacts(&self, media: &Path) {
        let artifacts = match ArtifactSet::locate(media) {
            Ok(artifacts) if artifacts.is_empty() => return,
            Ok(artifacts) => artifacts,
            Err(err) => {
                warn!(
                    "Could not look for stale artifacts of {}: {err}",
                    media.display()
                );
                return;
            }
        };

        info!("Cleaning up artifacts of {}", media.display());
        for path in artifacts.deletion_candidates() {
            if !self.deleter.delete(path).succeeded() {
                warn!("Stale artifact {} is still there", path.display());
            }
        }
    }

    /// Record the archiver output until the process exits
    fn follow(&self, lines: &OutputLines) -> Result<ExitStatus> {
        let mut streams_open = true;
        let mut next_check = Instant::now() + EXIT_POLL_INTERVAL;

        loop {
            if streams_open {
                match lines.recv_timeout(next_check.saturating_duration_since(Instant::now())) {
                    Ok(line) => {
                        self.record_output(line);
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else {
                thread::sleep(next_check.saturating_duration_since(Instant::now()));
            }
            next_check = Instant::now() + EXIT_POLL_INTERVAL;

            if let Some(status) = self.try_wait()? {
                while let Ok(line) = lines.recv_timeout(OUTPUT_GRACE) {
                    self.record_output(line);
                }
                return Ok(status);
            }
        }
    }

    fn try_wait(&self) -> Result<Option<ExitStatus>> {
        self.job.with_lock(|mut job| match job.process.as_mut() {
            Some(process) => process.try_wait(),
            None => Err(miette!("The archiver process handle is gone").into()),
        })
    }

    fn record_output(&self, line: String) {
        trace!("rar: {line}");
        self.job.with_lock(|mut job| job.last_output = line);
    }
}
