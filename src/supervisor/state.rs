use serde::Serialize;

use crate::outside::ArchiveProcess;

/// Why a file of the batch was not archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The file no longer exists
    Missing,
    /// The path resolves outside of the managed root
    Forbidden,
    /// The archiver could not be started or followed
    ToolError { message: String },
    /// The archiver exited unsuccessfully on its own.
    /// No exit code means it was killed by a signal.
    ToolFailed { exit_code: Option<i32> },
    /// The archiver was killed by a cancellation
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

/// Consistent view of the batch job at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStatus {
    pub is_running: bool,
    pub cancel_requested: bool,
    pub current_file: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
    pub last_output: String,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Requested,
    NotRunning,
}

/// The single batch job. Only ever accessed behind the supervisor mutex.
#[derive(Debug, Default)]
pub(super) struct BatchJob {
    pub running: bool,
    pub cancel_requested: bool,
    pub total: usize,
    pub processed: usize,
    pub current_file: Option<String>,
    pub last_output: String,
    pub process: Option<ArchiveProcess>,
    pub failures: Vec<FileFailure>,
}

impl BatchJob {
    pub fn begin(&mut self, total: usize) {
        self.running = true;
        self.cancel_requested = false;
        self.total = total;
        self.processed = 0;
        self.failures.clear();
    }

    /// Back to idle. The counters and the last output stay readable.
    pub fn finish(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill_and_reap();
        }
        self.running = false;
        self.current_file = None;
    }

    pub fn snapshot(&self) -> BatchStatus {
        BatchStatus {
            is_running: self.running,
            cancel_requested: self.cancel_requested,
            current_file: self.current_file.clone(),
            total_files: self.total,
            processed_files: self.processed,
            last_output: self.last_output.clone(),
            failures: self.failures.clone(),
        }
    }
}
