use std::{
    fs, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    deleter::{rar_files_in, ResilientDeleter},
    inventory::{ArtifactSet, Inventory, Listing},
    outside::Archiver,
    paths::ManagedRoot,
    result::{Error, Result},
    settings::Settings,
    supervisor::{BatchStatus, CancelOutcome, Supervisor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStarted {
    pub accepted: bool,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "path")]
pub enum DeleteMode {
    /// Every artifact of one media file, temporaries included
    Single(String),
    /// Every `*.rar` file directly inside a directory
    AllInDirectory(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub deleted_count: usize,
}

/// Entry point of the core, the narrow interface request handlers call.
#[derive(Debug)]
pub struct ArchiveService {
    root: ManagedRoot,
    inventory: Inventory,
    deleter: ResilientDeleter,
    supervisor: Supervisor,
    include_subtitles: Arc<AtomicBool>,
}

impl ArchiveService {
    pub fn new(settings: &Settings) -> Result<Self> {
        let archiver = Arc::new(settings.archiver()?);
        Self::with_archiver(settings, archiver)
    }

    /// Build the service around a specific archiver
    pub fn with_archiver(settings: &Settings, archiver: Arc<dyn Archiver>) -> Result<Self> {
        let root = ManagedRoot::new(&settings.root)?;
        let deleter = settings.deleter();
        let include_subtitles = Arc::new(AtomicBool::new(settings.include_subtitles));

        Ok(Self {
            inventory: Inventory::new(root.clone(), settings.extensions()),
            supervisor: Supervisor::new(
                root.clone(),
                archiver,
                deleter.clone(),
                include_subtitles.clone(),
            ),
            root,
            deleter,
            include_subtitles,
        })
    }

    pub fn root(&self) -> &ManagedRoot {
        &self.root
    }

    pub fn start_batch(&self, files: Vec<String>) -> Result<BatchStarted> {
        let count = self.supervisor.start(files)?;
        Ok(BatchStarted {
            accepted: true,
            count,
        })
    }

    pub fn cancel_batch(&self) -> CancelOutcome {
        self.supervisor.cancel()
    }

    pub fn batch_status(&self) -> BatchStatus {
        self.supervisor.status()
    }

    /// Wait for the running batch, if any, to end
    pub fn wait(&self) {
        self.supervisor.join()
    }

    pub fn list_directory(&self, subpath: &str, include_subtitles: bool) -> Result<Listing> {
        self.inventory.list(subpath, include_subtitles)
    }

    pub fn include_subtitles(&self) -> bool {
        self.include_subtitles.load(Ordering::Relaxed)
    }

    /// Change whether subtitles are archived. Applies from the next file of
    /// a running batch.
    pub fn set_include_subtitles(&self, include: bool) {
        self.include_subtitles.store(include, Ordering::Relaxed);
    }

    pub fn delete_artifacts(&self, mode: DeleteMode) -> Result<DeleteSummary> {
        let deleted_count = match &mode {
            DeleteMode::Single(path) => {
                let media = self.root.resolve(path)?;
                if !self.inventory.extensions().matches(&media) {
                    return Err(Error::WrongType {
                        path: path.clone(),
                        expected: "a media file",
                    });
                }

                let artifacts = ArtifactSet::locate(&media)?;
                self.deleter.delete_all(artifacts.deletion_candidates())
            }
            DeleteMode::AllInDirectory(path) => {
                let dir = self.root.resolve(path)?;
                match fs::metadata(&dir) {
                    Ok(metadata) if metadata.is_dir() => {}
                    Ok(_) => {
                        return Err(Error::WrongType {
                            path: path.clone(),
                            expected: "a directory",
                        })
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        return Err(Error::NotFound(path.clone()))
                    }
                    Err(err) => Err(err)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("Could not access {}", dir.display()))?,
                }

                let files = rar_files_in(&dir)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("Could not list directory {}", dir.display()))?;
                self.deleter.delete_all(files.iter().map(|p| p.as_path()))
            }
        };

        info!("{mode:?}: {deleted_count} file(s) deleted");
        Ok(DeleteSummary { deleted_count })
    }
}
