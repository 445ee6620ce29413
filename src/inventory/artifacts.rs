use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic};
use regex::Regex;

use super::{read_entries, DirEntryInfo};
use crate::result::Result;

/// The archive volumes currently present on disk for one media file.
///
/// For a media file `P` the recognized names are `P.rar` and `P.part<N>.rar`.
/// Their `.tmp` suffixed variants are leftovers of an interrupted run: they
/// are kept apart and only ever considered for deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    volumes: Vec<PathBuf>,
    volumes_size: u64,
    temporaries: Vec<PathBuf>,
}

impl ArtifactSet {
    /// Look for the artifacts of the media file in its directory
    pub fn locate(media: &Path) -> Result<Self> {
        let (Some(dir), Some(name)) = (media.parent(), media.file_name().and_then(|n| n.to_str()))
        else {
            return Ok(Self::default());
        };

        let entries = match read_entries(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => Err(err)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not list directory {}", dir.display()))?,
        };

        Self::from_entries(name, &entries)
    }

    /// Select the artifacts of `media_name` among already listed directory entries
    pub(crate) fn from_entries(media_name: &str, entries: &[DirEntryInfo]) -> Result<Self> {
        let pattern = format!(
            r"^{}\.(?:part(?P<part>[0-9]+)\.)?rar(?P<tmp>\.tmp)?$",
            regex::escape(media_name)
        );
        let re = Regex::new(&pattern).into_diagnostic()?;

        let mut volumes = vec![];
        let mut temporaries = vec![];
        for entry in entries.iter().filter(|entry| entry.is_file()) {
            let Some(cap) = re.captures(&entry.name) else {
                continue;
            };

            // The single volume form sorts before any numbered part
            let part = cap
                .name("part")
                .map(|n| n.as_str().parse::<u64>().unwrap_or(u64::MAX));
            let key = (part, entry.name.as_str());

            if cap.name("tmp").is_some() {
                temporaries.push((key, entry));
            } else {
                volumes.push((key, entry));
            }
        }
        volumes.sort_by(|(a, _), (b, _)| a.cmp(b));
        temporaries.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(Self {
            volumes_size: volumes.iter().map(|(_, entry)| entry.size).sum(),
            volumes: volumes.into_iter().map(|(_, e)| e.path.clone()).collect(),
            temporaries: temporaries.into_iter().map(|(_, e)| e.path.clone()).collect(),
        })
    }

    /// The counted archive volumes, single volume first then parts in order
    pub fn volumes(&self) -> &[PathBuf] {
        &self.volumes
    }

    pub fn temporaries(&self) -> &[PathBuf] {
        &self.temporaries
    }

    /// Total size of the counted volumes. Temporaries are never included.
    pub fn total_size(&self) -> u64 {
        self.volumes_size
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Whether there is nothing at all to clean up
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.temporaries.is_empty()
    }

    /// Every file that a cleanup of this media file's archive must remove
    pub fn deletion_candidates(&self) -> impl Iterator<Item = &Path> {
        self.volumes
            .iter()
            .chain(self.temporaries.iter())
            .map(PathBuf::as_path)
    }
}
