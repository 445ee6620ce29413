mod artifacts;
mod companions;
mod status;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub use artifacts::ArtifactSet;
pub use companions::{find_companions, CompanionMatcher};
use miette::{Context, IntoDiagnostic};
use serde::Serialize;
pub use status::{SplitStatus, HEADER_OVERHEAD};
use tracing::{debug, trace};

use crate::{
    paths::{parent_of, ManagedRoot},
    result::{Error, Result},
    types::{MediaExtensions, Megabytes},
};

/// Content of one directory of the managed root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    /// Root-relative path of the listed directory, empty for the root
    pub current_path: String,
    /// Root-relative path of the parent directory, `None` at the root
    pub parent_path: Option<String>,
    pub folders: Vec<Folder>,
    pub files: Vec<MediaFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Folder {
    pub name: String,
    pub path: String,
}

/// A media file along with the state of its archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub name: String,
    pub path: String,
    pub status: SplitStatus,
    pub volume_count: usize,
    pub media_size: u64,
    pub archived_size: u64,
    pub expected_size: u64,
    pub companion_count: usize,
    /// Only reported when companions take part in the expected size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion_size: Option<u64>,
    /// `archived / expected` in MB, e.g. `953.7MB / 953.7MB`
    pub size_info: String,
}

/// Lists directories of the managed root and computes the archive status
/// of the media files they contain.
///
/// Nothing is cached: every listing reflects the disk at the time of the call.
#[derive(Debug, Clone)]
pub struct Inventory {
    root: ManagedRoot,
    extensions: MediaExtensions,
}

impl Inventory {
    pub fn new(root: ManagedRoot, extensions: MediaExtensions) -> Self {
        Self { root, extensions }
    }

    pub fn extensions(&self) -> &MediaExtensions {
        &self.extensions
    }

    /// List the folders and media files directly inside `subpath`.
    pub fn list(&self, subpath: &str, include_subtitles: bool) -> Result<Listing> {
        let dir = self.root.resolve(subpath)?;
        let current_path = self.root.relative(&dir).unwrap_or_default();

        match fs::metadata(&dir) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(current_path))
            }
            Err(err) => Err(err)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not access {}", dir.display()))?,
        }

        debug!("Listing '{}'", dir.display());
        let entries = read_entries(&dir)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not list directory {}", dir.display()))?;

        let mut folders = vec![];
        let mut files = vec![];
        for entry in &entries {
            match entry.kind {
                EntryKind::Dir => folders.push(Folder {
                    name: entry.name.clone(),
                    path: self.relative_path(entry),
                }),
                EntryKind::File if self.extensions.matches(&entry.name) => {
                    files.push(self.describe(entry, &entries, include_subtitles)?)
                }
                _ => {}
            }
        }

        folders.sort_by(|a, b| a.name.cmp(&b.name));
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Listing {
            parent_path: parent_of(&current_path),
            current_path,
            folders,
            files,
        })
    }

    fn describe(
        &self,
        media: &DirEntryInfo,
        siblings: &[DirEntryInfo],
        include_subtitles: bool,
    ) -> Result<MediaFile> {
        let companions = companions::companions_among(&media.name, siblings)?;
        let companion_size: u64 = companions.iter().map(|c| c.size).sum();
        let artifacts = ArtifactSet::from_entries(&media.name, siblings)?;

        let expected_size = if include_subtitles {
            media.size + companion_size
        } else {
            media.size
        };
        let status = SplitStatus::of(expected_size, &artifacts);

        trace!(
            "{}: {} bytes expected, {} bytes in {} volume(s) -> {status:?}",
            media.name,
            expected_size,
            artifacts.total_size(),
            artifacts.volume_count()
        );

        Ok(MediaFile {
            name: media.name.clone(),
            path: self.relative_path(media),
            status,
            volume_count: artifacts.volume_count(),
            media_size: media.size,
            archived_size: artifacts.total_size(),
            expected_size,
            companion_count: companions.len(),
            companion_size: include_subtitles.then_some(companion_size),
            size_info: format!(
                "{} / {}",
                Megabytes(artifacts.total_size()),
                Megabytes(expected_size)
            ),
        })
    }

    fn relative_path(&self, entry: &DirEntryInfo) -> String {
        self.root
            .relative(&entry.path)
            .unwrap_or_else(|| entry.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    File,
    Dir,
    Other,
}

/// One visible entry of a directory, symlinks followed
#[derive(Debug, Clone)]
pub(crate) struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

impl DirEntryInfo {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Read the entries of a directory, single level.
///
/// Hidden entries (leading dot) are skipped, as are names that are not valid
/// UTF-8 and dangling symlinks. An entry whose target cannot be inspected
/// (symlink loop, no permission) is neither a file nor a directory.
pub(crate) fn read_entries(dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = vec![];

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            debug!("Skipping non UTF-8 name {:?}", entry.file_name());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let (kind, size) = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => (EntryKind::Dir, metadata.len()),
            Ok(metadata) if metadata.is_file() => (EntryKind::File, metadata.len()),
            Ok(metadata) => (EntryKind::Other, metadata.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                debug!("Cannot inspect {}: {err}", path.display());
                (EntryKind::Other, 0)
            }
        };

        entries.push(DirEntryInfo {
            name,
            path,
            kind,
            size,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::{Inventory, SplitStatus};
    use crate::{paths::ManagedRoot, result::Error, types::MediaExtensions};

    fn write_sized(path: &Path, size: usize) {
        fs::write(path, vec![0u8; size]).unwrap();
    }

    fn inventory(root: &Path) -> Inventory {
        Inventory::new(
            ManagedRoot::new(root).unwrap(),
            MediaExtensions::new(["mkv", "mp4"]),
        )
    }

    #[test]
    fn single_volume_within_tolerance_is_split() {
        let dir = tempfile::tempdir().unwrap();
        write_sized(&dir.path().join("a.mkv"), 1_000_000);
        write_sized(&dir.path().join("a.mkv.rar"), 1_000_500);

        let listing = inventory(dir.path()).list("", false).unwrap();

        assert_eq!(listing.files.len(), 1);
        let file = &listing.files[0];
        assert_eq!(file.status, SplitStatus::Split);
        assert_eq!(file.volume_count, 1);
        assert_eq!(file.archived_size, 1_000_500);
        assert_eq!(file.expected_size, 1_000_000);
        assert_eq!(file.size_info, "1.0MB / 1.0MB");
    }

    #[test]
    fn short_multipart_archive_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        write_sized(&dir.path().join("a.mkv"), 1_000_000);
        write_sized(&dir.path().join("a.mkv.part1.rar"), 600_000);
        write_sized(&dir.path().join("a.mkv.part2.rar"), 300_000);

        let listing = inventory(dir.path()).list("", false).unwrap();

        let file = &listing.files[0];
        assert_eq!(file.status, SplitStatus::Partial);
        assert_eq!(file.volume_count, 2);
        assert_eq!(file.archived_size, 900_000);
    }

    #[test]
    fn subtitle_inclusion_changes_the_expectation() {
        let dir = tempfile::tempdir().unwrap();
        write_sized(&dir.path().join("m.mkv"), 10_000);
        write_sized(&dir.path().join("m.en.srt"), 3_000);
        write_sized(&dir.path().join("m_extra.srt"), 50_000);
        // Archive holding the media and its subtitle
        write_sized(&dir.path().join("m.mkv.rar"), 13_100);

        let inv = inventory(dir.path());

        let with = inv.list("", true).unwrap();
        let file = &with.files[0];
        assert_eq!(file.companion_count, 1);
        assert_eq!(file.companion_size, Some(3_000));
        assert_eq!(file.expected_size, 13_000);
        assert_eq!(file.status, SplitStatus::Split);

        let without = inv.list("", false).unwrap();
        let file = &without.files[0];
        assert_eq!(file.companion_count, 1);
        assert_eq!(file.companion_size, None);
        assert_eq!(file.expected_size, 10_000);
        assert_eq!(file.status, SplitStatus::Partial);
    }

    #[test]
    fn lists_one_level_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("shows/deep")).unwrap();
        fs::create_dir(root.join("movies")).unwrap();
        fs::create_dir(root.join(".hidden")).unwrap();
        write_sized(&root.join("b.mkv"), 10);
        write_sized(&root.join("A.MKV"), 10);
        write_sized(&root.join("c.mp4"), 10);
        write_sized(&root.join(".secret.mkv"), 10);
        write_sized(&root.join("notes.txt"), 10);
        write_sized(&root.join("shows/deep/x.mkv"), 10);

        let listing = inventory(root).list("", true).unwrap();

        let folders: Vec<_> = listing.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(folders, ["movies", "shows"]);
        let files: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, ["A.MKV", "b.mkv", "c.mp4"]);
        assert!(listing.files.iter().all(|f| f.status == SplitStatus::None));
        assert_eq!(listing.current_path, "");
        assert_eq!(listing.parent_path, None);
    }

    #[test]
    fn nested_paths_use_forward_slashes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("shows/s01/extras")).unwrap();
        write_sized(&root.join("shows/s01/e01.mkv"), 10);

        let listing = inventory(root).list("/shows/./s01/", true).unwrap();

        assert_eq!(listing.current_path, "shows/s01");
        assert_eq!(listing.parent_path.as_deref(), Some("shows"));
        assert_eq!(listing.folders[0].path, "shows/s01/extras");
        assert_eq!(listing.files[0].path, "shows/s01/e01.mkv");

        let top = inventory(root).list("shows", true).unwrap();
        assert_eq!(top.parent_path.as_deref(), Some(""));
    }

    #[cfg(unix)]
    #[test]
    fn uninspectable_entry_does_not_abort_the_listing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_sized(&root.join("a.mkv"), 10);
        std::os::unix::fs::symlink("loop.mkv", root.join("loop.mkv")).unwrap();

        let listing = inventory(root).list("", true).unwrap();

        let files: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, ["a.mkv"]);
        assert!(listing.folders.is_empty());
    }

    #[test]
    fn listing_serializes_snake_case() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("shows")).unwrap();
        write_sized(&dir.path().join("a.mkv"), 1_000_000);
        write_sized(&dir.path().join("a.mkv.rar"), 1_000_500);

        let listing = inventory(dir.path()).list("", false).unwrap();

        assert_eq!(
            serde_json::to_value(&listing).unwrap(),
            serde_json::json!({
                "current_path": "",
                "parent_path": null,
                "folders": [{ "name": "shows", "path": "shows" }],
                "files": [{
                    "name": "a.mkv",
                    "path": "a.mkv",
                    "status": "SPLIT",
                    "volume_count": 1,
                    "media_size": 1_000_000,
                    "archived_size": 1_000_500,
                    "expected_size": 1_000_000,
                    "companion_count": 0,
                    "size_info": "1.0MB / 1.0MB"
                }]
            })
        );
    }

    #[test]
    fn errors_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        write_sized(&dir.path().join("file.mkv"), 1);
        let inv = inventory(dir.path());

        assert!(matches!(inv.list("../..", true), Err(Error::Forbidden(_))));
        assert!(matches!(inv.list("missing", true), Err(Error::NotFound(_))));
        assert!(matches!(inv.list("file.mkv", true), Err(Error::Miette(_))));
    }
}
