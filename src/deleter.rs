use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::outside::{run_command, Capture};

pub const DEFAULT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The file was removed
    Deleted,
    /// There was nothing to remove in the first place
    Absent,
    /// The file is still there after every attempt
    GaveUp,
}

impl DeleteOutcome {
    /// Whether the path is gone
    pub fn succeeded(self) -> bool {
        !matches!(self, DeleteOutcome::GaveUp)
    }
}

/// Deletes files on volumes whose permissions do not match the process user.
///
/// Each attempt removes the file directly, on a permission error retries after
/// opening up its mode, and as a last resort runs the fallback removal command
/// on it. Attempts are separated by a fixed delay.
#[derive(Debug, Clone)]
pub struct ResilientDeleter {
    attempts: u32,
    delay: Duration,
    fallback: Vec<String>,
}

impl Default for ResilientDeleter {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            fallback: vec!["rm".to_owned(), "-f".to_owned()],
        }
    }
}

impl ResilientDeleter {
    /// `fallback` is the removal command the path is appended to, e.g. `sudo -n rm -f`.
    /// An empty fallback disables that step.
    pub fn new(attempts: u32, delay: Duration, fallback: Vec<String>) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            fallback,
        }
    }

    pub fn delete(&self, path: &Path) -> DeleteOutcome {
        for attempt in 1..=self.attempts {
            if !exists(path) {
                return if attempt == 1 {
                    DeleteOutcome::Absent
                } else {
                    DeleteOutcome::Deleted
                };
            }

            match self.remove(path) {
                Ok(()) => {
                    info!("Deleted {}", path.display());
                    return DeleteOutcome::Deleted;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => return DeleteOutcome::Absent,
                Err(err) => debug!(
                    "[{attempt}/{}] Could not delete {}: {err}",
                    self.attempts,
                    path.display()
                ),
            }

            if self.run_fallback(path, attempt) {
                info!("Deleted {} with the fallback command", path.display());
                return DeleteOutcome::Deleted;
            }

            if attempt < self.attempts {
                thread::sleep(self.delay);
            }
        }

        warn!(
            "Gave up deleting {} after {} attempts",
            path.display(),
            self.attempts
        );
        DeleteOutcome::GaveUp
    }

    /// Delete every path, returning how many were actually removed
    pub fn delete_all<'a, I>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = &'a Path>,
    {
        paths
            .into_iter()
            .filter(|path| self.delete(path) == DeleteOutcome::Deleted)
            .count()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!("Permission denied on {}, opening up its mode", path.display());
                open_up_permissions(path)?;
                fs::remove_file(path)
            }
            res => res,
        }
    }

    fn run_fallback(&self, path: &Path, attempt: u32) -> bool {
        let Some((program, args)) = self.fallback.split_first() else {
            return false;
        };

        debug!(
            "[{attempt}/{}] Trying {} on {}",
            self.attempts,
            self.fallback.join(" "),
            path.display()
        );
        match run_command(program, |cmd| cmd.args(args).arg(path), Capture::STDERR) {
            Ok(out) if !out.status.success() => debug!(
                "{program} failed with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Ok(_) => {}
            Err(err) => debug!("{err}"),
        }

        !exists(path)
    }
}

/// Whether anything, even a dangling symlink, is at the path
fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(unix)]
fn open_up_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn open_up_permissions(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

/// Paths of the visible `*.rar` files directly inside `dir`
pub fn rar_files_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(".rar") {
            continue;
        }
        if fs::metadata(entry.path()).map_or(false, |m| m.is_file()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use super::{rar_files_in, DeleteOutcome, ResilientDeleter};

    fn quick(fallback: &[&str]) -> ResilientDeleter {
        ResilientDeleter::new(
            3,
            Duration::from_millis(1),
            fallback.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn absent_path_is_a_success_without_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        // A fallback that would leave a trace if it were run
        let marker = dir.path().join("marker");
        let deleter = quick(&["touch", marker.to_str().unwrap()]);

        let outcome = deleter.delete(&dir.path().join("missing.rar"));

        assert_eq!(outcome, DeleteOutcome::Absent);
        assert!(outcome.succeeded());
        assert!(!marker.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn removes_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mkv.rar");
        fs::write(&path, "x").unwrap();

        assert_eq!(quick(&[]).delete(&path), DeleteOutcome::Deleted);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn falls_back_to_the_removal_command() {
        let dir = tempfile::tempdir().unwrap();
        // remove_file cannot remove a directory, the fallback can
        let path = dir.path().join("stuck.rar");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), "x").unwrap();

        assert_eq!(quick(&["rm", "-rf"]).delete(&path), DeleteOutcome::Deleted);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn gives_up_after_the_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuck.rar");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), "x").unwrap();

        let outcome = quick(&["rm", "-f"]).delete(&path);

        assert_eq!(outcome, DeleteOutcome::GaveUp);
        assert!(!outcome.succeeded());
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn permission_errors_open_up_the_mode_before_falling_back() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let owner = dir.path().join("owner");
        fs::write(&owner, "x").unwrap();
        if fs::metadata(&owner).unwrap().uid() == 0 {
            // Permission checks do not apply to root
            return;
        }

        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        let path = locked.join("a.mkv.rar");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        // The fallback records the mode it finds, then removes with rights restored
        let marker = dir.path().join("marker");
        let script = format!(
            r#"ls -l "$0" > '{}' && chmod u+w '{}' && rm -f "$0""#,
            marker.display(),
            locked.display()
        );
        let outcome = quick(&["sh", "-c", &script]).delete(&path);

        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(!path.exists());
        let listed = fs::read_to_string(&marker).unwrap();
        assert!(listed.starts_with("-rwxrwxrwx"), "{listed}");

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn delete_all_counts_only_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.rar");
        let b = dir.path().join("b.rar");
        fs::write(&a, "x").unwrap();

        let removed = quick(&[]).delete_all([a.as_path(), b.as_path()]);

        assert_eq!(removed, 1);
    }

    #[test]
    fn lists_visible_rar_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mkv.rar", "b.mkv.part1.rar", ".c.rar", "d.rar.tmp", "e.mkv"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("f.rar")).unwrap();

        let files = rar_files_in(dir.path()).unwrap();

        assert_eq!(
            files,
            [dir.path().join("a.mkv.rar"), dir.path().join("b.mkv.part1.rar")]
        );
    }
}
