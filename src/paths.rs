use std::path::{is_separator, Component, Path, PathBuf};

use miette::{Context, IntoDiagnostic};

use crate::result::{Error, Result};

/// The directory every operation is confined to.
///
/// All user supplied paths are relative to it and are resolved lexically:
/// `.` and `..` segments are folded without touching the filesystem, then the
/// result must still be inside the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRoot {
    root: PathBuf,
}

impl ManagedRoot {
    /// Create the managed root. A relative root is made absolute against the
    /// current working directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .into_diagnostic()
                .wrap_err("Could not get the current directory")?
                .join(root)
        };

        Ok(Self {
            root: normalize(&root),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a root-relative path to an absolute one.
    ///
    /// Empty input and `.` resolve to the root itself.
    /// Fails with [`Error::Forbidden`] if the path escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative.trim_start_matches(is_separator));

        let has_anchor = relative
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir));
        if has_anchor {
            return Err(Error::Forbidden(to_slash(relative)));
        }

        let resolved = normalize(&self.root.join(relative));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(Error::Forbidden(to_slash(relative)))
        }
    }

    /// Express an absolute path inside the root as a forward-slash separated
    /// root-relative path. The root itself is the empty string.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        absolute.strip_prefix(&self.root).ok().map(to_slash)
    }
}

/// Join the path components with forward slashes, whatever the platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            Component::ParentDir => Some("..".into()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The parent of a root-relative path, `None` for the root itself
pub fn parent_of(relative: &str) -> Option<String> {
    if relative.is_empty() {
        return None;
    }

    Some(
        relative
            .rsplit_once('/')
            .map_or_else(String::new, |(parent, _)| parent.to_owned()),
    )
}

/// Lexically fold `.` and `..` components.
/// `..` at the filesystem root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{parent_of, ManagedRoot};
    use crate::result::Error;

    fn root() -> ManagedRoot {
        ManagedRoot::new("/data").unwrap()
    }

    #[test]
    fn empty_and_dot_resolve_to_root() {
        let root = root();

        assert_eq!(root.resolve("").unwrap(), Path::new("/data"));
        assert_eq!(root.resolve(".").unwrap(), Path::new("/data"));
        assert_eq!(root.resolve("/").unwrap(), Path::new("/data"));
    }

    #[test]
    fn paths_inside_root_resolve_under_it() {
        let root = root();

        for rel in [
            "movies",
            "movies/a.mkv",
            "/movies/a.mkv",
            "movies/./a.mkv",
            "movies/../shows/b.mkv",
            "a/b/c/../../d",
            "../data/movies",
        ] {
            let resolved = root.resolve(rel).unwrap();
            assert!(resolved.starts_with("/data"), "{rel} -> {resolved:?}");
        }

        assert_eq!(
            root.resolve("movies/../shows/b.mkv").unwrap(),
            Path::new("/data/shows/b.mkv")
        );
    }

    #[test]
    fn traversal_outside_root_is_forbidden() {
        let root = root();

        for rel in [
            "..",
            "../etc/passwd",
            "movies/../../etc",
            "a/b/../../../x",
            "../data2/secret",
            "./../..",
        ] {
            assert!(
                matches!(root.resolve(rel), Err(Error::Forbidden(_))),
                "{rel} should be forbidden"
            );
        }
    }

    #[test]
    fn sibling_with_common_prefix_is_not_inside() {
        let root = root();
        assert!(root.relative(Path::new("/data2/file")).is_none());
        assert_eq!(
            root.relative(Path::new("/data/a/b.mkv")).as_deref(),
            Some("a/b.mkv")
        );
        assert_eq!(root.relative(Path::new("/data")).as_deref(), Some(""));
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let root = ManagedRoot::new("media/./library").unwrap();
        assert!(root.path().is_absolute());
        assert!(root.path().ends_with("media/library"));
    }

    #[test]
    fn parent_stops_at_root() {
        assert_eq!(parent_of(""), None);
        assert_eq!(parent_of("movies").as_deref(), Some(""));
        assert_eq!(parent_of("movies/2024").as_deref(), Some("movies"));
        assert_eq!(parent_of("a/b/c").as_deref(), Some("a/b"));
    }
}
