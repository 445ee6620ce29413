use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;
use regex::Regex;

use super::{read_entries, DirEntryInfo};
use crate::result::Result;

/// Matches the subtitle files belonging to one media file.
///
/// For a media file `<base>.<ext>` the companions are `<base>.srt` and
/// `<base>.<tag>.srt`. The dot after `<base>` is mandatory so that
/// `movie_extended.srt` is not taken for a subtitle of `movie.mkv`.
#[derive(Debug)]
pub struct CompanionMatcher {
    pattern: Regex,
}

impl CompanionMatcher {
    pub fn for_media(media_name: &str) -> Result<Self> {
        let base = Path::new(media_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(media_name);

        let pattern = format!(r"^{}\.(?:.+\.)?(?i:srt)$", regex::escape(base));
        Ok(Self {
            pattern: Regex::new(&pattern).into_diagnostic()?,
        })
    }

    pub fn is_companion(&self, name: &str) -> bool {
        !name.starts_with('.') && self.pattern.is_match(name)
    }
}

/// Find the subtitle companions of the media file, sorted by name
pub fn find_companions(media: &Path) -> Result<Vec<PathBuf>> {
    let (Some(dir), Some(name)) = (media.parent(), media.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(vec![]);
    };

    let entries = match read_entries(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => Err(err).into_diagnostic()?,
    };

    Ok(companions_among(name, &entries)?
        .into_iter()
        .map(|entry| entry.path.clone())
        .collect())
}

/// Select the companions of `media_name` among already listed directory entries
pub(crate) fn companions_among<'a>(
    media_name: &str,
    entries: &'a [DirEntryInfo],
) -> Result<Vec<&'a DirEntryInfo>> {
    let matcher = CompanionMatcher::for_media(media_name)?;

    let mut companions: Vec<_> = entries
        .iter()
        .filter(|entry| entry.is_file() && matcher.is_companion(&entry.name))
        .collect();
    companions.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(companions)
}
