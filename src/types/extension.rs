use std::path::Path;

/// The set of file extensions recognized as media files.
///
/// Extensions are stored without the leading dot and compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaExtensions(Vec<String>);

impl MediaExtensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }

    /// Whether the path file extension is one of the media extensions
    pub fn matches<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                self.0.iter().any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

impl Default for MediaExtensions {
    fn default() -> Self {
        Self::new(["mkv"])
    }
}
