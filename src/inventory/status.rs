use serde::Serialize;

use super::ArtifactSet;

/// Maximum header cost of one volume of a store-mode archive, in bytes
pub const HEADER_OVERHEAD: u64 = 2048;

/// How complete the archive of a media file is, judged from sizes only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SplitStatus {
    /// No archive volume exists
    None,
    /// Volumes exist but their total size is outside of the expected window
    Partial,
    /// The volumes hold at least the expected bytes, plus at most one
    /// header overhead per volume
    Split,
}

impl SplitStatus {
    /// Classify an archive made of `volume_count` volumes totalling `archived_size`
    /// bytes, against `expected_size` bytes of archived content.
    ///
    /// Archives larger than the overhead tolerance are `Partial` as well as
    /// the ones that are too short.
    pub fn classify(expected_size: u64, archived_size: u64, volume_count: usize) -> Self {
        if volume_count == 0 {
            return SplitStatus::None;
        }

        let tolerance = HEADER_OVERHEAD.saturating_mul(volume_count as u64);
        let upper = expected_size.saturating_add(tolerance);

        if (expected_size..=upper).contains(&archived_size) {
            SplitStatus::Split
        } else {
            SplitStatus::Partial
        }
    }

    pub fn of(expected_size: u64, artifacts: &ArtifactSet) -> Self {
        Self::classify(
            expected_size,
            artifacts.total_size(),
            artifacts.volume_count(),
        )
    }
}
