//! Playlist counting and dataset classification.

use crate::extract::read_slice;
use crate::models::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Number of playlists in the full Million Playlist Dataset.
pub const FULL_MPD_PLAYLISTS: u64 = 1_000_000;

/// Number of playlists in the challenge set.
pub const CHALLENGE_PLAYLISTS: u64 = 10_000;

/// What a playlist total says about the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// The complete Million Playlist Dataset
    Full,
    /// The challenge set
    Challenge,
    /// A sample or subset
    Sample,
    /// More playlists than the full MPD
    Extended,
    /// Anything in between
    Custom,
}

impl DatasetKind {
    /// Classify a dataset by its playlist total.
    pub fn classify(total_playlists: u64) -> Self {
        match total_playlists {
            FULL_MPD_PLAYLISTS => Self::Full,
            CHALLENGE_PLAYLISTS => Self::Challenge,
            n if n > FULL_MPD_PLAYLISTS => Self::Extended,
            n if n < CHALLENGE_PLAYLISTS => Self::Sample,
            _ => Self::Custom,
        }
    }

    /// Human-readable description for reports.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Full => "complete Million Playlist Dataset (MPD)",
            Self::Challenge => "challenge dataset",
            Self::Sample => "sample or subset of the data",
            Self::Extended => "more than the full MPD - may include additional data",
            Self::Custom => "custom dataset size",
        }
    }
}

/// Count playlists in a single slice file.
pub fn count_playlists_in_file(path: &Path) -> Result<u64> {
    let slice = read_slice(path)?;
    Ok(slice.playlists.len() as u64)
}

/// Playlist counts across a set of slice files.
#[derive(Debug, Clone, Default)]
pub struct DirectoryCount {
    /// Per-file playlist counts, in scan order
    pub per_file: Vec<(PathBuf, u64)>,

    /// Total playlists across parseable files
    pub total_playlists: u64,

    /// Files that failed to parse (skipped)
    pub files_failed: usize,
}

impl DirectoryCount {
    /// Files that contributed to the total.
    pub fn files_counted(&self) -> usize {
        self.per_file.len()
    }

    /// Classification of the counted total.
    pub fn kind(&self) -> DatasetKind {
        DatasetKind::classify(self.total_playlists)
    }
}

/// Count playlists across slice files.
///
/// I^B: A corrupt file is logged and skipped; the count covers the rest.
pub fn count_playlists(files: &[PathBuf]) -> DirectoryCount {
    let mut result = DirectoryCount::default();

    for path in files {
        match count_playlists_in_file(path) {
            Ok(count) => {
                result.total_playlists += count;
                result.per_file.push((path.clone(), count));
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable slice");
                result.files_failed += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_playlists(dir: &Path, name: &str, count: usize) -> PathBuf {
        let playlists: Vec<String> = (0..count)
            .map(|i| format!(r#"{{"pid": {i}, "name": "p{i}", "tracks": []}}"#))
            .collect();
        let path = dir.join(name);
        std::fs::write(&path, format!(r#"{{"playlists": [{}]}}"#, playlists.join(","))).unwrap();
        path
    }

    #[test]
    fn test_classify_dataset_kinds() {
        assert_eq!(DatasetKind::classify(1_000_000), DatasetKind::Full);
        assert_eq!(DatasetKind::classify(10_000), DatasetKind::Challenge);
        assert_eq!(DatasetKind::classify(500), DatasetKind::Sample);
        assert_eq!(DatasetKind::classify(1_500_000), DatasetKind::Extended);
        assert_eq!(DatasetKind::classify(50_000), DatasetKind::Custom);
    }

    #[test]
    fn test_count_across_files_skips_corrupt() {
        let dir = TempDir::new().unwrap();
        let a = write_playlists(dir.path(), "mpd.slice.0-999.json", 3);
        let b = write_playlists(dir.path(), "mpd.slice.1000-1999.json", 2);
        let bad = dir.path().join("mpd.slice.2000-2999.json");
        std::fs::write(&bad, "{broken").unwrap();

        let counts = count_playlists(&[a, b, bad]);
        assert_eq!(counts.total_playlists, 5);
        assert_eq!(counts.files_counted(), 2);
        assert_eq!(counts.files_failed, 1);
        assert_eq!(counts.kind(), DatasetKind::Sample);
    }
}
