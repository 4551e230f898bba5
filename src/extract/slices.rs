//! Slice file discovery and parsing.
//!
//! Epistemic foundation:
//! - K_i: Canonical slices are named `mpd.slice.<start>-<end>.json`
//! - B_i: A directory may hold renamed or partial dumps → fall back to *.json
//! - I^B: Individual slices may be corrupt → skip, never abort

use crate::models::{MpdkitError, Result, SliceFile};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Discover slice files in a dataset directory, sorted by name.
///
/// Prefers canonically named `mpd.slice.*.json` files; when none exist,
/// falls back to every `*.json` in the directory. `max_slices` caps the
/// list for test runs on a subset.
pub fn discover_slices(data_dir: &Path, max_slices: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut files = glob_sorted(&data_dir.join("mpd.slice.*.json"))?;

    if files.is_empty() {
        debug!(dir = %data_dir.display(), "No canonical slice files, falling back to *.json");
        files = glob_sorted(&data_dir.join("*.json"))?;
    }

    if files.is_empty() {
        return Err(MpdkitError::NoSlices(data_dir.to_path_buf()));
    }

    if let Some(max) = max_slices {
        if files.len() > max {
            info!(total = files.len(), cap = max, "Capping slice files");
            files.truncate(max);
        }
    }

    Ok(files)
}

fn glob_sorted(pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern_str = pattern.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&pattern_str)
        .map_err(|e| MpdkitError::Internal(format!("Invalid glob pattern: {e}")))?
        .filter_map(|r| r.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Read and parse a single slice file.
///
/// B_i(file is valid slice JSON) → Result
pub fn read_slice(path: &Path) -> Result<SliceFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| MpdkitError::io(format!("reading slice {}", path.display()), e))?;

    serde_json::from_str(&content)
        .map_err(|e| MpdkitError::ParseError(format!("{}: {e}", path.display())))
}

/// A report of the files present in a dataset directory.
#[derive(Debug, Clone, Default)]
pub struct StructureReport {
    /// All entries in the directory
    pub total_files: usize,

    /// JSON files among them
    pub json_files: usize,

    /// First files with their sizes in MB, for display
    pub samples: Vec<(String, f64)>,
}

/// How many per-file samples a structure report carries.
const STRUCTURE_SAMPLE_LIMIT: usize = 10;

/// Analyze the layout of a dataset directory.
pub fn analyze_structure(data_dir: &Path) -> Result<StructureReport> {
    let entries = std::fs::read_dir(data_dir)
        .map_err(|e| MpdkitError::io(format!("reading directory {}", data_dir.display()), e))?;

    let mut report = StructureReport::default();
    let mut json_paths = Vec::new();

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() {
            report.total_files += 1;
            if path.extension().is_some_and(|ext| ext == "json") {
                report.json_files += 1;
                json_paths.push(path);
            }
        }
    }

    json_paths.sort();
    for path in json_paths.into_iter().take(STRUCTURE_SAMPLE_LIMIT) {
        let size_mb = std::fs::metadata(&path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        report.samples.push((name, size_mb));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_slice(dir: &Path, name: &str, playlists: usize) {
        let playlists_json: Vec<String> = (0..playlists)
            .map(|i| {
                format!(
                    r#"{{"pid": {i}, "name": "p{i}", "num_tracks": 1, "tracks": [{{
                        "pos": 0, "track_uri": "spotify:track:t{i}",
                        "track_name": "Song {i}", "artist_name": "Artist",
                        "artist_uri": "spotify:artist:a", "album_name": "Album",
                        "album_uri": "spotify:album:b", "duration_ms": 1000
                    }}]}}"#
                )
            })
            .collect();
        let content = format!(r#"{{"playlists": [{}]}}"#, playlists_json.join(","));
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_discover_prefers_canonical_names() {
        let dir = TempDir::new().unwrap();
        write_slice(dir.path(), "mpd.slice.0-999.json", 1);
        write_slice(dir.path(), "mpd.slice.1000-1999.json", 1);
        write_slice(dir.path(), "notes.json", 1);

        let files = discover_slices(dir.path(), None).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("0-999"));
    }

    #[test]
    fn test_discover_falls_back_to_any_json() {
        let dir = TempDir::new().unwrap();
        write_slice(dir.path(), "dump.json", 1);

        let files = discover_slices(dir.path(), None).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_discover_empty_dir_errors() {
        let dir = TempDir::new().unwrap();
        let err = discover_slices(dir.path(), None).unwrap_err();
        assert!(matches!(err, MpdkitError::NoSlices(_)));
    }

    #[test]
    fn test_discover_respects_max_slices() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_slice(dir.path(), &format!("mpd.slice.{i}000-{i}999.json"), 1);
        }
        let files = discover_slices(dir.path(), Some(2)).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_read_slice_rejects_malformed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        let err = read_slice(&dir.path().join("bad.json")).unwrap_err();
        assert!(matches!(err, MpdkitError::ParseError(_)));
    }

    #[test]
    fn test_analyze_structure_counts_json() {
        let dir = TempDir::new().unwrap();
        write_slice(dir.path(), "mpd.slice.0-999.json", 2);
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let report = analyze_structure(dir.path()).unwrap();
        assert_eq!(report.total_files, 2);
        assert_eq!(report.json_files, 1);
        assert_eq!(report.samples.len(), 1);
    }
}
