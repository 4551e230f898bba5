//! Catalog extraction pipeline.
//!
//! Pipeline flow:
//! Slice files → CatalogBuilder → TrackCatalog → unique_tracks.json

use crate::extract::{discover_slices, read_slice};
use crate::models::{CatalogBuilder, Config, ExtractStats, MpdkitError, Result, TrackCatalog};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Default catalog file name within the output directory.
pub const CATALOG_FILE: &str = "unique_tracks.json";

/// Extraction pipeline: deduplicate the track catalog across slices.
pub struct ExtractPipeline {
    config: Config,
}

impl ExtractPipeline {
    /// Create a new extraction pipeline from configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Load a previously extracted catalog.
    ///
    /// B_i(file is a valid catalog) → Result
    pub fn load_catalog(path: &Path) -> Result<TrackCatalog> {
        let file = File::open(path).map_err(|e| MpdkitError::io("opening catalog", e))?;
        let reader = BufReader::new(file);
        let catalog: TrackCatalog = serde_json::from_reader(reader)
            .map_err(|e| MpdkitError::ParseError(format!("{}: {e}", path.display())))?;

        info!(
            unique_tracks = catalog.summary.unique_tracks,
            "Loaded catalog"
        );
        Ok(catalog)
    }

    /// Run the extraction pipeline.
    ///
    /// Returns the catalog path and run statistics.
    pub fn run(&self) -> Result<(PathBuf, ExtractStats)> {
        let start = Instant::now();

        let files = discover_slices(
            &self.config.extract.data_dir,
            self.config.extract.max_slices,
        )?;

        info!(
            slices = files.len(),
            data_dir = %self.config.extract.data_dir.display(),
            "Starting extraction"
        );

        // Setup progress bar
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("##-"),
        );

        let mut stats = ExtractStats {
            slices_found: files.len(),
            ..Default::default()
        };
        let mut builder = CatalogBuilder::new();

        for path in &files {
            match read_slice(path) {
                Ok(slice) => {
                    builder.observe_slice(&slice);
                    stats.slices_processed += 1;
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable slice");
                    stats.slices_failed += 1;
                }
            }
            pb.inc(1);
            pb.set_message(format!("unique: {}", builder.len()));
        }

        let catalog = builder.finish();
        pb.finish_with_message(format!("Done! {} unique tracks", catalog.tracks.len()));

        stats.unique_tracks = catalog.summary.unique_tracks;
        stats.total_instances = catalog.summary.total_instances;

        let output_path = self.write_catalog(&catalog)?;

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            unique_tracks = stats.unique_tracks,
            total_instances = stats.total_instances,
            mean_frequency = format!("{:.1}", stats.mean_frequency),
            output = %output_path.display(),
            "Extraction complete"
        );

        Ok((output_path, stats))
    }

    fn write_catalog(&self, catalog: &TrackCatalog) -> Result<PathBuf> {
        let dir = &self.config.output.dir;
        std::fs::create_dir_all(dir)
            .map_err(|e| MpdkitError::io("creating output dir", e))?;

        let path = dir.join(CATALOG_FILE);
        let file = File::create(&path).map_err(|e| MpdkitError::io("creating catalog", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, catalog)
            .map_err(|e| MpdkitError::Internal(format!("Serializing catalog: {e}")))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn slice_json(first_uri: &str, second_uri: &str) -> String {
        format!(
            r#"{{"playlists": [{{
                "pid": 0, "name": "mix", "num_tracks": 2,
                "tracks": [
                    {{"pos": 0, "track_uri": "{first_uri}", "track_name": "A",
                      "artist_name": "X", "artist_uri": "spotify:artist:x",
                      "album_name": "Al", "album_uri": "spotify:album:al",
                      "duration_ms": 1000}},
                    {{"pos": 1, "track_uri": "{second_uri}", "track_name": "B",
                      "artist_name": "Y", "artist_uri": "spotify:artist:y",
                      "album_name": "Bl", "album_uri": "spotify:album:bl",
                      "duration_ms": 2000}}
                ]
            }}]}}"#
        )
    }

    #[test]
    fn test_run_writes_catalog_and_skips_corrupt() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("raw");
        let out_dir = dir.path().join("interim");
        std::fs::create_dir_all(&data_dir).unwrap();

        std::fs::write(
            data_dir.join("mpd.slice.0-999.json"),
            slice_json("spotify:track:t1", "spotify:track:t2"),
        )
        .unwrap();
        std::fs::write(
            data_dir.join("mpd.slice.1000-1999.json"),
            slice_json("spotify:track:t1", "spotify:track:t3"),
        )
        .unwrap();
        std::fs::write(data_dir.join("mpd.slice.2000-2999.json"), "{bad").unwrap();

        let mut config = Config::default();
        config.extract.data_dir = data_dir;
        config.output.dir = out_dir;

        let (path, stats) = ExtractPipeline::new(config).run().unwrap();
        assert_eq!(stats.slices_found, 3);
        assert_eq!(stats.slices_processed, 2);
        assert_eq!(stats.slices_failed, 1);
        assert_eq!(stats.unique_tracks, 3);
        assert_eq!(stats.total_instances, 4);

        let catalog = ExtractPipeline::load_catalog(&path).unwrap();
        assert_eq!(catalog.summary.unique_tracks, 3);
        assert_eq!(catalog.frequencies["spotify:track:t1"], 2);
    }
}
