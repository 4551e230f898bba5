//! Track and catalog types for mpdkit.
//!
//! K_i: These types represent the core data flow through the pipelines:
//! slice files → deduplicated catalog → audio-feature records.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One MPD slice file (`mpd.slice.<start>-<end>.json`).
///
/// K_i: Every slice is `{ "info": ..., "playlists": [...] }`. Fields the
/// pipelines do not consume are ignored on deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct SliceFile {
    /// Playlists contained in this slice
    pub playlists: Vec<Playlist>,
}

/// A single playlist within a slice.
#[derive(Debug, Clone, Deserialize)]
pub struct Playlist {
    /// Playlist id within the dataset
    pub pid: u64,

    /// Playlist title
    pub name: String,

    /// Track count as recorded in the dataset
    #[serde(default)]
    pub num_tracks: u64,

    /// Tracks in playlist order
    pub tracks: Vec<PlaylistTrack>,
}

/// A track occurrence inside a playlist.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrack {
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub artist_uri: String,
    pub album_name: String,
    pub album_uri: String,
    pub duration_ms: u64,

    /// Position within the playlist
    #[serde(default)]
    pub pos: u64,
}

/// Deduplicated catalog entry for a unique track.
///
/// K_i: Metadata is first-occurrence-wins across the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMeta {
    pub track_uri: String,
    pub track_name: String,
    pub artist_name: String,
    pub artist_uri: String,
    pub album_name: String,
    pub album_uri: String,
    pub duration_ms: u64,
}

impl From<&PlaylistTrack> for TrackMeta {
    fn from(t: &PlaylistTrack) -> Self {
        Self {
            track_uri: t.track_uri.clone(),
            track_name: t.track_name.clone(),
            artist_name: t.artist_name.clone(),
            artist_uri: t.artist_uri.clone(),
            album_name: t.album_name.clone(),
            album_uri: t.album_uri.clone(),
            duration_ms: t.duration_ms,
        }
    }
}

/// Extract the bare track id from a Spotify track URI.
///
/// `spotify:track:<id>` yields `<id>`; anything else is assumed to already
/// be an id and passes through unchanged.
pub fn track_id(uri: &str) -> &str {
    uri.strip_prefix("spotify:track:").unwrap_or(uri)
}

/// Audio features for a single track, as returned by the Spotify Web API.
///
/// K_i: The twelve fields below are the projection the enrichment pipeline
/// persists; extra response fields are dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub loudness: f64,
    pub speechiness: f64,
    pub tempo: f64,
    pub valence: f64,
    pub key: i32,
    pub mode: i32,
    pub time_signature: i32,
}

/// One output line of the enrichment pipeline (JSONL).
///
/// B_i: `features` is `None` when Spotify has no features for the track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub track_uri: String,
    pub features: Option<AudioFeatures>,
}

/// Summary block written alongside the catalog.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CatalogSummary {
    /// Number of unique tracks
    pub unique_tracks: usize,

    /// Total track occurrences across all playlists
    pub total_instances: u64,
}

/// The deduplicated track catalog persisted to the interim directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackCatalog {
    /// Unique tracks in first-occurrence order
    pub tracks: Vec<TrackMeta>,

    /// Occurrence count per track URI
    pub frequencies: HashMap<String, u64>,

    /// Aggregate summary
    pub summary: CatalogSummary,
}

impl TrackCatalog {
    /// Track URIs in catalog order.
    pub fn uris(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.track_uri.clone()).collect()
    }

    /// Mean occurrences per unique track.
    pub fn mean_frequency(&self) -> f64 {
        if self.tracks.is_empty() {
            return 0.0;
        }
        self.summary.total_instances as f64 / self.tracks.len() as f64
    }
}

/// Incremental catalog builder used during slice extraction.
///
/// Invariant: metadata is recorded on first occurrence only; frequencies
/// count every occurrence.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    tracks: Vec<TrackMeta>,
    seen: HashSet<String>,
    frequencies: HashMap<String, u64>,
    total_instances: u64,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single track occurrence.
    pub fn observe(&mut self, track: &PlaylistTrack) {
        self.total_instances += 1;
        *self.frequencies.entry(track.track_uri.clone()).or_insert(0) += 1;

        if self.seen.insert(track.track_uri.clone()) {
            self.tracks.push(TrackMeta::from(track));
        }
    }

    /// Record every track occurrence in a slice.
    pub fn observe_slice(&mut self, slice: &SliceFile) {
        for playlist in &slice.playlists {
            for track in &playlist.tracks {
                self.observe(track);
            }
        }
    }

    /// Number of unique tracks seen so far.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Total track occurrences seen so far.
    pub fn total_instances(&self) -> u64 {
        self.total_instances
    }

    /// Finish building and produce the catalog.
    pub fn finish(self) -> TrackCatalog {
        let summary = CatalogSummary {
            unique_tracks: self.tracks.len(),
            total_instances: self.total_instances,
        };
        TrackCatalog {
            tracks: self.tracks,
            frequencies: self.frequencies,
            summary,
        }
    }
}

/// Statistics for an extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Slice files discovered
    pub slices_found: usize,

    /// Slice files successfully parsed
    pub slices_processed: usize,

    /// Slice files that failed to parse (skipped)
    pub slices_failed: usize,

    /// Total track occurrences
    pub total_instances: u64,

    /// Unique tracks in the catalog
    pub unique_tracks: usize,

    /// Mean occurrences per unique track
    pub mean_frequency: f64,

    /// Total runtime in seconds
    pub runtime_secs: f64,
}

impl ExtractStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.unique_tracks > 0 {
            self.mean_frequency = self.total_instances as f64 / self.unique_tracks as f64;
        }
    }
}

/// Statistics for an enrichment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichStats {
    /// Tracks requested in this run
    pub total_requested: usize,

    /// Tracks with features fetched
    pub fetched: usize,

    /// Tracks Spotify has no features for
    pub missing: usize,

    /// Tracks that failed after retries
    pub failed: usize,

    /// Batches dispatched
    pub batches: usize,

    /// Batches that failed entirely
    pub batches_failed: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Fetched / requested
    pub success_rate: f64,

    /// Fetched tracks per hour
    pub throughput_per_hour: f64,
}

impl EnrichStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_requested > 0 {
            self.success_rate = self.fetched as f64 / self.total_requested as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.fetched as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track(uri: &str, name: &str) -> PlaylistTrack {
        PlaylistTrack {
            track_uri: uri.to_string(),
            track_name: name.to_string(),
            artist_name: "Artist".to_string(),
            artist_uri: "spotify:artist:a1".to_string(),
            album_name: "Album".to_string(),
            album_uri: "spotify:album:b1".to_string(),
            duration_ms: 200_000,
            pos: 0,
        }
    }

    #[test]
    fn test_track_id_from_uri() {
        assert_eq!(track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC"), "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(track_id("4uLU6hMCjMI75M1A2tKUQC"), "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn test_catalog_dedup_and_frequencies() {
        let mut builder = CatalogBuilder::new();
        builder.observe(&sample_track("spotify:track:t1", "First"));
        builder.observe(&sample_track("spotify:track:t2", "Second"));
        builder.observe(&sample_track("spotify:track:t1", "Renamed Later"));

        let catalog = builder.finish();
        assert_eq!(catalog.summary.unique_tracks, 2);
        assert_eq!(catalog.summary.total_instances, 3);
        assert_eq!(catalog.frequencies["spotify:track:t1"], 2);
        assert_eq!(catalog.frequencies["spotify:track:t2"], 1);

        // First occurrence wins for metadata
        assert_eq!(catalog.tracks[0].track_name, "First");
        assert_eq!(catalog.mean_frequency(), 1.5);
    }

    #[test]
    fn test_slice_deserialization_ignores_unknown_fields() {
        let json = r#"{
            "info": { "generated_on": "2017-12-03", "slice": "0-999" },
            "playlists": [{
                "pid": 0,
                "name": "road trip",
                "collaborative": "false",
                "num_tracks": 1,
                "tracks": [{
                    "pos": 0,
                    "track_uri": "spotify:track:t1",
                    "track_name": "Song",
                    "artist_name": "Artist",
                    "artist_uri": "spotify:artist:a1",
                    "album_name": "Album",
                    "album_uri": "spotify:album:b1",
                    "duration_ms": 123456
                }]
            }]
        }"#;

        let slice: SliceFile = serde_json::from_str(json).unwrap();
        assert_eq!(slice.playlists.len(), 1);
        assert_eq!(slice.playlists[0].name, "road trip");
        assert_eq!(slice.playlists[0].tracks[0].duration_ms, 123_456);
    }

    #[test]
    fn test_audio_features_roundtrip_ignores_extra_fields() {
        let json = r#"{
            "acousticness": 0.011, "danceability": 0.696, "energy": 0.905,
            "instrumentalness": 0.000011, "liveness": 0.302, "loudness": -2.743,
            "speechiness": 0.103, "tempo": 114.944, "valence": 0.625,
            "key": 7, "mode": 1, "time_signature": 4,
            "id": "4uLU6hMCjMI75M1A2tKUQC", "type": "audio_features"
        }"#;

        let features: AudioFeatures = serde_json::from_str(json).unwrap();
        assert_eq!(features.key, 7);
        assert!((features.tempo - 114.944).abs() < f64::EPSILON);
    }

    #[test]
    fn test_enrich_stats_finalize() {
        let mut stats = EnrichStats {
            total_requested: 200,
            fetched: 150,
            missing: 40,
            failed: 10,
            runtime_secs: 60.0,
            ..Default::default()
        };
        stats.finalize();
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert!((stats.throughput_per_hour - 9000.0).abs() < f64::EPSILON);
    }
}
