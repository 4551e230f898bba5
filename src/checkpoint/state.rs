//! Checkpoint state management for resumable enrichment.
//!
//! Epistemic foundation:
//! - K_i: Checkpoints track which track URIs have been processed
//! - K_i: State is persisted to disk atomically (write-then-rename)
//! - B_i: Checkpoint file may not exist → Option
//! - I^B: Crash during write → backup file provides recovery

use crate::models::{EnrichStats, MpdkitError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Status of a track in the enrichment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Not yet requested
    Pending,
    /// Features fetched and written
    Fetched,
    /// Spotify has no features for this track
    Missing,
    /// Failed after retries
    Failed,
}

/// Checkpoint entry for a single track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackCheckpoint {
    /// Track URI
    pub uri: String,
    /// Current status
    pub status: TrackStatus,
    /// Timestamp of last update
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint state for an enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Total tracks to process
    pub total_tracks: usize,
    /// Per-URI statuses
    pub tracks: HashMap<String, TrackCheckpoint>,
    /// Aggregate statistics
    pub stats: CheckpointStats,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Statistics tracked in the checkpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub pending: usize,
    pub fetched: usize,
    pub missing: usize,
    pub failed: usize,
}

impl CheckpointState {
    /// Create a new checkpoint state over a set of track URIs.
    pub fn new(uris: &[String]) -> Self {
        let now = Utc::now();
        let mut state = Self {
            total_tracks: uris.len(),
            tracks: HashMap::with_capacity(uris.len()),
            stats: CheckpointStats {
                pending: uris.len(),
                ..Default::default()
            },
            started_at: now,
            updated_at: now,
        };

        for uri in uris {
            state.tracks.insert(
                uri.clone(),
                TrackCheckpoint {
                    uri: uri.clone(),
                    status: TrackStatus::Pending,
                    updated_at: now,
                },
            );
        }

        state
    }

    /// Get pending track URIs.
    pub fn pending_uris(&self) -> Vec<String> {
        self.tracks
            .iter()
            .filter(|(_, cp)| cp.status == TrackStatus::Pending)
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    fn transition(&mut self, uri: &str, to: TrackStatus) {
        if let Some(cp) = self.tracks.get_mut(uri) {
            match cp.status {
                TrackStatus::Pending => self.stats.pending -= 1,
                TrackStatus::Fetched => self.stats.fetched -= 1,
                TrackStatus::Missing => self.stats.missing -= 1,
                TrackStatus::Failed => self.stats.failed -= 1,
            }
            match to {
                TrackStatus::Pending => self.stats.pending += 1,
                TrackStatus::Fetched => self.stats.fetched += 1,
                TrackStatus::Missing => self.stats.missing += 1,
                TrackStatus::Failed => self.stats.failed += 1,
            }
            cp.status = to;
            cp.updated_at = Utc::now();
        }
        self.updated_at = Utc::now();
    }

    /// Mark a track's features as fetched and written.
    pub fn mark_fetched(&mut self, uri: &str) {
        self.transition(uri, TrackStatus::Fetched);
    }

    /// Mark a track as having no features on Spotify.
    pub fn mark_missing(&mut self, uri: &str) {
        self.transition(uri, TrackStatus::Missing);
    }

    /// Mark a track as failed.
    pub fn mark_failed(&mut self, uri: &str) {
        self.transition(uri, TrackStatus::Failed);
    }

    /// Put a track back in the pending set (retry after recovery).
    pub fn mark_pending(&mut self, uri: &str) {
        self.transition(uri, TrackStatus::Pending);
    }

    /// Check if all tracks are processed.
    pub fn is_complete(&self) -> bool {
        self.stats.pending == 0
    }

    /// Get progress percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.total_tracks == 0 {
            return 100.0;
        }
        let processed = self.stats.fetched + self.stats.missing + self.stats.failed;
        (processed as f64 / self.total_tracks as f64) * 100.0
    }

    /// Convert to EnrichStats.
    pub fn to_enrich_stats(&self, runtime_secs: f64) -> EnrichStats {
        let mut stats = EnrichStats {
            total_requested: self.total_tracks,
            fetched: self.stats.fetched,
            missing: self.stats.missing,
            failed: self.stats.failed,
            runtime_secs,
            ..Default::default()
        };
        stats.finalize();
        stats
    }
}

/// Checkpoint manager for persisting and loading checkpoint state.
pub struct CheckpointManager {
    /// Directory for checkpoint files
    dir: PathBuf,
    /// Path to main checkpoint file
    checkpoint_path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Current state
    state: Option<CheckpointState>,
}

impl CheckpointManager {
    /// Create a new checkpoint manager.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| MpdkitError::io("creating checkpoint dir", e))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            checkpoint_path: dir.join("checkpoint.json"),
            backup_path: dir.join("checkpoint.backup.json"),
            state: None,
        })
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Initialize a new checkpoint or load an existing one.
    pub fn init_or_load(&mut self, uris: &[String]) -> Result<&CheckpointState> {
        if self.exists() {
            self.load()?;
            let state = self.state.as_ref().unwrap();
            info!(
                pending = state.stats.pending,
                fetched = state.stats.fetched,
                "Resuming from checkpoint"
            );
        } else {
            self.state = Some(CheckpointState::new(uris));
            self.save()?;
            info!(total = uris.len(), "Created new checkpoint");
        }
        Ok(self.state.as_ref().unwrap())
    }

    /// Load checkpoint from disk.
    pub fn load(&mut self) -> Result<&CheckpointState> {
        let file = File::open(&self.checkpoint_path)
            .map_err(|e| MpdkitError::io("opening checkpoint", e))?;
        let reader = BufReader::new(file);
        let state: CheckpointState = serde_json::from_reader(reader)
            .map_err(|e| MpdkitError::ParseError(format!("Invalid checkpoint: {e}")))?;

        self.state = Some(state);
        Ok(self.state.as_ref().unwrap())
    }

    /// Save checkpoint to disk (atomic write).
    pub fn save(&self) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| MpdkitError::Internal("No checkpoint state to save".to_string()))?;

        // Backup existing checkpoint
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| MpdkitError::io("backing up checkpoint", e))?;
        }

        // Write to temp file
        let temp_path = self.dir.join("checkpoint.tmp.json");
        let file =
            File::create(&temp_path).map_err(|e| MpdkitError::io("creating temp checkpoint", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, state)
            .map_err(|e| MpdkitError::Internal(format!("Serializing checkpoint: {e}")))?;

        // Atomic rename
        fs::rename(&temp_path, &self.checkpoint_path)
            .map_err(|e| MpdkitError::io("renaming checkpoint", e))?;

        debug!("Checkpoint saved");
        Ok(())
    }

    /// Get mutable reference to state.
    pub fn state_mut(&mut self) -> Option<&mut CheckpointState> {
        self.state.as_mut()
    }

    /// Get reference to state.
    pub fn state(&self) -> Option<&CheckpointState> {
        self.state.as_ref()
    }

    /// Filter a URI list down to the pending ones.
    pub fn filter_pending(&self, uris: Vec<String>) -> Vec<String> {
        let state = match &self.state {
            Some(s) => s,
            None => return uris,
        };

        let pending: HashSet<_> = state.pending_uris().into_iter().collect();
        uris.into_iter().filter(|u| pending.contains(u)).collect()
    }

    /// Get checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn uris(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("spotify:track:t{i}")).collect()
    }

    #[test]
    fn test_state_transitions_update_stats() {
        let mut state = CheckpointState::new(&uris(3));
        assert_eq!(state.stats.pending, 3);

        state.mark_fetched("spotify:track:t0");
        state.mark_missing("spotify:track:t1");
        state.mark_failed("spotify:track:t2");

        assert_eq!(state.stats.pending, 0);
        assert_eq!(state.stats.fetched, 1);
        assert_eq!(state.stats.missing, 1);
        assert_eq!(state.stats.failed, 1);
        assert!(state.is_complete());
        assert!((state.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_returns_track_to_pending() {
        let mut state = CheckpointState::new(&uris(1));
        state.mark_failed("spotify:track:t0");
        assert!(state.is_complete());

        state.mark_pending("spotify:track:t0");
        assert_eq!(state.stats.failed, 0);
        assert_eq!(state.pending_uris(), vec!["spotify:track:t0".to_string()]);
    }

    #[test]
    fn test_unknown_uri_is_ignored() {
        let mut state = CheckpointState::new(&uris(1));
        state.mark_fetched("spotify:track:unknown");
        assert_eq!(state.stats.pending, 1);
        assert_eq!(state.stats.fetched, 0);
    }

    #[test]
    fn test_manager_roundtrip_and_resume() {
        let dir = TempDir::new().unwrap();
        let tracks = uris(4);

        {
            let mut mgr = CheckpointManager::new(dir.path()).unwrap();
            mgr.init_or_load(&tracks).unwrap();
            mgr.state_mut().unwrap().mark_fetched("spotify:track:t0");
            mgr.state_mut().unwrap().mark_missing("spotify:track:t1");
            mgr.save().unwrap();
        }

        let mut mgr = CheckpointManager::new(dir.path()).unwrap();
        let state = mgr.init_or_load(&tracks).unwrap();
        assert_eq!(state.stats.fetched, 1);
        assert_eq!(state.stats.missing, 1);
        assert_eq!(state.stats.pending, 2);

        let remaining = mgr.filter_pending(tracks);
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"spotify:track:t0".to_string()));
    }

    #[test]
    fn test_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let mut mgr = CheckpointManager::new(dir.path()).unwrap();
        mgr.init_or_load(&uris(1)).unwrap();
        mgr.state_mut().unwrap().mark_fetched("spotify:track:t0");
        mgr.save().unwrap();

        assert!(dir.path().join("checkpoint.json").exists());
        assert!(dir.path().join("checkpoint.backup.json").exists());
    }
}
