//! Audio-feature enrichment pipeline.
//!
//! Pipeline flow:
//! Catalog URIs → Fetcher Pool → FeatureRecords → audio_features.jsonl
//!
//! With a checkpoint directory the run is resumable: every wave of batches
//! commits through a write-ahead transaction before the checkpoint advances.

use crate::checkpoint::{CheckpointManager, PendingOperation, RetryReason, Transaction, TrackStatus};
use crate::client::SpotifyClient;
use crate::models::{Config, EnrichStats, FeatureRecord, MpdkitError, Result};
use crate::pipeline::ExtractPipeline;
use crate::pool::FetcherPool;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default features file name within the output directory.
pub const FEATURES_FILE: &str = "audio_features.jsonl";

/// Enrichment pipeline: fetch audio features for a track catalog.
pub struct EnrichPipeline {
    pool: FetcherPool,
    config: Config,
    client: Arc<SpotifyClient>,
}

impl EnrichPipeline {
    /// Create a new enrichment pipeline from configuration.
    pub fn new(config: Config, client: Arc<SpotifyClient>) -> Self {
        let pool = FetcherPool::new(Arc::clone(&client), config.enrich.fetchers);
        Self {
            pool,
            config,
            client,
        }
    }

    /// Load track URIs from an extracted catalog file.
    pub fn load_track_uris(path: &Path) -> Result<Vec<String>> {
        let catalog = ExtractPipeline::load_catalog(path)?;
        Ok(catalog.uris())
    }

    /// Run the enrichment pipeline without checkpointing.
    pub async fn run(&self, uris: Vec<String>, output_path: &Path) -> Result<EnrichStats> {
        let start = Instant::now();
        let total = uris.len();

        info!(
            total_tracks = total,
            fetchers = self.config.enrich.fetchers,
            batch_size = self.config.enrich.effective_batch_size(),
            "Starting enrichment"
        );

        let batches = chunk_uris(&uris, self.config.enrich.effective_batch_size());
        let wave_len = (self.config.enrich.fetchers * 2).max(1);

        let pb = progress_bar(total as u64);

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MpdkitError::io("creating output dir", e))?;
        }
        let output_file =
            File::create(output_path).map_err(|e| MpdkitError::io("creating output file", e))?;
        let mut writer = BufWriter::new(output_file);

        let mut stats = EnrichStats {
            total_requested: total,
            ..Default::default()
        };
        let mut failed_uris: Vec<String> = Vec::new();

        for wave in batches.chunks(wave_len) {
            let (features, failed_batches) = self.pool.fetch_all(wave.to_vec()).await;

            stats.batches += wave.len();
            stats.batches_failed += failed_batches.len();

            for (uri, feat) in &features {
                if feat.is_some() {
                    stats.fetched += 1;
                } else {
                    stats.missing += 1;
                }

                let record = FeatureRecord {
                    track_uri: uri.clone(),
                    features: feat.clone(),
                };
                let json = serde_json::to_string(&record).map_err(|e| {
                    MpdkitError::Internal(format!("Failed to serialize record: {e}"))
                })?;
                writeln!(writer, "{json}").map_err(|e| MpdkitError::io("writing output", e))?;
            }

            for batch in failed_batches {
                stats.failed += batch.len();
                failed_uris.extend(batch);
            }

            writer
                .flush()
                .map_err(|e| MpdkitError::io("flushing output", e))?;

            let processed = stats.fetched + stats.missing + stats.failed;
            pb.set_position(processed as u64);
            pb.set_message(format!(
                "fetched: {}, missing: {}, failed: {}",
                stats.fetched, stats.missing, stats.failed
            ));

            if self.config.enrich.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.enrich.delay_ms)).await;
            }
        }

        pb.finish_with_message(format!(
            "Done! {} fetched, {} missing, {} failed",
            stats.fetched, stats.missing, stats.failed
        ));

        self.write_failed_list(output_path, &failed_uris)?;

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();
        self.log_summary(&stats);

        Ok(stats)
    }

    /// Run the enrichment pipeline with optional checkpoint support.
    pub async fn run_with_checkpoint(
        &self,
        uris: Vec<String>,
        output_path: &Path,
        checkpoint: Option<CheckpointManager>,
    ) -> Result<EnrichStats> {
        // If no checkpoint, use the regular run method
        let mut checkpoint = match checkpoint {
            Some(c) => c,
            None => return self.run(uris, output_path).await,
        };

        let start = Instant::now();
        let total = uris.len();

        if checkpoint.state().is_none() {
            checkpoint.init_or_load(&uris)?;
        }

        let checkpoint_dir = checkpoint.dir().to_path_buf();

        // Put interrupted-transaction tracks back in the pending set
        if let Some(ops) = Transaction::recover(&checkpoint_dir)? {
            let state = checkpoint.state_mut().unwrap();
            for op in &ops {
                state.mark_pending(op.uri());
            }
            checkpoint.save()?;
        }

        // Filter to only pending tracks
        let pending = checkpoint.filter_pending(uris);
        let pending_count = pending.len();

        if pending_count == 0 {
            info!("All tracks already processed, nothing to do");
            let state = checkpoint.state().unwrap();
            return Ok(state.to_enrich_stats(0.0));
        }

        info!(
            total_tracks = total,
            pending = pending_count,
            already_done = total - pending_count,
            fetchers = self.config.enrich.fetchers,
            "Resuming enrichment"
        );

        let batches = chunk_uris(&pending, self.config.enrich.effective_batch_size());
        let wave_len = (self.config.enrich.fetchers * 2).max(1);

        let pb = progress_bar(total as u64);
        pb.set_position((total - pending_count) as u64);

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MpdkitError::io("creating output dir", e))?;
        }

        let mut stats = EnrichStats::default();

        for (wave_idx, wave) in batches.chunks(wave_len).enumerate() {
            let (features, failed_batches) = self.pool.fetch_all(wave.to_vec()).await;

            stats.batches += wave.len();
            stats.batches_failed += failed_batches.len();

            // Record the wave in a transaction, then commit output + state
            let mut tx = Transaction::begin(&checkpoint_dir, output_path)?;

            for (uri, feat) in &features {
                let record = FeatureRecord {
                    track_uri: uri.clone(),
                    features: feat.clone(),
                };
                let json = serde_json::to_string(&record).map_err(|e| {
                    MpdkitError::Internal(format!("Failed to serialize record: {e}"))
                })?;

                if feat.is_some() {
                    tx.record_fetched(uri, json)?;
                } else {
                    tx.record_missing(uri, json)?;
                }
            }

            for batch in &failed_batches {
                for uri in batch {
                    tx.record_failed(uri, RetryReason::FetchFailed)?;
                }
            }

            let ops = tx.commit()?;

            let state = checkpoint.state_mut().unwrap();
            for op in &ops {
                match op {
                    PendingOperation::Fetched { uri, .. } => state.mark_fetched(uri),
                    PendingOperation::Missing { uri, .. } => state.mark_missing(uri),
                    PendingOperation::Failed { uri, .. } => state.mark_failed(uri),
                }
            }

            if (wave_idx + 1) % self.config.enrich.save_every == 0 {
                checkpoint.save()?;
            }

            let state = checkpoint.state().unwrap();
            pb.set_position((total - state.stats.pending) as u64);
            pb.set_message(format!(
                "fetched: {}, missing: {}, failed: {}",
                state.stats.fetched, state.stats.missing, state.stats.failed
            ));

            if self.config.enrich.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.enrich.delay_ms)).await;
            }
        }

        checkpoint.save()?;

        let state = checkpoint.state().unwrap();
        pb.finish_with_message(format!(
            "Done! {} fetched, {} missing, {} failed",
            state.stats.fetched, state.stats.missing, state.stats.failed
        ));

        let failed_uris: Vec<String> = state
            .tracks
            .values()
            .filter(|cp| cp.status == TrackStatus::Failed)
            .map(|cp| cp.uri.clone())
            .collect();
        self.write_failed_list(output_path, &failed_uris)?;

        let runtime = start.elapsed().as_secs_f64();
        let mut final_stats = state.to_enrich_stats(runtime);
        final_stats.batches = stats.batches;
        final_stats.batches_failed = stats.batches_failed;
        self.log_summary(&final_stats);

        Ok(final_stats)
    }

    /// Write the list of tracks that could not be fetched.
    fn write_failed_list(&self, output_path: &Path, failed_uris: &[String]) -> Result<()> {
        if failed_uris.is_empty() || !self.config.output.write_failed {
            return Ok(());
        }

        let failed_path = failed_path_for(output_path);
        let file =
            File::create(&failed_path).map_err(|e| MpdkitError::io("creating failed list", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, failed_uris)
            .map_err(|e| MpdkitError::Internal(format!("Serializing failed list: {e}")))?;

        warn!(
            count = failed_uris.len(),
            path = %failed_path.display(),
            "Some tracks could not be fetched"
        );
        Ok(())
    }

    fn log_summary(&self, stats: &EnrichStats) {
        let limiter = self.client.rate_limiter().stats();
        info!(
            fetched = stats.fetched,
            missing = stats.missing,
            failed = stats.failed,
            success_rate = format!("{:.1}%", stats.success_rate * 100.0),
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            requests = limiter.total_requests,
            rate_limited = limiter.total_429s,
            "Enrichment complete"
        );
    }
}

/// Path of the failed-track list next to the output file.
pub fn failed_path_for(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    name.push_str(".failed.json");
    output_path.with_file_name(name)
}

/// Split URIs into batches of at most `size`.
fn chunk_uris(uris: &[String], size: usize) -> Vec<Vec<String>> {
    uris.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_uris_splits_evenly() {
        let uris: Vec<String> = (0..250).map(|i| format!("spotify:track:t{i}")).collect();
        let batches = chunk_uris(&uris, 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 100);
        assert_eq!(batches[2].len(), 50);
    }

    #[test]
    fn test_chunk_uris_never_zero_sized() {
        let uris = vec!["spotify:track:t0".to_string()];
        let batches = chunk_uris(&uris, 0);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_failed_path_appends_suffix() {
        let path = failed_path_for(Path::new("data/interim/audio_features.jsonl"));
        assert_eq!(
            path,
            Path::new("data/interim/audio_features.jsonl.failed.json")
        );
    }
}
