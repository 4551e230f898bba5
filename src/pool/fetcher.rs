//! Fetcher pool for concurrent audio-feature batches.
//!
//! Epistemic foundation:
//! - K_i: Fetchers retrieve features by calling the Spotify Web API
//! - K_i: Multiple batches can be in flight in parallel
//! - B_i: Each batch may succeed or fail → Result
//! - I^R: Concurrency is configurable

use crate::client::SpotifyClient;
use crate::models::{AudioFeatures, MpdkitError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Fetcher pool for parallel audio-feature batches.
///
/// Cheap to clone: clones share the client and the concurrency budget.
#[derive(Clone)]
pub struct FetcherPool {
    /// Spotify client (shared)
    client: Arc<SpotifyClient>,
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    /// Pool size (max concurrent batches)
    pool_size: usize,
}

impl FetcherPool {
    /// Create a new fetcher pool.
    pub fn new(client: Arc<SpotifyClient>, pool_size: usize) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Max concurrent batches.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch features for a single batch of ≤100 URIs.
    ///
    /// B_i(fetch succeeds) → Result
    pub async fn fetch_batch(
        &self,
        uris: &[String],
    ) -> Result<HashMap<String, Option<AudioFeatures>>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| MpdkitError::Internal("Semaphore closed".to_string()))?;

        self.client.audio_features_batch(uris).await
    }

    /// Fetch features for multiple batches in parallel.
    ///
    /// Returns (fetched_features, failed_batches).
    pub async fn fetch_all(
        &self,
        batches: Vec<Vec<String>>,
    ) -> (HashMap<String, Option<AudioFeatures>>, Vec<Vec<String>>) {
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            let pool = self.clone();
            let handle = tokio::spawn(async move {
                let result = pool.fetch_batch(&batch).await;
                (batch, result)
            });
            handles.push(handle);
        }

        let mut features = HashMap::new();
        let mut failed = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((_batch, Ok(batch_features))) => features.extend(batch_features),
                Ok((batch, Err(e))) => {
                    warn!(batch_size = batch.len(), error = %e, "Batch fetch failed");
                    failed.push(batch);
                }
                Err(e) => {
                    warn!(error = %e, "Fetch task panicked");
                }
            }
        }

        (features, failed)
    }
}
