//! mpdkit - Million Playlist Dataset extraction and Spotify audio-feature enrichment.
//!
//! ## Architecture
//!
//! mpdkit prepares the Spotify Million Playlist Dataset for downstream
//! recommender research in three stages:
//! - **Count**: inspect a dataset directory and classify it (full MPD,
//!   challenge set, or sample)
//! - **Extract**: deduplicate the track catalog across slice files and
//!   record per-track occurrence frequencies
//! - **Enrich**: fetch per-track audio features from the Spotify Web API
//!   with batching, adaptive rate limiting, and resumable checkpoints
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff)

pub mod checkpoint;
pub mod client;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use checkpoint::{CheckpointManager, CheckpointState};
pub use client::{RateLimiter, SpotifyClient};
pub use models::{AudioFeatures, Config, MpdkitError, Result, TrackCatalog};
pub use pipeline::{EnrichPipeline, ExtractPipeline};
pub use pool::FetcherPool;
