//! Checkpoint module for resumable enrichment runs.
//!
//! Provides:
//! - `CheckpointState`: Per-track status tracking for an enrichment run
//! - `CheckpointManager`: Persistence and loading of checkpoint state
//! - `Transaction`: Atomic batch operations with crash recovery

mod state;
mod transaction;

pub use state::*;
pub use transaction::*;
