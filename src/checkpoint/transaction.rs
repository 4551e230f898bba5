//! Transaction support for atomic checkpoint + output operations.
//!
//! Epistemic foundation:
//! - K_i: Transaction ensures atomicity - all operations succeed or all fail
//! - K_i: Uses write-ahead pattern: record intent → execute → commit
//! - B_i: Partial failure → rollback to consistent state
//! - I^B: Crash during transaction → recovery via pending transaction file

use crate::models::{MpdkitError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reason for marking a track for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// Batch fetch failed (API error, timeout, etc.)
    FetchFailed,
    /// Transaction aborted before completion
    TransactionAborted,
}

/// A pending operation within a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingOperation {
    /// Features fetched; record line destined for the output file
    Fetched { uri: String, record_json: String },
    /// Spotify has no features for this track
    Missing { uri: String, record_json: String },
    /// Track failed after retries
    Failed { uri: String, reason: RetryReason },
}

impl PendingOperation {
    /// The track URI this operation concerns.
    pub fn uri(&self) -> &str {
        match self {
            Self::Fetched { uri, .. } | Self::Missing { uri, .. } | Self::Failed { uri, .. } => uri,
        }
    }
}

/// Transaction state persisted to disk for recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionState {
    /// Unique transaction ID
    pub id: String,
    /// Operations to be committed
    pub operations: Vec<PendingOperation>,
    /// Whether transaction was committed
    pub committed: bool,
    /// Timestamp when transaction started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Atomic transaction for batch operations.
///
/// Ensures that checkpoint updates and output writes happen atomically.
/// If a crash occurs mid-transaction, the pending transaction file allows recovery.
pub struct Transaction {
    /// Transaction ID
    id: String,
    /// Directory for transaction files
    dir: PathBuf,
    /// Path to pending transaction file
    pending_path: PathBuf,
    /// Accumulated operations
    operations: Vec<PendingOperation>,
    /// Output file path (for atomic writes)
    output_path: PathBuf,
    /// Whether the transaction has been committed or aborted
    finished: bool,
}

impl Transaction {
    /// Begin a new transaction.
    ///
    /// Creates a pending transaction file that can be used for recovery.
    pub fn begin(checkpoint_dir: &Path, output_path: &Path) -> Result<Self> {
        let id = format!("tx_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        let pending_path = checkpoint_dir.join(format!("{id}.pending.json"));

        let tx = Self {
            id: id.clone(),
            dir: checkpoint_dir.to_path_buf(),
            pending_path,
            operations: Vec::new(),
            output_path: output_path.to_path_buf(),
            finished: false,
        };

        // Write initial transaction state
        tx.persist_state(false)?;

        debug!(tx_id = %id, "Transaction started");
        Ok(tx)
    }

    /// Check for and recover from any pending transactions.
    ///
    /// Returns the operations that were pending if recovery was needed.
    pub fn recover(checkpoint_dir: &Path) -> Result<Option<Vec<PendingOperation>>> {
        let pattern = checkpoint_dir.join("tx_*.pending.json");
        let pattern_str = pattern.to_string_lossy();

        // Find pending transaction files
        let pending_files: Vec<_> = glob::glob(&pattern_str)
            .map_err(|e| MpdkitError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|r| r.ok())
            .collect();

        if pending_files.is_empty() {
            return Ok(None);
        }

        // Process each pending transaction (should typically be just one)
        let mut recovered_ops = Vec::new();

        for pending_path in pending_files {
            warn!(path = %pending_path.display(), "Found pending transaction, recovering");

            let content = fs::read_to_string(&pending_path)
                .map_err(|e| MpdkitError::io("reading pending transaction", e))?;

            let state: TransactionState = serde_json::from_str(&content)
                .map_err(|e| MpdkitError::ParseError(format!("Invalid transaction state: {e}")))?;

            if state.committed {
                // Transaction was committed but cleanup didn't happen
                debug!(tx_id = %state.id, "Transaction was committed, cleaning up");
            } else {
                // Transaction was not committed - operations need to be retried
                warn!(
                    tx_id = %state.id,
                    ops = state.operations.len(),
                    "Transaction was not committed, marking for retry"
                );
                recovered_ops.extend(state.operations);
            }

            // Clean up the pending file
            fs::remove_file(&pending_path)
                .map_err(|e| MpdkitError::io("removing pending transaction", e))?;
        }

        if recovered_ops.is_empty() {
            Ok(None)
        } else {
            Ok(Some(recovered_ops))
        }
    }

    /// Record a fetched track with its output record line.
    pub fn record_fetched(&mut self, uri: &str, record_json: String) -> Result<()> {
        self.operations.push(PendingOperation::Fetched {
            uri: uri.to_string(),
            record_json,
        });
        self.persist_state(false)
    }

    /// Record a track Spotify has no features for.
    pub fn record_missing(&mut self, uri: &str, record_json: String) -> Result<()> {
        self.operations.push(PendingOperation::Missing {
            uri: uri.to_string(),
            record_json,
        });
        self.persist_state(false)
    }

    /// Record a failed track.
    pub fn record_failed(&mut self, uri: &str, reason: RetryReason) -> Result<()> {
        self.operations.push(PendingOperation::Failed {
            uri: uri.to_string(),
            reason,
        });
        self.persist_state(false)
    }

    /// Commit the transaction atomically.
    ///
    /// This writes all output lines to a temp file, then atomically:
    /// 1. Appends output to the main output file
    /// 2. Marks the transaction as committed
    /// 3. Cleans up the pending file
    pub fn commit(mut self) -> Result<Vec<PendingOperation>> {
        if self.finished {
            return Err(MpdkitError::Internal(
                "Transaction already finished".to_string(),
            ));
        }

        // Collect output lines
        let output_lines: Vec<&str> = self
            .operations
            .iter()
            .filter_map(|op| match op {
                PendingOperation::Fetched { record_json, .. }
                | PendingOperation::Missing { record_json, .. } => Some(record_json.as_str()),
                PendingOperation::Failed { .. } => None,
            })
            .collect();

        // Write outputs to temp file first
        if !output_lines.is_empty() {
            let temp_output = self.dir.join(format!("{}.output.tmp", self.id));
            {
                let file = File::create(&temp_output)
                    .map_err(|e| MpdkitError::io("creating temp output", e))?;
                let mut writer = BufWriter::new(file);
                for line in &output_lines {
                    writeln!(writer, "{line}")
                        .map_err(|e| MpdkitError::io("writing temp output", e))?;
                }
                writer
                    .flush()
                    .map_err(|e| MpdkitError::io("flushing temp output", e))?;
            }

            // Append temp output to main output file
            let temp_content = fs::read_to_string(&temp_output)
                .map_err(|e| MpdkitError::io("reading temp output", e))?;

            let mut output_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.output_path)
                .map_err(|e| MpdkitError::io("opening output file", e))?;

            output_file
                .write_all(temp_content.as_bytes())
                .map_err(|e| MpdkitError::io("appending to output", e))?;
            output_file
                .sync_all()
                .map_err(|e| MpdkitError::io("syncing output", e))?;

            // Remove temp file
            fs::remove_file(&temp_output)
                .map_err(|e| MpdkitError::io("removing temp output", e))?;
        }

        // Mark as committed
        self.persist_state(true)?;

        // Clean up pending file
        if self.pending_path.exists() {
            fs::remove_file(&self.pending_path)
                .map_err(|e| MpdkitError::io("removing pending transaction", e))?;
        }

        self.finished = true;
        debug!(tx_id = %self.id, ops = self.operations.len(), "Transaction committed");

        Ok(std::mem::take(&mut self.operations))
    }

    /// Abort the transaction, discarding all pending operations.
    pub fn abort(mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        // Clean up pending file
        if self.pending_path.exists() {
            fs::remove_file(&self.pending_path)
                .map_err(|e| MpdkitError::io("removing pending transaction", e))?;
        }

        self.finished = true;
        debug!(tx_id = %self.id, "Transaction aborted");
        Ok(())
    }

    /// Get the pending operations.
    pub fn operations(&self) -> &[PendingOperation] {
        &self.operations
    }

    /// Persist current transaction state to disk.
    fn persist_state(&self, committed: bool) -> Result<()> {
        let state = TransactionState {
            id: self.id.clone(),
            operations: self.operations.clone(),
            committed,
            started_at: chrono::Utc::now(),
        };

        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| MpdkitError::Internal(format!("Serializing transaction: {e}")))?;

        fs::write(&self.pending_path, content)
            .map_err(|e| MpdkitError::io("writing pending transaction", e))?;

        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // If transaction was not properly committed or aborted, log a warning
        if !self.finished {
            warn!(
                tx_id = %self.id,
                ops = self.operations.len(),
                "Transaction dropped without commit/abort - will be recovered on restart"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transaction_commit() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_dir = temp_dir.path().join("checkpoint");
        fs::create_dir_all(&checkpoint_dir).unwrap();
        let output_path = temp_dir.path().join("audio_features.jsonl");

        let mut tx = Transaction::begin(&checkpoint_dir, &output_path).unwrap();
        tx.record_fetched(
            "spotify:track:t1",
            r#"{"track_uri":"spotify:track:t1","features":{"tempo":120.0}}"#.to_string(),
        )
        .unwrap();
        tx.record_missing(
            "spotify:track:t2",
            r#"{"track_uri":"spotify:track:t2","features":null}"#.to_string(),
        )
        .unwrap();

        let ops = tx.commit().unwrap();
        assert_eq!(ops.len(), 2);

        // Check output file
        let output = fs::read_to_string(&output_path).unwrap();
        assert!(output.contains("spotify:track:t1"));
        assert!(output.contains(r#""features":null"#));

        // Check no pending files
        let pending: Vec<_> =
            glob::glob(&checkpoint_dir.join("*.pending.json").to_string_lossy())
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_transaction_abort() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_dir = temp_dir.path().join("checkpoint");
        fs::create_dir_all(&checkpoint_dir).unwrap();
        let output_path = temp_dir.path().join("audio_features.jsonl");

        let mut tx = Transaction::begin(&checkpoint_dir, &output_path).unwrap();
        tx.record_fetched(
            "spotify:track:t1",
            r#"{"track_uri":"spotify:track:t1","features":null}"#.to_string(),
        )
        .unwrap();

        tx.abort().unwrap();

        // Check no output file created
        assert!(!output_path.exists());

        // Check no pending files
        let pending: Vec<_> =
            glob::glob(&checkpoint_dir.join("*.pending.json").to_string_lossy())
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();
        assert!(pending.is_empty());
    }

    #[test]
    fn test_transaction_recovery() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_dir = temp_dir.path().join("checkpoint");
        fs::create_dir_all(&checkpoint_dir).unwrap();

        // Create a pending transaction file manually (simulating crash)
        let state = TransactionState {
            id: "tx_test".to_string(),
            operations: vec![PendingOperation::Failed {
                uri: "spotify:track:t1".to_string(),
                reason: RetryReason::FetchFailed,
            }],
            committed: false,
            started_at: chrono::Utc::now(),
        };
        let pending_path = checkpoint_dir.join("tx_test.pending.json");
        fs::write(&pending_path, serde_json::to_string(&state).unwrap()).unwrap();

        // Recover
        let recovered = Transaction::recover(&checkpoint_dir).unwrap();
        assert!(recovered.is_some());
        let ops = recovered.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].uri(), "spotify:track:t1");

        // Pending file should be cleaned up
        assert!(!pending_path.exists());
    }

    #[test]
    fn test_committed_transaction_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let checkpoint_dir = temp_dir.path().join("checkpoint");
        fs::create_dir_all(&checkpoint_dir).unwrap();

        let state = TransactionState {
            id: "tx_done".to_string(),
            operations: vec![PendingOperation::Missing {
                uri: "spotify:track:t1".to_string(),
                record_json: "{}".to_string(),
            }],
            committed: true,
            started_at: chrono::Utc::now(),
        };
        let pending_path = checkpoint_dir.join("tx_done.pending.json");
        fs::write(&pending_path, serde_json::to_string(&state).unwrap()).unwrap();

        let recovered = Transaction::recover(&checkpoint_dir).unwrap();
        assert!(recovered.is_none());
        assert!(!pending_path.exists());
    }
}
