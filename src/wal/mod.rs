//! Write-ahead log with checkpointed crash recovery.
//!
//! The log is a single append-only file of operation records separated by
//! [`RECORD_SEPARATOR`], interleaved with bare ASCII segment-id markers. The
//! checkpoint file holds the id of the last segment known to be durably
//! saved; replay only collects operations logged after that marker.
//!
//! Operation appends go through the [batched writer](batcher); segment-id
//! markers are written synchronously so they are always visible before any
//! vector routed into the new segment.

mod batcher;
mod operation;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use batcher::{WalTicket, MAX_BATCH_SIZE};
pub use operation::Operation;

use batcher::WalWriterBatcher;

pub const LOG_FILE_NAME: &str = "vectours_wal.log";
pub const CHECKPOINT_FILE_NAME: &str = "vectours_wal_checkpoint.dat";

/// Separator between log records. Three bytes so a binary payload is
/// vanishingly unlikely to contain it; replay skips any record that fails to
/// decode anyway.
pub const RECORD_SEPARATOR: &[u8] = b"\x1d\x1d\n";

#[derive(Debug, Clone, Error)]
pub enum WalError {
    #[error("wal i/o failed: {0}")]
    Io(Arc<io::Error>),

    #[error("wal writer is shut down")]
    Shutdown,

    #[error("corrupt wal checkpoint: {content:?}")]
    CorruptCheckpoint { content: String },
}

impl From<io::Error> for WalError {
    fn from(err: io::Error) -> Self {
        WalError::Io(Arc::new(err))
    }
}

pub struct WriteAheadLogger {
    dir: PathBuf,
    batcher: WalWriterBatcher,
}

impl WriteAheadLogger {
    pub fn new(dir: PathBuf) -> Result<Self, WalError> {
        let batcher = WalWriterBatcher::start(dir.join(LOG_FILE_NAME))?;
        Ok(Self { dir, batcher })
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Submit an operation to the batched writer.
    ///
    /// The returned ticket resolves once the operation's bytes are appended.
    pub fn append(&self, operation: Operation) -> WalTicket {
        self.batcher.submit(operation)
    }

    /// Synchronously append a segment-id marker. Not batched: the marker must
    /// precede every insert routed into that segment.
    pub fn new_segment(&self, segment_id: u64) -> Result<(), WalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .map_err(WalError::from)?;
        file.write_all(segment_id.to_string().as_bytes())
            .and_then(|_| file.write_all(RECORD_SEPARATOR))
            .map_err(WalError::from)
    }

    /// Operations to replay, starting after the checkpointed segment id (or
    /// from the beginning when no checkpoint exists).
    ///
    /// `Insert` records are rewritten to `InsertInSegment` against the
    /// segment current at their position in the log, so recovery puts each
    /// vector back where it originally lived. Undecodable records are
    /// skipped.
    pub fn load_from_checkpoint(&self) -> Result<Vec<Operation>, WalError> {
        let checkpoint = self.last_checkpointed_segment_id()?;
        let bytes = self.read_log()?;

        let mut operations = Vec::new();
        let mut collecting = checkpoint.is_none();
        let mut passed_checkpoint = false;
        let mut current_segment: Option<u64> = None;

        for record in split_records(&bytes) {
            if let Some(segment_id) = parse_segment_marker(record) {
                current_segment = Some(segment_id);
                if checkpoint == Some(segment_id) {
                    passed_checkpoint = true;
                } else if passed_checkpoint {
                    collecting = true;
                }
                if collecting {
                    operations.push(Operation::CreateSegment { segment_id });
                }
                continue;
            }

            if !collecting {
                continue;
            }
            match Operation::decode(record) {
                Ok(Operation::Insert { vector }) => match current_segment {
                    Some(segment_id) => operations.push(Operation::InsertInSegment {
                        vector,
                        segment_id,
                    }),
                    None => operations.push(Operation::Insert { vector }),
                },
                Ok(operation) => operations.push(operation),
                Err(err) => {
                    tracing::warn!(bytes = record.len(), error = %err, "skipping malformed wal record");
                }
            }
        }

        Ok(operations)
    }

    /// Overwrite the checkpoint with the id of the last durably-saved
    /// segment.
    pub fn mark_last_checkpoint(&self, segment_id: u64) -> Result<(), WalError> {
        fs::write(self.checkpoint_path(), segment_id.to_string()).map_err(WalError::from)
    }

    pub fn last_checkpointed_segment_id(&self) -> Result<Option<u64>, WalError> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(WalError::from)?;
        content
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| WalError::CorruptCheckpoint { content })
    }

    /// Highest segment-id marker in the log, sealed or not. Used to resume
    /// segment-id allocation after a restart.
    pub fn latest_segment_id_including_unclosed(&self) -> Result<Option<u64>, WalError> {
        let bytes = self.read_log()?;
        Ok(split_records(&bytes)
            .iter()
            .filter_map(|record| parse_segment_marker(record))
            .max())
    }

    /// Delete the log and checkpoint artifacts. Full-reset path only.
    pub fn clear_log(&self) -> Result<(), WalError> {
        for path in [self.log_path(), self.checkpoint_path()] {
            if path.exists() {
                fs::remove_file(path).map_err(WalError::from)?;
            }
        }
        Ok(())
    }

    /// Drain and stop the batched writer, bounded by `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        self.batcher.shutdown(timeout);
    }

    fn read_log(&self) -> Result<Vec<u8>, WalError> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        fs::read(path).map_err(WalError::from)
    }
}

/// Split the raw log into records. A trailing partial record (torn final
/// write) is dropped.
pub(crate) fn split_records(bytes: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + RECORD_SEPARATOR.len() <= bytes.len() {
        if &bytes[i..i + RECORD_SEPARATOR.len()] == RECORD_SEPARATOR {
            records.push(&bytes[start..i]);
            i += RECORD_SEPARATOR.len();
            start = i;
        } else {
            i += 1;
        }
    }
    records
}

fn parse_segment_marker(record: &[u8]) -> Option<u64> {
    if record.is_empty() || !record.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(record).ok()?.parse().ok()
}
