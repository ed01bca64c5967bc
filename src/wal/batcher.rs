//! Batched WAL writer.
//!
//! A single dedicated thread owns the log-file append path. Concurrent
//! submissions queue behind it; each flush cycle drains up to
//! [`MAX_BATCH_SIZE`] operations, appends them with one write call, and then
//! resolves every operation's completion ticket. A failed flush fails every
//! member of that batch with the same error.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Operation, WalError, RECORD_SEPARATOR};

/// Operations flushed per append call, at most.
pub const MAX_BATCH_SIZE: usize = 500;

/// Completion signal for one submitted operation.
///
/// Resolves once the operation's bytes were appended to the log, or with the
/// failure that hit its batch.
pub struct WalTicket {
    rx: mpsc::Receiver<Result<(), WalError>>,
}

impl WalTicket {
    /// Block until the operation is durable.
    pub fn wait(self) -> Result<(), WalError> {
        match self.rx.recv() {
            Ok(result) => result,
            // Writer died without resolving us.
            Err(_) => Err(WalError::Shutdown),
        }
    }
}

struct BatchItem {
    operation: Operation,
    done: mpsc::Sender<Result<(), WalError>>,
}

pub(crate) struct WalWriterBatcher {
    tx: Mutex<Option<mpsc::Sender<BatchItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    exit_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl WalWriterBatcher {
    pub fn start(log_path: PathBuf) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<BatchItem>();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("vectours-wal-writer".to_string())
            .spawn(move || {
                run_writer(&log_path, rx);
                let _ = exit_tx.send(());
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            exit_rx: Mutex::new(Some(exit_rx)),
        })
    }

    /// Queue an operation for the next flush cycle.
    ///
    /// After [`shutdown`](Self::shutdown) has begun, the returned ticket
    /// fails immediately.
    pub fn submit(&self, operation: Operation) -> WalTicket {
        let (done_tx, done_rx) = mpsc::channel();
        let guard = self.tx.lock();
        if let Some(tx) = guard.as_ref() {
            if let Err(mpsc::SendError(item)) = tx.send(BatchItem {
                operation,
                done: done_tx,
            }) {
                let _ = item.done.send(Err(WalError::Shutdown));
            }
        } else {
            let _ = done_tx.send(Err(WalError::Shutdown));
        }
        WalTicket { rx: done_rx }
    }

    /// Stop intake, let the worker drain and flush what is queued, and wait
    /// for it up to `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        drop(self.tx.lock().take());

        let Some(exit_rx) = self.exit_rx.lock().take() else {
            return;
        };
        match exit_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.lock().take() {
                    let _ = worker.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?timeout, "wal writer did not drain before the shutdown timeout");
            }
        }
    }
}

fn run_writer(log_path: &std::path::Path, rx: mpsc::Receiver<BatchItem>) {
    // `recv` keeps returning queued items after the sender side disconnects,
    // so dropping the sender drains the queue before the loop exits.
    while let Ok(first) = rx.recv() {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(item) => batch.push(item),
                Err(_) => break,
            }
        }

        match flush_batch(log_path, &batch) {
            Ok(()) => {
                tracing::debug!(operations = batch.len(), "flushed wal batch");
                for item in batch {
                    let _ = item.done.send(Ok(()));
                }
            }
            Err(err) => {
                tracing::warn!(
                    operations = batch.len(),
                    error = %err,
                    "failed to flush wal batch"
                );
                let shared = Arc::new(err);
                for item in batch {
                    let _ = item.done.send(Err(WalError::Io(Arc::clone(&shared))));
                }
            }
        }
    }
}

fn flush_batch(log_path: &std::path::Path, batch: &[BatchItem]) -> io::Result<()> {
    let mut buf = Vec::new();
    for item in batch {
        let bytes = item
            .operation
            .encode()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        buf.extend_from_slice(&bytes);
        buf.extend_from_slice(RECORD_SEPARATOR);
    }

    let mut file = OpenOptions::new().create(true).append(true).open(log_path)?;
    file.write_all(&buf)
}
