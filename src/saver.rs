//! Background segment saver.
//!
//! One long-lived thread per engine instance. Each tick it tries to take the
//! store write lock without blocking; a tick that loses the race is skipped
//! rather than queued behind the writer.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;

use crate::store::SegmentStore;

pub(crate) struct SegmentSaver {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SegmentSaver {
    pub fn start(
        store: Arc<RwLock<SegmentStore>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("vectours-segment-saver".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(mut store) = store.try_write() else {
                    tracing::debug!("segment save skipped, store is busy");
                    continue;
                };
                if let Err(err) = store.save_dirty_segments() {
                    tracing::warn!(error = %err, "background segment save failed");
                }
            })?;

        Ok(Self { stop_tx, handle })
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}
