//! Background flush task owned by the WAL.
//!
//! One task per WAL instance: it drains the bounded append queue,
//! forces buffered bytes to disk on a periodic tick, services flush
//! barriers, and drains-then-flushes once more on shutdown. I/O
//! failures on the background paths are logged, never surfaced; a
//! flush barrier reports its outcome back to the caller.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::Result;

use super::{Writer, FLUSH_INTERVAL};

pub(crate) async fn run(
    writer: Arc<Mutex<Writer>>,
    mut entries: mpsc::Receiver<String>,
    mut barriers: mpsc::Receiver<oneshot::Sender<Result<()>>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            Some(entry) = entries.recv() => {
                if let Err(e) = write_entry(&writer, &entry) {
                    tracing::error!(error = %e, "WAL write failed");
                }
            }

            Some(ack) = barriers.recv() => {
                let result = drain_and_flush(&writer, &mut entries);
                let _ = ack.send(result);
            }

            _ = ticker.tick() => {
                if let Err(e) = flush(&writer) {
                    tracing::error!(error = %e, "WAL periodic flush failed");
                }
            }

            _ = shutdown.recv() => {
                if let Err(e) = drain_and_flush(&writer, &mut entries) {
                    tracing::error!(error = %e, "WAL flush failed during shutdown");
                }
                return;
            }
        }
    }
}

fn write_entry(writer: &Mutex<Writer>, entry: &str) -> Result<()> {
    writer.lock()?.write_entry(entry)
}

fn flush(writer: &Mutex<Writer>) -> Result<()> {
    writer.lock()?.flush_sync()
}

/// Writes everything still queued, then flushes and syncs.
fn drain_and_flush(writer: &Mutex<Writer>, entries: &mut mpsc::Receiver<String>) -> Result<()> {
    let mut writer = writer.lock()?;
    while let Ok(entry) = entries.try_recv() {
        writer.write_entry(&entry)?;
    }
    writer.flush_sync()
}
