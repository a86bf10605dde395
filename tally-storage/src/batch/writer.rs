//! Dedicated writer thread with a bounded crossbeam channel.
//! Batches writes into single transactions for throughput.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use tally_core::errors::StorageError;

use super::commands::BatchCommand;
use crate::queries;

const CHANNEL_BOUND: usize = 1024;
const BATCH_SIZE: usize = 500;
const FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Statistics from the batch writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriteStats {
    pub result_rows: usize,
    pub summary_rows: usize,
    pub flushes: usize,
}

/// A batch writer that accepts commands via a channel and writes them
/// in batched transactions on a dedicated thread.
pub struct BatchWriter {
    tx: Sender<BatchCommand>,
    handle: Option<JoinHandle<Result<WriteStats, StorageError>>>,
}

impl BatchWriter {
    /// Create a new batch writer with a dedicated writer thread.
    /// The `conn` is moved to the writer thread.
    pub fn new(conn: Connection) -> Self {
        let (tx, rx) = bounded(CHANNEL_BOUND);

        let handle = thread::Builder::new()
            .name("tally-batch-writer".to_string())
            .spawn(move || writer_loop(conn, rx))
            .expect("failed to spawn batch writer thread");

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Send a command to the batch writer.
    pub fn send(&self, cmd: BatchCommand) -> Result<(), StorageError> {
        self.tx.send(cmd).map_err(|_| StorageError::SqliteError {
            message: "batch writer channel disconnected".to_string(),
        })
    }

    /// Flush pending writes (fire-and-forget, does NOT wait).
    pub fn flush(&self) -> Result<(), StorageError> {
        self.send(BatchCommand::Flush)
    }

    /// Flush pending writes and block until the writer thread confirms
    /// all buffered commands have been committed.
    ///
    /// Use this when downstream code needs to read data that was just
    /// written (e.g. the storing stage before result pagination).
    pub fn flush_sync(&self) -> Result<(), StorageError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(0);
        self.send(BatchCommand::FlushSync(tx))?;
        rx.recv().map_err(|_| StorageError::SqliteError {
            message: "batch writer thread did not respond to flush_sync".to_string(),
        })
    }

    /// Shut down the writer thread and wait for completion.
    pub fn shutdown(mut self) -> Result<WriteStats, StorageError> {
        let _ = self.tx.send(BatchCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| StorageError::SqliteError {
                message: "batch writer thread panicked".to_string(),
            })?
        } else {
            Ok(WriteStats::default())
        }
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(BatchCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(
    conn: Connection,
    rx: Receiver<BatchCommand>,
) -> Result<WriteStats, StorageError> {
    let mut buffer: Vec<BatchCommand> = Vec::with_capacity(BATCH_SIZE);
    let mut stats = WriteStats::default();

    loop {
        match rx.recv_timeout(FLUSH_TIMEOUT) {
            Ok(BatchCommand::Shutdown) => {
                flush_buffer(&conn, &mut buffer, &mut stats)?;
                break;
            }
            Ok(BatchCommand::Flush) => {
                flush_buffer(&conn, &mut buffer, &mut stats)?;
            }
            Ok(BatchCommand::FlushSync(done_tx)) => {
                flush_buffer(&conn, &mut buffer, &mut stats)?;
                let _ = done_tx.send(());
            }
            Ok(cmd) => {
                buffer.push(cmd);
                if buffer.len() >= BATCH_SIZE {
                    flush_buffer(&conn, &mut buffer, &mut stats)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buffer.is_empty() {
                    flush_buffer(&conn, &mut buffer, &mut stats)?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush_buffer(&conn, &mut buffer, &mut stats)?;
                break;
            }
        }
    }

    Ok(stats)
}

fn flush_buffer(
    conn: &Connection,
    buffer: &mut Vec<BatchCommand>,
    stats: &mut WriteStats,
) -> Result<(), StorageError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;

    // Track stats for this batch separately; only fold into `stats`
    // after commit.
    let mut batch_stats = WriteStats::default();

    // Iterate by reference so the buffer is not consumed until commit
    // succeeds. If an insert fails, tx drops (auto-rollback) and the
    // buffer retains its commands.
    for cmd in buffer.iter() {
        match cmd {
            BatchCommand::UpsertResults(rows) => {
                batch_stats.result_rows += queries::results::upsert_results(&tx, rows)?;
            }
            BatchCommand::UpsertSummary(summary) => {
                queries::summaries::upsert_summary(&tx, summary)?;
                batch_stats.summary_rows += 1;
            }
            BatchCommand::Flush
            | BatchCommand::FlushSync(_)
            | BatchCommand::Shutdown => unreachable!("control commands never buffered"),
        }
    }

    tx.commit()?;
    buffer.clear();
    stats.result_rows += batch_stats.result_rows;
    stats.summary_rows += batch_stats.summary_rows;
    stats.flushes += 1;
    Ok(())
}
