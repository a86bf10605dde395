//! Chunked CSV export writing.
//!
//! The reconciler produces records; a dedicated writer thread consumes
//! them from a bounded channel (backpressure) and writes ordered chunk
//! files, flipping each store row `writing → completed` only after the
//! file is fully written and fsynced.

mod read;

pub use read::{read_category_page, read_chunk_header};

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tally_core::errors::ExportError;
use tally_core::traits::IExportChunks;
use tally_core::types::results::{ChunkStatus, ExportCategory, ExportChunkMeta};
use tally_core::RunCancellation;

const CHANNEL_BOUND: usize = 4_096;

/// One reconciliation output row.
#[derive(Debug)]
pub struct ExportRecord {
    pub category: ExportCategory,
    /// Key component values, nulls already rendered as `<null>`.
    pub key_parts: Vec<String>,
    /// Full row of the originating side.
    pub row: Vec<String>,
}

/// Static description of one export target.
#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub run_id: i64,
    pub combination_hash: String,
    /// `exports/run_<id>/comparison_<hash>/`
    pub dir: PathBuf,
    pub key_columns: Vec<String>,
    pub header_a: Vec<String>,
    pub header_b: Vec<String>,
    pub max_rows_per_chunk: usize,
    pub max_bytes_per_chunk: u64,
}

impl ExportSpec {
    /// Chunk header: key columns followed by the full row columns of
    /// the category's originating side. Identical across all chunks of
    /// a category.
    fn header_for(&self, category: ExportCategory) -> Vec<String> {
        let side_header = match category.row_side() {
            tally_core::Side::A => &self.header_a,
            tally_core::Side::B => &self.header_b,
        };
        let mut header: Vec<String> = self.key_columns.iter().map(|c| format!("key_{c}")).collect();
        header.extend(side_header.iter().cloned());
        header
    }

    fn chunk_path(&self, category: ExportCategory, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}_chunk_{index:04}.csv", category.as_str()))
    }
}

/// A writer thread plus the sending half of its bounded queue.
pub struct ExportWriter {
    tx: Option<Sender<ExportRecord>>,
    handle: Option<JoinHandle<Result<Vec<ExportChunkMeta>, ExportError>>>,
}

impl ExportWriter {
    /// Prepare the chunk directory (deleting any partial prior attempt)
    /// and spawn the writer thread.
    pub fn spawn(
        spec: ExportSpec,
        chunks: Arc<dyn IExportChunks>,
        cancellation: RunCancellation,
    ) -> Result<Self, ExportError> {
        if spec.dir.exists() {
            fs::remove_dir_all(&spec.dir).map_err(|e| io_err(&spec.dir, e))?;
        }
        fs::create_dir_all(&spec.dir).map_err(|e| io_err(&spec.dir, e))?;

        let (tx, rx) = bounded(CHANNEL_BOUND);
        let handle = thread::Builder::new()
            .name("tally-export-writer".to_string())
            .spawn(move || writer_loop(spec, chunks, cancellation, rx))
            .expect("failed to spawn export writer thread");

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Send one record. Blocks when the writer is behind — this is the
    /// backpressure that bounds producer memory.
    pub fn send(&self, record: ExportRecord) -> Result<(), ExportError> {
        self.tx
            .as_ref()
            .expect("send after finish")
            .send(record)
            .map_err(|_| ExportError::ChunkRow {
                message: "export writer thread disconnected".to_string(),
            })
    }

    /// Close the queue and wait for the writer to finalize. Returns the
    /// completed chunk metas, ordered by (category, chunk_index).
    pub fn finish(mut self) -> Result<Vec<ExportChunkMeta>, ExportError> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ExportError::ChunkRow {
                message: "export writer thread panicked".to_string(),
            })?,
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for ExportWriter {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

// ─── Writer thread ──────────────────────────────────────────────────

/// `std::io::Write` wrapper tracking bytes written, so rollover can
/// trigger on size without asking the filesystem.
struct CountingWriter {
    inner: File,
    bytes: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct OpenChunk {
    writer: csv::Writer<CountingWriter>,
    index: u32,
    rows: u64,
    path: PathBuf,
}

struct CategoryState {
    category: ExportCategory,
    open: Option<OpenChunk>,
    next_index: u32,
    completed: Vec<ExportChunkMeta>,
}

fn writer_loop(
    spec: ExportSpec,
    chunks: Arc<dyn IExportChunks>,
    cancellation: RunCancellation,
    rx: Receiver<ExportRecord>,
) -> Result<Vec<ExportChunkMeta>, ExportError> {
    let mut states: Vec<CategoryState> = ExportCategory::ALL
        .iter()
        .map(|&category| CategoryState {
            category,
            open: None,
            next_index: 1,
            completed: Vec::new(),
        })
        .collect();

    let mut failed: Option<ExportError> = None;

    for record in rx.iter() {
        if failed.is_some() {
            continue; // drain so the producer never blocks forever
        }
        if cancellation.is_cancelled() {
            failed = Some(ExportError::Cancelled);
            continue;
        }
        if let Err(e) = write_record(&spec, &chunks, &mut states, record) {
            failed = Some(e);
        }
    }

    if cancellation.is_cancelled() && failed.is_none() {
        failed = Some(ExportError::Cancelled);
    }

    match failed {
        None => {
            // Finalize in-flight chunks: the union of completed chunks
            // is the canonical dataset.
            for state in &mut states {
                if let Some(open) = state.open.take() {
                    let meta = finalize_chunk(&spec, &chunks, state.category, open)?;
                    state.completed.push(meta);
                }
            }
            Ok(states.into_iter().flat_map(|s| s.completed).collect())
        }
        Some(err) => {
            // The in-flight chunk is marked failed and never flushed
            // further. Previously completed chunks remain usable.
            for state in &mut states {
                if let Some(open) = state.open.take() {
                    let _ = chunks.fail_chunk(
                        spec.run_id,
                        &spec.combination_hash,
                        state.category,
                        open.index,
                    );
                }
            }
            Err(err)
        }
    }
}

fn write_record(
    spec: &ExportSpec,
    chunks: &Arc<dyn IExportChunks>,
    states: &mut [CategoryState],
    record: ExportRecord,
) -> Result<(), ExportError> {
    let state = states
        .iter_mut()
        .find(|s| s.category == record.category)
        .expect("category state exists");

    if state.open.is_none() {
        state.open = Some(open_chunk(spec, chunks, state.category, state.next_index)?);
        state.next_index += 1;
    }

    let open = state.open.as_mut().expect("chunk just opened");
    let fields = record.key_parts.iter().chain(record.row.iter());
    open.writer
        .write_record(fields)
        .map_err(|e| io_err(&open.path, std::io::Error::other(e)))?;
    open.rows += 1;

    let bytes = open.writer.get_ref().bytes;
    if open.rows >= spec.max_rows_per_chunk as u64 || bytes >= spec.max_bytes_per_chunk {
        let open = state.open.take().expect("open chunk");
        let meta = finalize_chunk(spec, chunks, state.category, open)?;
        state.completed.push(meta);
    }
    Ok(())
}

fn open_chunk(
    spec: &ExportSpec,
    chunks: &Arc<dyn IExportChunks>,
    category: ExportCategory,
    index: u32,
) -> Result<OpenChunk, ExportError> {
    let path = spec.chunk_path(category, index);
    let file = File::create(&path).map_err(|e| io_err(&path, e))?;
    let mut writer = csv::Writer::from_writer(CountingWriter {
        inner: file,
        bytes: 0,
    });
    writer
        .write_record(spec.header_for(category))
        .map_err(|e| io_err(&path, std::io::Error::other(e)))?;

    chunks
        .begin_chunk(&ExportChunkMeta {
            run_id: spec.run_id,
            combination_hash: spec.combination_hash.clone(),
            category,
            chunk_index: index,
            row_count: 0,
            byte_size: 0,
            path: path.display().to_string(),
            status: ChunkStatus::Writing,
        })
        .map_err(|e| ExportError::ChunkRow {
            message: e.to_string(),
        })?;

    Ok(OpenChunk {
        writer,
        index,
        rows: 0,
        path,
    })
}

/// Flush, fsync, then flip the store row to `completed` in a single
/// update with the final counts.
fn finalize_chunk(
    spec: &ExportSpec,
    chunks: &Arc<dyn IExportChunks>,
    category: ExportCategory,
    open: OpenChunk,
) -> Result<ExportChunkMeta, ExportError> {
    let OpenChunk {
        writer,
        index,
        rows,
        path,
    } = open;
    let counting = writer
        .into_inner()
        .map_err(|e| io_err(&path, std::io::Error::other(e)))?;
    let bytes = counting.bytes;
    counting.inner.sync_all().map_err(|e| io_err(&path, e))?;

    chunks
        .complete_chunk(
            spec.run_id,
            &spec.combination_hash,
            category,
            index,
            rows,
            bytes,
        )
        .map_err(|e| ExportError::ChunkRow {
            message: e.to_string(),
        })?;

    Ok(ExportChunkMeta {
        run_id: spec.run_id,
        combination_hash: spec.combination_hash.clone(),
        category,
        chunk_index: index,
        row_count: rows,
        byte_size: bytes,
        path: path.display().to_string(),
        status: ChunkStatus::Completed,
    })
}

fn io_err(path: &std::path::Path, e: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
