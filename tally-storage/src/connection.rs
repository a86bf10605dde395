//! Connection management: one serialized write connection, one reader,
//! plus extra connections for the batch writer. WAL mode so readers
//! never block on the writer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tally_core::errors::StorageError;

use crate::migrations;

/// Distinguishes in-memory engines (shared-cache URI so every
/// connection sees the same database).
static MEM_COUNTER: AtomicUsize = AtomicUsize::new(0);

enum Target {
    File(PathBuf),
    Memory(String),
}

/// Owns the database connections. All writes to a run's mutable fields
/// are serialized behind the write mutex; status transitions always go
/// through CAS updates on top of that.
pub struct DatabaseManager {
    write: Mutex<Connection>,
    read: Mutex<Connection>,
    target: Target,
}

impl DatabaseManager {
    /// Open (creating if needed) a file-backed database and run
    /// migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::sqlite)?;
        }
        let write = Connection::open(path)?;
        apply_pragmas(&write)?;
        migrations::migrate(&write)?;
        let read = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        read_pragmas(&read)?;
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
            target: Target::File(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing). Uses a shared-cache
    /// URI so the batch writer and readers attach to the same data.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let uri = format!(
            "file:tallymem{}?mode=memory&cache=shared",
            MEM_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let write = Connection::open_with_flags(&uri, flags)?;
        memory_pragmas(&write)?;
        migrations::migrate(&write)?;
        let read = Connection::open_with_flags(&uri, flags)?;
        memory_pragmas(&read)?;
        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
            target: Target::Memory(uri),
        })
    }

    /// An additional connection for the batch writer thread.
    pub fn open_batch_connection(&self) -> Result<Connection, StorageError> {
        match &self.target {
            Target::File(path) => {
                let conn = Connection::open(path)?;
                apply_pragmas(&conn)?;
                Ok(conn)
            }
            Target::Memory(uri) => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                let conn = Connection::open_with_flags(uri, flags)?;
                memory_pragmas(&conn)?;
                Ok(conn)
            }
        }
    }

    /// Run a read-only closure on the reader connection.
    pub fn with_reader<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.read.lock().expect("reader mutex poisoned");
        f(&conn)
    }

    /// Run a write closure on the serialized write connection.
    pub fn with_writer<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.write.lock().expect("writer mutex poisoned");
        f(&conn)
    }

    /// WAL checkpoint (no-op for in-memory).
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        if matches!(self.target, Target::Memory(_)) {
            return Ok(());
        }
        self.with_writer(|conn| {
            conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
            Ok(())
        })
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            Target::File(path) => Some(path),
            Target::Memory(_) => None,
        }
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    Ok(())
}

fn read_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    Ok(())
}

fn memory_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    Ok(())
}
