//! # Engine - Rotating Store Piece
//!
//! One **piece** of a rotating store: an independent, ordered, crash-safe
//! key-value database living in its own directory. The rotating stores in the
//! `rotation` crate open many of these and treat each one as a shard.
//!
//! ## Layout
//!
//! ```text
//! <piece dir>/
//!   SNAPSHOT      all live pairs as of the last checkpoint (bounded WAL frames)
//!   wal.log       batch frames appended since that checkpoint
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                  |
//! |----------------|----------------------------------------------------------|
//! | [`lib.rs`]     | `Engine` struct, `open`, accessors, `Debug`, `Drop`      |
//! | [`database`]   | The `Database` contract the rotating stores consume      |
//! | [`batch`]      | `WriteBatch`, an owned single-use group of mutations     |
//! | [`write`]      | `insert`, `kill`, `commit`, `checkpoint`                 |
//! | [`read`]       | `lookup`, `exists`, `for_each`, `for_each_with_prefix`   |
//! | [`recovery`]   | snapshot + WAL replay, tmp file cleanup                  |
//! | [`snapshot`]   | atomic snapshot rewrite (tmp + fsync + rename)           |
//!
//! ## Crash Safety
//!
//! Each unit of work is one WAL frame appended **before** the in-memory table
//! changes. A torn frame is discarded on replay, so a committed batch is either
//! fully visible after restart or not at all. Checkpoints write the snapshot
//! through a temp file and only then truncate the WAL; replaying an old WAL
//! over a newer snapshot is harmless because every operation is absolute.
//!
//! ## Size
//!
//! A piece lives entirely in memory and each checkpoint rewrites all of it,
//! so `EngineOptions::max_piece_bytes` caps its live data. Writes that would
//! grow a piece past the cap fail without touching the WAL; deletes and
//! shrinking overwrites are always accepted. Rotating stores keep pieces
//! small by starting a new one.
mod batch;
mod database;
mod read;
mod recovery;
mod snapshot;
mod write;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use wal::WalWriter;

pub use batch::WriteBatch;
pub use config::EngineOptions;
pub use database::{Database, Visitor};
pub use recovery::replay_into;
pub use snapshot::SNAPSHOT_FILENAME;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (64 MiB).
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Name of the write-ahead log within a piece directory.
pub const WAL_FILENAME: &str = "wal.log";

pub(crate) type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Writer-side state, guarded by one mutex so frames and sequence numbers
/// are assigned in the same order.
pub(crate) struct LogState {
    pub(crate) writer: WalWriter,
    pub(crate) seq: u64,
    /// Bytes appended to the WAL since the last checkpoint.
    pub(crate) wal_bytes: u64,
    /// Key + value bytes of every live pair.
    pub(crate) live_bytes: u64,
}

/// A single on-disk piece.
///
/// All methods take `&self`: point reads share an `RwLock` over the ordered
/// table, writers serialize through the WAL mutex and then briefly take the
/// table write lock to apply a whole record at once.
pub struct Engine {
    pub(crate) dir: PathBuf,
    pub(crate) table: RwLock<Table>,
    pub(crate) log: Mutex<LogState>,
    /// Ids of batches handed out by `create_write_batch` and not yet committed.
    pub(crate) created_batches: Mutex<HashSet<u64>>,
    pub(crate) next_batch_id: AtomicU64,
    pub(crate) options: EngineOptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.lock();
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("seq", &log.seq)
            .field("wal_bytes", &log.wal_bytes)
            .field("live_bytes", &log.live_bytes)
            .field("entries", &self.table.read().len())
            .field("options", &self.options)
            .finish()
    }
}

impl Engine {
    /// Opens the piece at `dir`, creating the directory if needed.
    ///
    /// # Recovery Steps
    ///
    /// 1. Create the directory if it does not exist.
    /// 2. Remove a leftover `SNAPSHOT.tmp` from an interrupted checkpoint.
    /// 3. Load `SNAPSHOT` (if any) into a fresh table.
    /// 4. Replay `wal.log` on top of it.
    /// 5. Open the WAL writer in append mode.
    pub fn open<P: AsRef<Path>>(dir: P, options: &EngineOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create piece directory {}", dir.display()))?;

        snapshot::cleanup_tmp(&dir);

        // replay must happen before the writer is opened
        let mut table = Table::new();
        let snap_seq = snapshot::load(&dir, &mut table)?;
        let wal_path = dir.join(WAL_FILENAME);
        let wal_seq = replay_into(&wal_path, &mut table)?;

        let wal_bytes = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
        let writer = WalWriter::create(&wal_path, options.wal_sync)
            .with_context(|| format!("failed to open WAL at {}", wal_path.display()))?;

        let seq = snap_seq.max(wal_seq);
        let live_bytes = table
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum();
        tracing::debug!(dir = %dir.display(), seq, entries = table.len(), "opened piece");

        Ok(Self {
            dir,
            table: RwLock::new(table),
            log: Mutex::new(LogState {
                writer,
                seq,
                wal_bytes,
                live_bytes,
            }),
            created_batches: Mutex::new(HashSet::new()),
            next_batch_id: AtomicU64::new(1),
            options: options.clone(),
        })
    }

    /// Directory this piece lives in.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Sequence number of the last applied record.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.log.lock().seq
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Key + value bytes held by this piece.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.log.lock().live_bytes
    }

    /// Bytes in the WAL since the last checkpoint.
    #[must_use]
    pub fn wal_bytes(&self) -> u64 {
        self.log.lock().wal_bytes
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

/// Best-effort sync on drop.
///
/// With `wal_sync == false` appends are only flushed to the OS; syncing here
/// narrows the window in which a clean shutdown could still lose them. Errors
/// are ignored because Drop cannot propagate them.
impl Drop for Engine {
    fn drop(&mut self) {
        if !self.options.wal_sync {
            let _ = self.log.get_mut().writer.sync_to_disk();
        }
    }
}

#[cfg(test)]
mod tests;
