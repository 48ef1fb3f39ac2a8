//! The historic store seen as a single [`Database`], with point-in-time
//! reads.

use config::HistoricConfig;
use engine::{Database, Engine, Visitor, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::crash::Checkpoint;
use crate::historic_io::HistoricDbIo;
use crate::{Error, Result};

pub struct RotatingHistoricDb {
    io: HistoricDbIo,
    /// Held exclusively by `rotate`, shared recursively by everything else.
    gate: RwLock<()>,
    batch_cache: Mutex<HashSet<u64>>,
}

impl RotatingHistoricDb {
    pub fn open<P: AsRef<Path>>(
        base: P,
        config: &HistoricConfig,
        crash: Arc<dyn Checkpoint>,
    ) -> Result<Self> {
        Ok(Self::from_io(HistoricDbIo::open(base, config, crash)?))
    }

    pub fn from_io(io: HistoricDbIo) -> Self {
        Self {
            io,
            gate: RwLock::new(()),
            batch_cache: Mutex::new(HashSet::new()),
        }
    }

    pub fn io(&self) -> &HistoricDbIo {
        &self.io
    }

    pub fn current(&self) -> Arc<Engine> {
        self.io.current()
    }

    /// Starts a new piece at `timestamp`. Refuses while write batches handed
    /// out by this view are still outstanding.
    pub fn rotate(&self, timestamp: u64) -> Result<()> {
        let _gate = self.gate.write();
        let outstanding = self.batch_cache.lock().len();
        if outstanding > 0 {
            return Err(Error::OutstandingBatches { outstanding });
        }
        self.io.rotate(timestamp)
    }

    /// Looks `key` up walking pieces from the newest back. Carry-over keys
    /// live only in the current piece and are read from there.
    pub fn lookup_at(&self, key: &[u8], block: u64) -> Result<Option<Vec<u8>>> {
        let _gate = self.gate.read_recursive();
        self.io.check_opened_and_close_if_needed();

        if self.io.is_carry_over(key) {
            return Ok(self.io.current().lookup(key)?);
        }
        for timestamp in self.io.range_for_timestamp(block) {
            let piece = self.io.piece_by_timestamp(timestamp)?;
            if let Some(value) = piece.lookup(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn visit_all(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        let _gate = self.gate.read_recursive();
        let mut stopped = false;
        for timestamp in self.io.timestamps() {
            let piece = self.io.piece_by_timestamp(timestamp)?;
            piece.for_each_with_prefix(prefix, &mut |k, v| {
                let more = f(k, v);
                stopped = !more;
                more
            })?;
            if stopped {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RotatingHistoricDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingHistoricDb")
            .field("io", &self.io)
            .field("outstanding_batches", &self.batch_cache.lock().len())
            .finish()
    }
}

impl Database for RotatingHistoricDb {
    fn lookup(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.lookup_at(key, u64::MAX)?)
    }

    fn exists(&self, key: &[u8]) -> anyhow::Result<bool> {
        let _gate = self.gate.read_recursive();
        for timestamp in self.io.range_for_timestamp(u64::MAX) {
            if self.io.piece_by_timestamp(timestamp)?.exists(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        let _gate = self.gate.read_recursive();
        self.io.current().insert(key, value)
    }

    /// Deletes from every piece, opening each as needed.
    fn kill(&self, key: &[u8]) -> anyhow::Result<()> {
        let _gate = self.gate.read_recursive();
        for timestamp in self.io.timestamps() {
            self.io.piece_by_timestamp(timestamp)?.kill(key)?;
        }
        Ok(())
    }

    fn create_write_batch(&self) -> WriteBatch {
        let _gate = self.gate.read_recursive();
        let batch = self.io.current().create_write_batch();
        self.batch_cache.lock().insert(batch.id());
        batch
    }

    /// Commits to the current piece, then removes the batch's killed keys
    /// from every older piece.
    fn commit(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let _gate = self.gate.read_recursive();
        self.batch_cache.lock().remove(&batch.id());
        let killed: Vec<Vec<u8>> = batch.deleted_keys().map(<[u8]>::to_vec).collect();
        self.io.current().commit(batch)?;
        if killed.is_empty() {
            return Ok(());
        }
        let latest = self.io.latest_timestamp();
        for timestamp in self.io.timestamps() {
            if timestamp != latest {
                let piece = self.io.piece_by_timestamp(timestamp)?;
                crate::drop_killed_keys(&piece, &killed)?;
            }
        }
        Ok(())
    }

    fn discard_created_batches(&self) -> bool {
        let _gate = self.gate.read_recursive();
        let mut cache = self.batch_cache.lock();
        let had_any = !cache.is_empty();
        cache.clear();
        self.io.current().discard_created_batches();
        had_any
    }

    /// Visits pieces oldest first.
    fn for_each(&self, f: &mut Visitor<'_>) -> anyhow::Result<()> {
        Ok(self.visit_all(b"", f)?)
    }

    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> anyhow::Result<()> {
        Ok(self.visit_all(prefix, f)?)
    }
}
