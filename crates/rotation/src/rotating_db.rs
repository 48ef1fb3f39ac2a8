//! The fixed-count store seen as a single [`Database`].

use config::RotationConfig;
use engine::{Database, Engine, Visitor, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::crash::Checkpoint;
use crate::rotating_io::{RotatingDbIo, CURRENT_PIECE_MARK_KEY};
use crate::{Error, Result};

/// Reads see every piece (newest value wins), writes go to the current piece.
///
/// Rotation takes the lock exclusively; every other operation shares it, so
/// no caller observes the ring mid-rotation. Shared access is recursive: a
/// visitor may read the store again even while a rotation is queued.
pub struct RotatingDb {
    io: RwLock<RotatingDbIo>,
    /// Ids of batches created on the current piece and not yet committed.
    batch_cache: Mutex<HashSet<u64>>,
}

impl RotatingDb {
    pub fn open<P: AsRef<Path>>(
        base: P,
        config: &RotationConfig,
        crash: Arc<dyn Checkpoint>,
    ) -> Result<Self> {
        Ok(Self::from_io(RotatingDbIo::open(base, config, crash)?))
    }

    pub fn from_io(io: RotatingDbIo) -> Self {
        Self {
            io: RwLock::new(io),
            batch_cache: Mutex::new(HashSet::new()),
        }
    }

    /// Rotates the underlying ring. Refuses while write batches handed out
    /// by this view are still outstanding.
    pub fn rotate(&self) -> Result<()> {
        let mut io = self.io.write();
        let outstanding = self.batch_cache.lock().len();
        if outstanding > 0 {
            return Err(Error::OutstandingBatches { outstanding });
        }
        io.rotate()
    }

    pub fn current(&self) -> Arc<Engine> {
        Arc::clone(self.io.read_recursive().current())
    }

    pub fn current_piece_file_no(&self) -> usize {
        self.io.read_recursive().current_piece_file_no()
    }

    pub fn pieces_count(&self) -> usize {
        self.io.read_recursive().pieces_count()
    }

    fn visit_all(&self, prefix: &[u8], f: &mut Visitor<'_>) -> anyhow::Result<()> {
        let io = self.io.read_recursive();
        let mut stopped = false;
        for piece in io.pieces() {
            piece.for_each_with_prefix(prefix, &mut |k, v| {
                if k == CURRENT_PIECE_MARK_KEY {
                    return true;
                }
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

impl std::fmt::Debug for RotatingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingDb")
            .field("io", &*self.io.read_recursive())
            .field("outstanding_batches", &self.batch_cache.lock().len())
            .finish()
    }
}

impl Database for RotatingDb {
    fn lookup(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let io = self.io.read_recursive();
        for piece in io.pieces() {
            if let Some(value) = piece.lookup(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn exists(&self, key: &[u8]) -> anyhow::Result<bool> {
        let io = self.io.read_recursive();
        for piece in io.pieces() {
            if piece.exists(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.io.read_recursive().current().insert(key, value)
    }

    /// Deletes from every piece so an older value cannot resurface.
    fn kill(&self, key: &[u8]) -> anyhow::Result<()> {
        let io = self.io.read_recursive();
        for piece in io.pieces() {
            piece.kill(key)?;
        }
        Ok(())
    }

    fn create_write_batch(&self) -> WriteBatch {
        let io = self.io.read_recursive();
        let batch = io.current().create_write_batch();
        self.batch_cache.lock().insert(batch.id());
        batch
    }

    /// Commits to the current piece, then removes the batch's killed keys
    /// from the older pieces.
    fn commit(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let io = self.io.read_recursive();
        self.batch_cache.lock().remove(&batch.id());
        let killed: Vec<Vec<u8>> = batch.deleted_keys().map(<[u8]>::to_vec).collect();
        io.current().commit(batch)?;
        if killed.is_empty() {
            return Ok(());
        }
        for piece in io.pieces().skip(1) {
            crate::drop_killed_keys(piece, &killed)?;
        }
        Ok(())
    }

    fn discard_created_batches(&self) -> bool {
        let io = self.io.read_recursive();
        let mut cache = self.batch_cache.lock();
        let had_any = !cache.is_empty();
        cache.clear();
        io.current().discard_created_batches();
        had_any
    }

    /// Visits every piece newest first; a key rewritten after a rotation is
    /// seen once per piece holding it.
    fn for_each(&self, f: &mut Visitor<'_>) -> anyhow::Result<()> {
        self.visit_all(b"", f)
    }

    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> anyhow::Result<()> {
        self.visit_all(prefix, f)
    }
}
