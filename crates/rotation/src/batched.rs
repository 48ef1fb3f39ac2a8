//! Atomic units of work over a [`Database`].
//!
//! [`BatchedDb`] buffers inserts and deletes into one engine write batch and
//! applies it on `commit`. Scans take the same lock as writers, so a scan
//! never interleaves with batch mutation.

use engine::{Database, Visitor, WriteBatch};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::crash::{no_crash, Checkpoint};
use crate::Result;

/// Something that accumulates writes and resolves them as one unit.
pub trait Batched: Send + Sync {
    /// Applies everything buffered so far. `crash_tag` names the checkpoint
    /// hit right before the engine commit; pass `""` for none.
    fn commit(&self, crash_tag: &str) -> Result<()>;

    /// Drops everything buffered so far.
    fn revert(&self);
}

/// Key-value operations shared by the batched wrapper and splitter views.
pub trait DbOperations: Send + Sync {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn kill(&self, key: &[u8]) -> Result<()>;
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn exists(&self, key: &[u8]) -> Result<bool>;
    fn for_each(&self, f: &mut Visitor<'_>) -> Result<()>;
    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()>;
}

/// A batched database: the backend a [`DbSplitter`](crate::DbSplitter) fans
/// out over.
pub trait DbFace: Batched + DbOperations {}

impl<T: Batched + DbOperations> DbFace for T {}

/// Buffers writes into a single engine batch until `commit` or `revert`.
///
/// Dropping a `BatchedDb` with a pending batch is a bug in the owner and
/// panics in debug builds.
pub struct BatchedDb {
    db: Arc<dyn Database>,
    batch: Mutex<Option<WriteBatch>>,
    crash: Arc<dyn Checkpoint>,
}

impl BatchedDb {
    pub fn new(db: Arc<dyn Database>, crash: Arc<dyn Checkpoint>) -> Self {
        Self {
            db,
            batch: Mutex::new(None),
            crash,
        }
    }

    /// Wraps `db` with no crash checkpoints.
    pub fn unchecked(db: Arc<dyn Database>) -> Self {
        Self::new(db, no_crash())
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Whether writes are buffered and not yet resolved.
    #[must_use]
    pub fn has_pending_batch(&self) -> bool {
        self.batch.lock().is_some()
    }

    fn with_batch(&self, f: impl FnOnce(&mut WriteBatch)) {
        let mut guard = self.batch.lock();
        let batch = guard.get_or_insert_with(|| self.db.create_write_batch());
        f(batch);
    }
}

impl std::fmt::Debug for BatchedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedDb")
            .field("pending_ops", &self.batch.lock().as_ref().map(WriteBatch::len))
            .finish()
    }
}

impl Batched for BatchedDb {
    fn commit(&self, crash_tag: &str) -> Result<()> {
        let mut guard = self.batch.lock();
        let batch = guard
            .take()
            .unwrap_or_else(|| self.db.create_write_batch());
        // a crash here loses the whole batch
        self.crash.checkpoint(crash_tag)?;
        self.db.commit(batch)?;
        Ok(())
    }

    fn revert(&self) {
        let mut guard = self.batch.lock();
        *guard = None;
        self.db.discard_created_batches();
    }
}

impl DbOperations for BatchedDb {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_batch(|b| b.insert(key, value));
        Ok(())
    }

    fn kill(&self, key: &[u8]) -> Result<()> {
        self.with_batch(|b| b.kill(key));
        Ok(())
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.lookup(key)?)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.db.exists(key)?)
    }

    /// Holds the batch lock for the whole scan; the visitor must not write
    /// through this wrapper.
    fn for_each(&self, f: &mut Visitor<'_>) -> Result<()> {
        let _guard = self.batch.lock();
        Ok(self.db.for_each(f)?)
    }

    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        let _guard = self.batch.lock();
        Ok(self.db.for_each_with_prefix(prefix, f)?)
    }
}

impl Drop for BatchedDb {
    fn drop(&mut self) {
        let pending = self.batch.get_mut().is_some();
        if pending && !std::thread::panicking() {
            tracing::error!("batched db dropped with an unresolved batch");
            debug_assert!(
                !pending,
                "BatchedDb dropped with an unresolved batch; commit() or revert() it first"
            );
        }
    }
}
