/// The contract every rotating-store component consumes.
///
/// A `Database` is an ordered key-value store with point lookups, ordered
/// scans with early exit, direct mutation, and atomic write batches. [`Engine`]
/// is the on-disk implementation; the rotating stores implement it again as
/// views that fan out over many pieces.
///
/// [`Engine`]: crate::Engine
use anyhow::Result;

use crate::{Engine, WriteBatch};

/// Scan callback: receives `(key, value)` and returns `false` to stop.
pub type Visitor<'a> = dyn FnMut(&[u8], &[u8]) -> bool + 'a;

pub trait Database: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent.
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn exists(&self, key: &[u8]) -> Result<bool>;

    /// Direct, unbatched insert.
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Direct, unbatched delete. Deleting a missing key is not an error.
    fn kill(&self, key: &[u8]) -> Result<()>;

    /// Creates an empty batch and remembers it as outstanding.
    fn create_write_batch(&self) -> WriteBatch;

    /// Atomically applies and disposes of `batch`.
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Forgets every outstanding batch. Returns `true` if there were any.
    fn discard_created_batches(&self) -> bool;

    /// Full ordered scan.
    fn for_each(&self, f: &mut Visitor<'_>) -> Result<()>;

    /// Ordered scan over keys starting with `prefix`.
    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()>;
}

impl Database for Engine {
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Engine::lookup(self, key)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Engine::exists(self, key)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::insert(self, key, value)
    }

    fn kill(&self, key: &[u8]) -> Result<()> {
        Engine::kill(self, key)
    }

    fn create_write_batch(&self) -> WriteBatch {
        Engine::create_write_batch(self)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        Engine::commit(self, batch)
    }

    fn discard_created_batches(&self) -> bool {
        Engine::discard_created_batches(self)
    }

    fn for_each(&self, f: &mut Visitor<'_>) -> Result<()> {
        Engine::for_each(self, f)
    }

    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        Engine::for_each_with_prefix(self, prefix, f)
    }
}
