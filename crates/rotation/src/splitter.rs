//! Many logical key spaces over one batched backend.
//!
//! Each [`PrefixedDb`] handed out by a [`DbSplitter`] owns a one-byte tag and
//! prepends it to every key it writes. All interfaces share the backend's
//! single write batch, so committing through any of them commits all.

use engine::Visitor;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::batched::{Batched, DbFace, DbOperations};
use crate::Result;

/// Tags are one byte wide.
pub const MAX_INTERFACES: usize = 256;

pub struct DbSplitter {
    backend: Arc<dyn DbFace>,
    next_tag: Mutex<usize>,
}

impl DbSplitter {
    pub fn new(backend: Arc<dyn DbFace>) -> Self {
        Self {
            backend,
            next_tag: Mutex::new(0),
        }
    }

    /// Allocates the next unused tag.
    ///
    /// # Panics
    ///
    /// If [`MAX_INTERFACES`] interfaces have already been handed out.
    pub fn new_interface(&self) -> Arc<PrefixedDb> {
        let mut next = self.next_tag.lock();
        assert!(
            *next < MAX_INTERFACES,
            "a splitter supports at most {MAX_INTERFACES} interfaces"
        );
        let prefix = *next as u8;
        *next += 1;
        Arc::new(PrefixedDb {
            prefix,
            backend: Arc::clone(&self.backend),
        })
    }

    pub fn backend(&self) -> &Arc<dyn DbFace> {
        &self.backend
    }

    pub fn interface_count(&self) -> usize {
        *self.next_tag.lock()
    }
}

/// One logical key space of a [`DbSplitter`].
pub struct PrefixedDb {
    prefix: u8,
    backend: Arc<dyn DbFace>,
}

impl PrefixedDb {
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn tagged(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(key.len() + 1);
        out.push(self.prefix);
        out.extend_from_slice(key);
        out
    }

    /// Scans `physical_prefix` on the backend, passing only this
    /// interface's keys (tag stripped) to `f`.
    fn scan(&self, physical_prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        let prefix = self.prefix;
        self.backend
            .for_each_with_prefix(physical_prefix, &mut |key, value| match key.split_first() {
                Some((&tag, rest)) if tag == prefix => f(rest, value),
                _ => true,
            })
    }
}

impl std::fmt::Debug for PrefixedDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedDb").field("prefix", &self.prefix).finish()
    }
}

impl DbOperations for PrefixedDb {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.backend.insert(&self.tagged(key), value)
    }

    fn kill(&self, key: &[u8]) -> Result<()> {
        self.backend.kill(&self.tagged(key))
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        assert!(!key.is_empty(), "prefixed lookup needs a non-empty key");
        self.backend.lookup(&self.tagged(key))
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        self.backend.exists(&self.tagged(key))
    }

    fn for_each(&self, f: &mut Visitor<'_>) -> Result<()> {
        self.scan(&[self.prefix], f)
    }

    fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        self.scan(&self.tagged(prefix), f)
    }
}

impl Batched for PrefixedDb {
    fn commit(&self, crash_tag: &str) -> Result<()> {
        self.backend.commit(crash_tag)
    }

    fn revert(&self) {
        self.backend.revert()
    }
}
