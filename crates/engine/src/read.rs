/// Read path: point lookups and ordered scans.
///
/// Scans copy the table in bounded chunks and release the read lock before
/// calling the visitor, so a visitor may freely read from (or write to) the
/// same piece without deadlocking.
use anyhow::Result;
use std::ops::Bound;

use crate::{Engine, Visitor};

/// Entries copied per lock acquisition during a scan.
const SCAN_CHUNK: usize = 1024;

impl Engine {
    /// Returns the value stored under `key`, if any.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table.read().get(key).cloned())
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.table.read().contains_key(key))
    }

    /// Visits every pair in ascending key order until `f` returns `false`.
    pub fn for_each(&self, f: &mut Visitor<'_>) -> Result<()> {
        self.for_each_with_prefix(b"", f)
    }

    /// Visits pairs whose key starts with `prefix`, in ascending order.
    pub fn for_each_with_prefix(&self, prefix: &[u8], f: &mut Visitor<'_>) -> Result<()> {
        let mut lower: Bound<Vec<u8>> = Bound::Included(prefix.to_vec());

        loop {
            let chunk: Vec<(Vec<u8>, Vec<u8>)> = {
                let table = self.table.read();
                table
                    .range::<Vec<u8>, _>((lower, Bound::Unbounded))
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .take(SCAN_CHUNK)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            };

            let exhausted = chunk.len() < SCAN_CHUNK;
            for (k, v) in &chunk {
                if !f(k.as_slice(), v.as_slice()) {
                    return Ok(());
                }
            }

            match chunk.into_iter().last() {
                Some((last, _)) if !exhausted => lower = Bound::Excluded(last),
                _ => return Ok(()),
            }
        }
    }
}
