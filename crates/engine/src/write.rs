/// Write path: `insert()`, `kill()`, `commit()`, and checkpoints.
///
/// All mutations flow through [`Engine::apply`]. The record is appended to
/// the WAL first, then every operation in it is applied to the table under a
/// single write lock. When the WAL grows past the configured threshold the
/// table is checkpointed into a fresh snapshot and the WAL is truncated.
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::sync::atomic::Ordering;
use wal::{WalOp, WalRecord, WalWriter};

use crate::{
    snapshot, Engine, LogState, Table, WriteBatch, MAX_KEY_SIZE, MAX_VALUE_SIZE, WAL_FILENAME,
};

fn validate(op: &WalOp) -> Result<()> {
    let key = op.key();
    anyhow::ensure!(!key.is_empty(), "key must not be empty");
    anyhow::ensure!(
        key.len() <= MAX_KEY_SIZE,
        "key too large: {} bytes (max {})",
        key.len(),
        MAX_KEY_SIZE
    );
    if let WalOp::Put { value, .. } = op {
        anyhow::ensure!(
            value.len() <= MAX_VALUE_SIZE,
            "value too large: {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        );
    }
    Ok(())
}

fn entry_size(key: &[u8], value_len: Option<usize>) -> i64 {
    value_len.map_or(0, |len| (key.len() + len) as i64)
}

/// Change in live bytes if `ops` were applied to `table`, in order.
fn live_delta(table: &Table, ops: &[WalOp]) -> i64 {
    let mut overlay: HashMap<&[u8], Option<usize>> = HashMap::new();
    let mut delta = 0;
    for op in ops {
        let key = op.key();
        let before = match overlay.get(key) {
            Some(len) => *len,
            None => table.get(key).map(Vec::len),
        };
        let after = match op {
            WalOp::Put { value, .. } => Some(value.len()),
            WalOp::Del { .. } => None,
        };
        delta += entry_size(key, after) - entry_size(key, before);
        overlay.insert(key, after);
    }
    delta
}

impl Engine {
    /// Inserts a single key-value pair as its own record.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(vec![WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Deletes a single key as its own record.
    pub fn kill(&self, key: &[u8]) -> Result<()> {
        self.apply(vec![WalOp::Del { key: key.to_vec() }])
    }

    /// Hands out an empty batch and tracks it as outstanding.
    pub fn create_write_batch(&self) -> WriteBatch {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.created_batches.lock().insert(id);
        WriteBatch::with_id(id)
    }

    /// Applies `batch` atomically. An empty batch writes nothing.
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.created_batches.lock().remove(&batch.id());
        if batch.is_empty() {
            return Ok(());
        }
        self.apply(batch.into_ops())
    }

    /// Forgets all outstanding batches, returning whether there were any.
    pub fn discard_created_batches(&self) -> bool {
        let mut created = self.created_batches.lock();
        let had_any = !created.is_empty();
        created.clear();
        had_any
    }

    /// Forces a checkpoint: snapshot the table, then truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let mut log = self.log.lock();
        self.checkpoint_locked(&mut log)
    }

    /// Appends one record for `ops` and applies it.
    ///
    /// # Steps
    ///
    /// 1. Validate every operation (nothing is written if one is invalid).
    /// 2. Reject the record if it would grow the piece past `max_piece_bytes`.
    /// 3. Assign the next sequence number.
    /// 4. Append the record to the WAL.
    /// 5. Apply all operations to the table under one write lock.
    /// 6. Checkpoint if the WAL has reached the threshold. The record is
    ///    durable by now, so a failed checkpoint is logged and retried on a
    ///    later write instead of failing this one.
    pub(crate) fn apply(&self, ops: Vec<WalOp>) -> Result<()> {
        for op in &ops {
            validate(op)?;
        }

        let mut log = self.log.lock();

        // writers hold the log lock, so the table cannot change under us
        let delta = live_delta(&self.table.read(), &ops);
        let limit = self.options.max_piece_bytes;
        if limit > 0 && delta > 0 && log.live_bytes.saturating_add(delta as u64) > limit {
            anyhow::bail!(
                "piece {} is full: {} live bytes + {} would exceed {}",
                self.dir.display(),
                log.live_bytes,
                delta,
                limit
            );
        }

        log.seq = log
            .seq
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("sequence number overflow (u64::MAX reached)"))?;

        let record = WalRecord { seq: log.seq, ops };
        let written = log
            .writer
            .append(&record)
            .with_context(|| format!("failed to append to WAL in {}", self.dir.display()))?;
        log.wal_bytes += written as u64;
        log.live_bytes = log.live_bytes.saturating_add_signed(delta);

        {
            let mut table = self.table.write();
            for op in record.ops {
                match op {
                    WalOp::Put { key, value } => {
                        table.insert(key, value);
                    }
                    WalOp::Del { key } => {
                        table.remove(&key);
                    }
                }
            }
        }

        let threshold = self.options.checkpoint_bytes;
        if threshold > 0 && log.wal_bytes >= threshold {
            if let Err(e) = self.checkpoint_locked(&mut log) {
                tracing::warn!(
                    dir = %self.dir.display(),
                    wal_bytes = log.wal_bytes,
                    error = %e,
                    "checkpoint failed, will retry on a later write"
                );
            }
        }

        Ok(())
    }

    fn checkpoint_locked(&self, log: &mut LogState) -> Result<()> {
        {
            let table = self.table.read();
            snapshot::write(&self.dir, log.seq, &table)?;
        }

        // The snapshot now covers everything in the WAL; safe to truncate.
        let wal_path = self.dir.join(WAL_FILENAME);
        let _f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&wal_path)?;
        log.writer = WalWriter::create(&wal_path, self.options.wal_sync)?;
        log.wal_bytes = 0;

        tracing::debug!(dir = %self.dir.display(), seq = log.seq, "piece checkpointed");
        Ok(())
    }
}
