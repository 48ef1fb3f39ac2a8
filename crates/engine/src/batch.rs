use wal::WalOp;

/// An owned, single-use group of mutations.
///
/// Created by [`Database::create_write_batch`], filled by the caller, and
/// consumed by [`Database::commit`]. Dropping a batch without committing it
/// discards its operations.
///
/// [`Database::create_write_batch`]: crate::Database::create_write_batch
/// [`Database::commit`]: crate::Database::commit
#[derive(Debug, Default)]
pub struct WriteBatch {
    id: u64,
    ops: Vec<WalOp>,
}

impl WriteBatch {
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            ops: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    pub fn kill(&mut self, key: &[u8]) {
        self.ops.push(WalOp::Del { key: key.to_vec() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WalOp] {
        &self.ops
    }

    /// Keys removed by this batch, in the order they were killed.
    pub fn deleted_keys(&self) -> impl Iterator<Item = &[u8]> {
        self.ops.iter().filter_map(|op| match op {
            WalOp::Del { key } => Some(key.as_slice()),
            WalOp::Put { .. } => None,
        })
    }

    pub fn into_ops(self) -> Vec<WalOp> {
        self.ops
    }
}
