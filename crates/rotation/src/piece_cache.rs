use std::collections::BTreeMap;
use std::sync::Arc;

/// Open piece handles keyed by timestamp.
///
/// The cache keeps one strong reference per entry. An entry whose handle
/// nobody else holds is prunable; a handle still held by a caller is never
/// closed behind its back.
#[derive(Debug)]
pub struct PieceCache<T> {
    entries: BTreeMap<u64, Arc<T>>,
}

impl<T> Default for PieceCache<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> PieceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, timestamp: u64) -> Option<Arc<T>> {
        self.entries.get(&timestamp).cloned()
    }

    pub fn insert(&mut self, timestamp: u64, piece: Arc<T>) {
        self.entries.insert(timestamp, piece);
    }

    /// Returns the cached handle for `timestamp`, opening it with `open` on a
    /// miss.
    pub fn get_or_open<E>(
        &mut self,
        timestamp: u64,
        open: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(piece) = self.entries.get(&timestamp) {
            return Ok(Arc::clone(piece));
        }
        let piece = Arc::new(open()?);
        self.entries.insert(timestamp, Arc::clone(&piece));
        Ok(piece)
    }

    /// Drops every entry the cache alone references. Returns how many.
    pub fn prune_unreferenced(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, piece| Arc::strong_count(piece) > 1);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
