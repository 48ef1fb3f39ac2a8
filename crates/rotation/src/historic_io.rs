//! # Historic Rotating Store
//!
//! Never evicts. Each rotation opens a new piece at `<base>/<timestamp>`,
//! where the timestamp is supplied by the caller (a block number, say) and
//! must increase. Any past state is answered by the newest piece whose
//! timestamp is at or below the query.
//!
//! The current piece is always open. Older pieces are opened on demand and
//! kept in a [`PieceCache`], which is pruned when the cleanup interval has
//! passed or the cache reaches `max_opened_pieces`.

use config::HistoricConfig;
use engine::Engine;
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::crash::{points, Checkpoint};
use crate::piece_cache::PieceCache;
use crate::{Error, Result};

struct HistoricState {
    /// Strictly increasing, never empty.
    timestamps: Vec<u64>,
    current: Arc<Engine>,
    cache: PieceCache<Engine>,
    last_cleanup: Instant,
}

pub struct HistoricDbIo {
    base_path: PathBuf,
    config: HistoricConfig,
    crash: Arc<dyn Checkpoint>,
    state: Mutex<HistoricState>,
}

impl HistoricDbIo {
    /// Indexes every `<base>/<timestamp>` directory and opens the newest one.
    /// A store with no pieces starts at timestamp 0.
    pub fn open<P: AsRef<Path>>(
        base: P,
        config: &HistoricConfig,
        crash: Arc<dyn Checkpoint>,
    ) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        let base_path = base.as_ref().to_path_buf();

        let mut timestamps = scan_timestamps(&base_path)?;
        if timestamps.is_empty() {
            timestamps.push(0);
        }
        timestamps.sort_unstable();
        timestamps.dedup();

        let latest = timestamps[timestamps.len() - 1];
        let current = Engine::open(base_path.join(latest.to_string()), &config.engine)?;

        tracing::info!(
            base = %base_path.display(),
            pieces = timestamps.len(),
            latest,
            "opened historic store"
        );

        let io = Self {
            base_path,
            config: config.clone(),
            crash,
            state: Mutex::new(HistoricState {
                timestamps,
                current: Arc::new(current),
                cache: PieceCache::new(),
                last_cleanup: Instant::now(),
            }),
        };
        io.crash.checkpoint(points::AFTER_RECOVER)?;
        Ok(io)
    }

    /// Starts a new piece at `timestamp`, which must be greater than every
    /// existing one.
    ///
    /// The configured carry-over keys are copied into the new piece and then
    /// removed from the old one.
    pub fn rotate(&self, timestamp: u64) -> Result<()> {
        let mut state = self.state.lock();
        let latest = state.timestamps[state.timestamps.len() - 1];
        if timestamp <= latest {
            return Err(Error::NonIncreasingTimestamp {
                requested: timestamp,
                latest,
            });
        }

        let fresh = Engine::open(self.piece_path(timestamp), &self.config.engine)?;
        for key in &self.config.carry_over_keys {
            if let Some(value) = state.current.lookup(key)? {
                fresh.insert(key, &value)?;
                state.current.kill(key)?;
            }
        }

        state.timestamps.push(timestamp);
        let previous = std::mem::replace(&mut state.current, Arc::new(fresh));
        state.cache.insert(latest, previous);
        self.cleanup_locked(&mut state);

        tracing::info!(base = %self.base_path.display(), previous = latest, timestamp, "rotated");
        self.crash.checkpoint(points::AFTER_OPEN_LEVELDB)
    }

    pub fn current(&self) -> Arc<Engine> {
        Arc::clone(&self.state.lock().current)
    }

    /// The piece holding state as of `timestamp`: the newest piece whose
    /// timestamp is `<= timestamp`.
    pub fn piece_by_timestamp(&self, timestamp: u64) -> Result<Arc<Engine>> {
        let mut state = self.state.lock();
        self.cleanup_locked(&mut state);

        let latest = state.timestamps[state.timestamps.len() - 1];
        if timestamp >= latest {
            return Ok(Arc::clone(&state.current));
        }
        let earliest = state.timestamps[0];
        if timestamp < earliest {
            return Err(Error::InvalidTimestamp {
                requested: timestamp,
                earliest,
            });
        }

        let idx = state.timestamps.partition_point(|&t| t <= timestamp);
        let piece_ts = state.timestamps[idx - 1];
        let path = self.piece_path(piece_ts);
        let options = &self.config.engine;
        let piece = state
            .cache
            .get_or_open(piece_ts, || Engine::open(&path, options))?;
        Ok(piece)
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.state.lock().timestamps.clone()
    }

    pub fn latest_timestamp(&self) -> u64 {
        let state = self.state.lock();
        state.timestamps[state.timestamps.len() - 1]
    }

    /// All piece timestamps, newest first. The argument is not used to
    /// narrow the range.
    pub fn range_for_timestamp(&self, _timestamp: u64) -> Vec<u64> {
        let state = self.state.lock();
        state.timestamps.iter().rev().copied().collect()
    }

    /// Prunes unreferenced cached handles if the cleanup interval has passed
    /// or the cache is full. Returns how many were closed.
    pub fn check_opened_and_close_if_needed(&self) -> usize {
        let mut state = self.state.lock();
        self.cleanup_locked(&mut state)
    }

    /// Cached (non-current) handles currently open.
    pub fn opened_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    pub fn is_carry_over(&self, key: &[u8]) -> bool {
        self.config.carry_over_keys.iter().any(|k| k == key)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn piece_path(&self, timestamp: u64) -> PathBuf {
        self.base_path.join(timestamp.to_string())
    }

    fn cleanup_locked(&self, state: &mut HistoricState) -> usize {
        if state.last_cleanup.elapsed() < self.config.cleanup_interval
            && state.cache.len() < self.config.max_opened_pieces
        {
            return 0;
        }
        let closed = state.cache.prune_unreferenced();
        state.last_cleanup = Instant::now();
        tracing::debug!(closed, open = state.cache.len(), "pruned historic piece handles");
        closed
    }
}

impl std::fmt::Debug for HistoricDbIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HistoricDbIo")
            .field("base_path", &self.base_path)
            .field("timestamps", &state.timestamps.len())
            .field("opened", &state.cache.len())
            .finish()
    }
}

fn scan_timestamps(base: &Path) -> Result<Vec<u64>> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(base, e)),
    };

    let mut timestamps = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(base, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if !file_type.is_dir() {
            tracing::warn!(path = %path.display(), "skipping non-directory in historic store");
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let timestamp = name
            .parse::<u64>()
            .map_err(|_| Error::InvalidPieceName { name })?;
        timestamps.push(timestamp);
    }
    Ok(timestamps)
}
