//! # Config - Rotating Store Settings
//!
//! Plain option structs shared by the piece engine and the rotating stores.
//! Every struct has sensible defaults, a `validate()` check, and a
//! `from_env()` constructor reading `ROTKV_*` variables:
//!
//! ```text
//! ROTKV_WAL_SYNC       fsync every WAL append               (default: "true")
//! ROTKV_CHECKPOINT_KB  WAL size that triggers a snapshot    (default: 4096, 0 = off)
//! ROTKV_MAX_PIECE_MB   live data one piece may hold         (default: 1024, 0 = no limit)
//! ROTKV_PIECES         pieces in a fixed-count ring         (default: 5)
//! ROTKV_ARCHIVE        archive evicted pieces               (default: "false")
//! ROTKV_MAX_OPENED     cached historic piece handles        (default: 32)
//! ROTKV_CLEANUP_SECS   historic handle cleanup interval     (default: 1000)
//! ```
//!
//! Missing or unparsable variables fall back to the default.

use std::str::FromStr;
use std::time::Duration;

/// Key the historic store moves forward into every new piece by default.
pub const STORAGE_USED_KEY: &[u8] = b"storageUsed";

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Settings for one on-disk piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// If `true`, every WAL append is followed by `fsync`.
    pub wal_sync: bool,
    /// WAL size in bytes after which the piece rewrites its snapshot and
    /// truncates the log. `0` disables automatic checkpoints.
    pub checkpoint_bytes: u64,
    /// Ceiling on live key + value bytes in one piece. A piece is held in
    /// memory and rewritten whole on checkpoint, so writes that would grow
    /// it past this are rejected. `0` disables the check.
    pub max_piece_bytes: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            wal_sync: true,
            checkpoint_bytes: 4 * 1024 * 1024,
            max_piece_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl EngineOptions {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            wal_sync: env_or("ROTKV_WAL_SYNC", d.wal_sync),
            checkpoint_bytes: env_or("ROTKV_CHECKPOINT_KB", d.checkpoint_bytes / 1024) * 1024,
            max_piece_bytes: env_or("ROTKV_MAX_PIECE_MB", d.max_piece_bytes >> 20)
                .saturating_mul(1024 * 1024),
        }
    }

    /// Options for throwaway stores: no fsync, tiny checkpoint threshold.
    pub fn for_tests() -> Self {
        Self {
            wal_sync: false,
            checkpoint_bytes: 16 * 1024,
            max_piece_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Settings for the fixed-count rotating store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// Number of pieces kept in the ring.
    pub pieces: usize,
    /// Rename evicted pieces into the archive instead of deleting them.
    pub archive_mode: bool,
    pub engine: EngineOptions,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            pieces: 5,
            archive_mode: false,
            engine: EngineOptions::default(),
        }
    }
}

impl RotationConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            pieces: env_or("ROTKV_PIECES", d.pieces),
            archive_mode: env_or("ROTKV_ARCHIVE", d.archive_mode),
            engine: EngineOptions::from_env(),
        }
    }

    pub fn with_pieces(mut self, pieces: usize) -> Self {
        self.pieces = pieces;
        self
    }

    pub fn with_archive_mode(mut self, archive_mode: bool) -> Self {
        self.archive_mode = archive_mode;
        self
    }

    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pieces == 0 {
            return Err("pieces must be > 0".into());
        }
        Ok(())
    }
}

/// Settings for the unbounded historic store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricConfig {
    /// Cached (non-current) handle count that forces a cleanup pass.
    pub max_opened_pieces: usize,
    /// Minimum time between two cleanup passes when under the ceiling.
    pub cleanup_interval: Duration,
    /// Keys whose value is moved from the old current piece into the new one
    /// on every rotation.
    pub carry_over_keys: Vec<Vec<u8>>,
    pub engine: EngineOptions,
}

impl Default for HistoricConfig {
    fn default() -> Self {
        Self {
            max_opened_pieces: 32,
            cleanup_interval: Duration::from_secs(1000),
            carry_over_keys: vec![STORAGE_USED_KEY.to_vec()],
            engine: EngineOptions::default(),
        }
    }
}

impl HistoricConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_opened_pieces: env_or("ROTKV_MAX_OPENED", d.max_opened_pieces),
            cleanup_interval: Duration::from_secs(env_or(
                "ROTKV_CLEANUP_SECS",
                d.cleanup_interval.as_secs(),
            )),
            carry_over_keys: d.carry_over_keys,
            engine: EngineOptions::from_env(),
        }
    }

    pub fn with_max_opened_pieces(mut self, max: usize) -> Self {
        self.max_opened_pieces = max;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_opened_pieces == 0 {
            return Err("max_opened_pieces must be > 0".into());
        }
        if self.carry_over_keys.iter().any(|k| k.is_empty()) {
            return Err("carry_over_keys must not contain an empty key".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RotationConfig::default().validate().is_ok());
        assert!(HistoricConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_pieces_rejected() {
        let cfg = RotationConfig::default().with_pieces(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_handle_ceiling_rejected() {
        let cfg = HistoricConfig::default().with_max_opened_pieces(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_carry_over_key_rejected() {
        let mut cfg = HistoricConfig::default();
        cfg.carry_over_keys.push(Vec::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_or("ROTKV_TEST_UNSET_VARIABLE", 7usize), 7);
        std::env::set_var("ROTKV_TEST_GARBAGE_VARIABLE", "not-a-number");
        assert_eq!(env_or("ROTKV_TEST_GARBAGE_VARIABLE", 3usize), 3);
        std::env::set_var("ROTKV_TEST_GOOD_VARIABLE", " 12 ");
        assert_eq!(env_or("ROTKV_TEST_GOOD_VARIABLE", 3usize), 12);
    }
}
