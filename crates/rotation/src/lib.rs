//! # Rotation - Rotating Key-Value Storage
//!
//! Builds multi-piece stores out of [`engine::Engine`] pieces, plus the
//! batching and key-space plumbing that sits in front of them.
//!
//! ## Module Responsibilities
//!
//! | Module            | Purpose                                                   |
//! |-------------------|-----------------------------------------------------------|
//! | [`crash`]         | Named checkpoints for crash-recovery tests                |
//! | [`batched`]       | `BatchedDb`: writes buffered into one atomic batch        |
//! | [`splitter`]      | `DbSplitter`: up to 256 tagged key spaces on one backend  |
//! | [`rotating_io`]   | Fixed-count ring of pieces with a marked current piece    |
//! | [`rotating_db`]   | The ring as one `Database`                                |
//! | [`historic_io`]   | Never-evicting pieces indexed by timestamp                |
//! | [`piece_cache`]   | Open handles to historic pieces                           |
//! | [`historic_db`]   | The historic store as one `Database`, point-in-time reads |
//!
//! ## Typical Stack
//!
//! ```text
//! PrefixedDb ("blocks")   PrefixedDb ("extras")
//!            \               /
//!             DbSplitter
//!                  |
//!             BatchedDb   ---- commit(tag) ----> Checkpoint
//!                  |
//!       RotatingDb / RotatingHistoricDb
//!                  |
//!        Engine pieces on disk
//! ```
//!
//! ## Crash Safety
//!
//! Every durable multi-step sequence reports its progress to a
//! [`Checkpoint`]. Tests arm a [`CrashPoints`] at one step, let the sequence
//! stop there, and reopen the store to check what recovery produces.
pub mod batched;
pub mod crash;
mod error;
pub mod historic_db;
pub mod historic_io;
pub mod piece_cache;
pub mod rotating_db;
pub mod rotating_io;
pub mod splitter;

pub use batched::{Batched, BatchedDb, DbFace, DbOperations};
pub use crash::{no_crash, Checkpoint, CrashPoints, NoCrash, CRASH_EXIT_CODE};
pub use engine::{Database, Engine, Visitor, WriteBatch};
pub use error::{Error, Result};
pub use historic_db::RotatingHistoricDb;
pub use historic_io::HistoricDbIo;
pub use piece_cache::PieceCache;
pub use rotating_db::RotatingDb;
pub use rotating_io::{RotatingDbIo, CURRENT_PIECE_MARK_KEY};
pub use splitter::{DbSplitter, PrefixedDb, MAX_INTERFACES};

/// Removes the killed keys of a committed batch from an older piece, so a
/// value written before a rotation cannot outlive the kill.
pub(crate) fn drop_killed_keys(piece: &Engine, keys: &[Vec<u8>]) -> anyhow::Result<()> {
    let mut batch = piece.create_write_batch();
    for key in keys {
        if piece.exists(key)? {
            batch.kill(key);
        }
    }
    piece.commit(batch)
}

#[cfg(test)]
mod tests;
