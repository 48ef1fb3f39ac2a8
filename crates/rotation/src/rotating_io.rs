//! # Fixed-Count Rotating Store
//!
//! `N` pieces at `<base>/0.db .. <base>/<N-1>.db` form a ring. The piece
//! holding [`CURRENT_PIECE_MARK_KEY`] is the write target. Rotation evicts
//! the oldest piece, recreates its slot empty, and moves the marker there,
//! so piece file numbers count *down* as the store ages.
//!
//! ## Rotation Steps
//!
//! ```text
//! 1. oldest = (current - 1) mod N
//! 2. drop the oldest piece from the ring
//! 3. archive: rename to archive-<k>.db    [after_rename_oldest]
//!    delete:  remove the directory        [after_remove_oldest]
//! 4. open an empty piece at the slot      [after_open_leveldb]
//! 5. mark it                              [with_two_keys]
//! 6. unmark the previous current
//! ```
//!
//! ## Recovery
//!
//! A crash between steps 5 and 6 leaves two adjacent marked pieces. Opening
//! the store removes the marker from the older one, keeping the newer
//! (lower-numbered, wrapping) piece current.
//!
//! A crash after step 3 and before step 4 completes leaves the slot missing
//! or empty. Reopening simply recreates it empty; the marker is still on the
//! previous current piece, which stays current. There is no rollback of the
//! eviction itself.

use config::{EngineOptions, RotationConfig};
use engine::Engine;
use std::collections::VecDeque;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::crash::{points, Checkpoint};
use crate::{Error, Result};

/// Sentinel key marking the current piece. Stored with an empty value.
pub const CURRENT_PIECE_MARK_KEY: &[u8] =
    b"ead48ec575aaa7127384dee432fc1c02d9f6a22950234e5ecf59f35ed9f6e78d";

/// Number of archived pieces, as a decimal string.
pub const ARCHIVE_COUNT_FILENAME: &str = "ARCHIVE_COUNT";

const ARCHIVE_COUNT_TMP_FILENAME: &str = "ARCHIVE_COUNT.tmp";

pub fn piece_file_name(file_no: usize) -> String {
    format!("{file_no}.db")
}

pub fn archive_file_name(k: u64) -> String {
    format!("archive-{k}.db")
}

pub struct RotatingDbIo {
    base_path: PathBuf,
    /// Ring pieces, current first, oldest last.
    pieces: VecDeque<Arc<Engine>>,
    /// Archived pieces, newest first.
    archive: Vec<Arc<Engine>>,
    current_piece_file_no: usize,
    archive_mode: bool,
    archived_count: u64,
    options: EngineOptions,
    crash: Arc<dyn Checkpoint>,
}

impl RotatingDbIo {
    /// Opens (or creates) the store at `base`, repairing a rotation that was
    /// interrupted between marking the new piece and unmarking the old one.
    pub fn open<P: AsRef<Path>>(
        base: P,
        config: &RotationConfig,
        crash: Arc<dyn Checkpoint>,
    ) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        let base_path = base.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| Error::io(&base_path, e))?;

        let n = config.pieces;
        let mut by_file_no = Vec::with_capacity(n);
        for file_no in 0..n {
            let piece = Engine::open(base_path.join(piece_file_name(file_no)), &config.engine)?;
            by_file_no.push(Arc::new(piece));
        }

        recover(&by_file_no, crash.as_ref())?;

        let mut current = None;
        for (file_no, piece) in by_file_no.iter().enumerate() {
            if piece.exists(CURRENT_PIECE_MARK_KEY)? {
                current = Some(file_no);
                break;
            }
        }
        let current_piece_file_no = current.unwrap_or_else(|| {
            tracing::info!(base = %base_path.display(), "no marked piece, piece 0 is current");
            0
        });

        let mut pieces: VecDeque<_> = by_file_no.into();
        pieces.rotate_left(current_piece_file_no);

        let mut archive = Vec::new();
        let mut archived_count = 0;
        if config.archive_mode {
            archived_count = read_archive_count(&base_path)?;
            for k in (0..archived_count).rev() {
                let piece = Engine::open(base_path.join(archive_file_name(k)), &config.engine)?;
                archive.push(Arc::new(piece));
            }
        }

        tracing::info!(
            base = %base_path.display(),
            pieces = n,
            current = current_piece_file_no,
            archived = archived_count,
            "opened rotating store"
        );

        Ok(Self {
            base_path,
            pieces,
            archive,
            current_piece_file_no,
            archive_mode: config.archive_mode,
            archived_count,
            options: config.engine.clone(),
            crash,
        })
    }

    /// Evicts the oldest piece and makes a fresh one current.
    ///
    /// Runs to completion or stops at the first error; there is no rollback.
    /// After an error the instance must be dropped and the store reopened;
    /// [`open`](Self::open) handles whatever state was left on disk.
    pub fn rotate(&mut self) -> Result<()> {
        let n = self.pieces.len();
        let oldest_no = (self.current_piece_file_no + n - 1) % n;
        let oldest_path = self.base_path.join(piece_file_name(oldest_no));

        // closes the handle unless a caller still holds it
        drop(self.pieces.pop_back());

        if self.archive_mode {
            let k = self.archived_count;
            let archive_path = self.base_path.join(archive_file_name(k));
            // count first: a crash before the rename leaves an empty archive slot
            write_archive_count(&self.base_path, k + 1)?;
            self.archived_count = k + 1;
            fs::rename(&oldest_path, &archive_path).map_err(|e| Error::io(&oldest_path, e))?;
            self.crash.checkpoint(points::AFTER_RENAME_OLDEST)?;

            let archived = Engine::open(&archive_path, &self.options)?;
            self.archive.insert(0, Arc::new(archived));
            tracing::info!(from = oldest_no, slot = k, "archived oldest piece");
        } else {
            match fs::remove_dir_all(&oldest_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&oldest_path, e)),
            }
            self.crash.checkpoint(points::AFTER_REMOVE_OLDEST)?;
            tracing::info!(file_no = oldest_no, "removed oldest piece");
        }

        let fresh = Engine::open(&oldest_path, &self.options)?;
        self.crash.checkpoint(points::AFTER_OPEN_LEVELDB)?;
        self.pieces.push_front(Arc::new(fresh));
        let previous_no = self.current_piece_file_no;
        self.current_piece_file_no = oldest_no;

        self.pieces[0].insert(CURRENT_PIECE_MARK_KEY, b"")?;
        self.crash.checkpoint(points::WITH_TWO_KEYS)?;
        if let Some(previous) = self.pieces.get(1) {
            previous.kill(CURRENT_PIECE_MARK_KEY)?;
        }

        tracing::info!(
            base = %self.base_path.display(),
            previous = previous_no,
            current = oldest_no,
            "rotated"
        );
        Ok(())
    }

    /// Every readable piece, newest to oldest: the ring from current
    /// onwards, then the archive.
    pub fn pieces(&self) -> impl Iterator<Item = &Arc<Engine>> + '_ {
        self.pieces.iter().chain(self.archive.iter())
    }

    pub fn current(&self) -> &Arc<Engine> {
        &self.pieces[0]
    }

    /// Ring size; the archive tail is not counted.
    pub fn pieces_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn current_piece_file_no(&self) -> usize {
        self.current_piece_file_no
    }

    pub fn archived_count(&self) -> u64 {
        self.archived_count
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl std::fmt::Debug for RotatingDbIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingDbIo")
            .field("base_path", &self.base_path)
            .field("pieces", &self.pieces.len())
            .field("current_piece_file_no", &self.current_piece_file_no)
            .field("archive_mode", &self.archive_mode)
            .field("archived_count", &self.archived_count)
            .finish()
    }
}

/// Removes the marker from any piece whose predecessor (wrapping) is also
/// marked. `pieces` is indexed by file number.
fn recover(pieces: &[Arc<Engine>], crash: &dyn Checkpoint) -> Result<()> {
    let n = pieces.len();
    for i in 0..n {
        let prev = (i + n - 1) % n;
        if prev == i {
            continue;
        }
        if pieces[i].exists(CURRENT_PIECE_MARK_KEY)? && pieces[prev].exists(CURRENT_PIECE_MARK_KEY)? {
            tracing::warn!(
                unmarked = i,
                current = prev,
                "two marked pieces, finishing interrupted rotation"
            );
            pieces[i].kill(CURRENT_PIECE_MARK_KEY)?;
            crash.checkpoint(points::AFTER_PIECES_KILL)?;
        }
    }
    Ok(())
}

fn read_archive_count(base: &Path) -> Result<u64> {
    let path = base.join(ARCHIVE_COUNT_FILENAME);
    match fs::read_to_string(&path) {
        Ok(s) => s.trim().parse().map_err(|e| {
            Error::Engine(anyhow::anyhow!("corrupt {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replaces `ARCHIVE_COUNT` atomically (tmp + fsync + rename).
fn write_archive_count(base: &Path, count: u64) -> Result<()> {
    let tmp = base.join(ARCHIVE_COUNT_TMP_FILENAME);
    let path = base.join(ARCHIVE_COUNT_FILENAME);
    {
        let mut f = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        f.write_all(count.to_string().as_bytes())
            .and_then(|()| f.sync_all())
            .map_err(|e| Error::io(&tmp, e))?;
    }
    fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))
}
