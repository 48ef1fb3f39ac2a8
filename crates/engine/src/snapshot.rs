/// # Snapshot - Checkpointed Piece Contents
///
/// A snapshot is a WAL-format file: a `Put` for every live pair, split into
/// frames of at most [`SNAPSHOT_FRAME_BYTES`] of payload, every frame tagged
/// with the sequence number the snapshot covers. An empty table is written
/// as one empty frame so the sequence number survives. Reusing the WAL
/// framing gives it the same CRC protection and replay code.
///
/// ## Crash Safety
///
/// The snapshot is rewritten atomically: write to `SNAPSHOT.tmp`, fsync, then
/// rename over `SNAPSHOT`. A leftover tmp file means the rename never
/// happened, so it is simply deleted on the next open.
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use wal::{WalOp, WalRecord, WalWriter};

use crate::{replay_into, Table};

/// Name of the snapshot file within a piece directory.
pub const SNAPSHOT_FILENAME: &str = "SNAPSHOT";

/// Temporary file used during atomic snapshot writes.
const SNAPSHOT_TMP_FILENAME: &str = "SNAPSHOT.tmp";

/// Payload bytes after which a snapshot frame is closed.
pub(crate) const SNAPSHOT_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Key, value, and per-op header bytes of one `Put` in a frame.
fn put_size(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + 9
}

/// Loads the snapshot in `dir` (if any) into `table`, returning its sequence
/// number.
pub(crate) fn load(dir: &Path, table: &mut Table) -> Result<u64> {
    replay_into(dir.join(SNAPSHOT_FILENAME), table)
}

/// Persists `table` as the new snapshot of `dir`.
pub(crate) fn write(dir: &Path, seq: u64, table: &Table) -> Result<()> {
    write_framed(dir, seq, table, SNAPSHOT_FRAME_BYTES).map(|_| ())
}

/// Like [`write`], closing a frame once it holds `frame_bytes` of payload.
/// A single pair larger than that still gets a frame of its own. Returns
/// the number of frames written.
pub(crate) fn write_framed(
    dir: &Path,
    seq: u64,
    table: &Table,
    frame_bytes: usize,
) -> Result<usize> {
    let tmp_path = dir.join(SNAPSHOT_TMP_FILENAME);
    let path = dir.join(SNAPSHOT_FILENAME);

    // WalWriter appends, so a stale tmp must not survive into the new file.
    if tmp_path.exists() {
        fs::remove_file(&tmp_path)?;
    }

    let mut frames = 0;
    {
        let mut w = WalWriter::create(&tmp_path, false)
            .with_context(|| format!("failed to create snapshot tmp at {}", tmp_path.display()))?;
        let mut ops = Vec::new();
        let mut pending = 0;
        for (k, v) in table {
            let size = put_size(k, v);
            if !ops.is_empty() && pending + size > frame_bytes {
                w.append(&WalRecord {
                    seq,
                    ops: std::mem::take(&mut ops),
                })?;
                frames += 1;
                pending = 0;
            }
            ops.push(WalOp::Put {
                key: k.clone(),
                value: v.clone(),
            });
            pending += size;
        }
        if !ops.is_empty() || frames == 0 {
            w.append(&WalRecord { seq, ops })?;
            frames += 1;
        }
        w.sync_to_disk()?;
    }

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to install snapshot at {}", path.display()))?;
    Ok(frames)
}

/// Cleans up a leftover `SNAPSHOT.tmp` from an interrupted checkpoint.
pub(crate) fn cleanup_tmp(dir: &Path) {
    let tmp_path = dir.join(SNAPSHOT_TMP_FILENAME);
    if tmp_path.exists() {
        tracing::warn!(path = %tmp_path.display(), "removing interrupted snapshot");
        if let Err(e) = fs::remove_file(&tmp_path) {
            tracing::warn!(
                path = %tmp_path.display(),
                error = %e,
                "could not remove interrupted snapshot"
            );
        }
    }
}
