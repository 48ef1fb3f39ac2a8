/// Cold-start path: replaying WAL-format files into a table.
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use wal::{WalOp, WalReader};

/// Replays a WAL-format file into `table`, returning the highest sequence
/// number encountered.
///
/// If the file does not exist, returns `Ok(0)` (fresh start).
///
/// # Errors
///
/// Propagates any I/O or corruption error from [`WalReader::replay`].
pub fn replay_into<P: AsRef<Path>>(
    path: P,
    table: &mut BTreeMap<Vec<u8>, Vec<u8>>,
) -> Result<u64> {
    match WalReader::open(path.as_ref()) {
        Ok(mut reader) => {
            let mut max_seq = 0u64;

            reader.replay(|record| {
                max_seq = max_seq.max(record.seq);
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
            })?;

            Ok(max_seq)
        }
        Err(e) => {
            if matches!(e, wal::WalError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
            {
                Ok(0)
            } else {
                Err(anyhow::anyhow!(e).context(format!(
                    "failed to open {} for replay",
                    path.as_ref().display()
                )))
            }
        }
    }
}
