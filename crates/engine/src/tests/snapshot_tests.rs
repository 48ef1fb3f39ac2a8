use super::helpers::{dump, no_checkpoint};
use crate::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

fn small_checkpoints() -> EngineOptions {
    EngineOptions {
        wal_sync: false,
        checkpoint_bytes: 256,
        max_piece_bytes: 0,
    }
}

#[test]
fn forced_checkpoint_truncates_wal() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");

    let engine = Engine::open(&path, &no_checkpoint())?;
    engine.insert(b"a", b"1")?;
    engine.insert(b"b", b"2")?;
    assert!(engine.wal_bytes() > 0);

    engine.checkpoint()?;
    assert_eq!(engine.wal_bytes(), 0);
    assert_eq!(fs::metadata(path.join(WAL_FILENAME))?.len(), 0);
    assert!(path.join(SNAPSHOT_FILENAME).exists());
    Ok(())
}

#[test]
fn automatic_checkpoint_keeps_data() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");

    {
        let engine = Engine::open(&path, &small_checkpoints())?;
        for i in 0..100u32 {
            engine.insert(format!("k{:03}", i).as_bytes(), b"some value")?;
        }
        engine.kill(b"k050")?;
        assert!(engine.wal_bytes() < 256);
    }

    let engine = Engine::open(&path, &small_checkpoints())?;
    assert_eq!(engine.len(), 99);
    assert!(engine.lookup(b"k050")?.is_none());
    assert_eq!(engine.seq(), 101);
    Ok(())
}

#[test]
fn stale_wal_over_newer_snapshot_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");

    let old_wal = {
        let engine = Engine::open(&path, &no_checkpoint())?;
        engine.insert(b"a", b"1")?;
        engine.kill(b"a")?;
        engine.insert(b"b", b"2")?;
        let old_wal = fs::read(path.join(WAL_FILENAME))?;
        engine.checkpoint()?;
        old_wal
    };

    // Crash between the snapshot rename and the WAL truncate.
    fs::write(path.join(WAL_FILENAME), &old_wal)?;

    let engine = Engine::open(&path, &no_checkpoint())?;
    assert_eq!(dump(&engine)?, vec![("b".to_string(), "2".to_string())]);
    assert_eq!(engine.seq(), 3);
    Ok(())
}

#[test]
fn leftover_tmp_snapshot_is_removed() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");
    fs::create_dir_all(&path)?;
    fs::write(path.join("SNAPSHOT.tmp"), b"half written garbage")?;

    let engine = Engine::open(&path, &no_checkpoint())?;
    assert!(engine.is_empty());
    assert!(!path.join("SNAPSHOT.tmp").exists());
    Ok(())
}

#[test]
fn undeletable_tmp_snapshot_does_not_block_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");
    fs::create_dir_all(path.join("SNAPSHOT.tmp").join("blocker"))?;

    let engine = Engine::open(&path, &no_checkpoint())?;
    engine.insert(b"a", b"1")?;
    assert!(path.join("SNAPSHOT.tmp").is_dir());
    assert_eq!(engine.lookup(b"a")?, Some(b"1".to_vec()));
    Ok(())
}

// --------------------- Framing ---------------------

#[test]
fn snapshot_is_split_into_bounded_frames() -> Result<()> {
    let dir = tempdir()?;
    let mut table = Table::new();
    for i in 0..40u32 {
        table.insert(format!("key{:02}", i).into_bytes(), vec![b'v'; 20]);
    }

    // each put costs 5 + 20 + 9 bytes, so a 100-byte frame holds two
    let frames = snapshot::write_framed(dir.path(), 7, &table, 100)?;
    assert_eq!(frames, 20);

    let mut seen = Vec::new();
    wal::WalReader::open(dir.path().join(SNAPSHOT_FILENAME))?
        .replay(|record| seen.push((record.seq, record.ops.len())))?;
    assert_eq!(seen.len(), 20);
    assert!(seen.iter().all(|&(seq, ops)| seq == 7 && ops == 2));

    let mut loaded = Table::new();
    assert_eq!(snapshot::load(dir.path(), &mut loaded)?, 7);
    assert_eq!(loaded, table);
    Ok(())
}

#[test]
fn pair_larger_than_frame_gets_its_own_frame() -> Result<()> {
    let dir = tempdir()?;
    let mut table = Table::new();
    table.insert(b"a".to_vec(), b"1".to_vec());
    table.insert(b"big".to_vec(), vec![b'x'; 500]);
    table.insert(b"c".to_vec(), b"3".to_vec());

    assert_eq!(snapshot::write_framed(dir.path(), 3, &table, 64)?, 3);

    let mut loaded = Table::new();
    assert_eq!(snapshot::load(dir.path(), &mut loaded)?, 3);
    assert_eq!(loaded, table);
    Ok(())
}

#[test]
fn empty_snapshot_keeps_sequence() -> Result<()> {
    let dir = tempdir()?;
    assert_eq!(snapshot::write_framed(dir.path(), 42, &Table::new(), 100)?, 1);

    let mut loaded = Table::new();
    assert_eq!(snapshot::load(dir.path(), &mut loaded)?, 42);
    assert!(loaded.is_empty());
    Ok(())
}

// --------------------- Failed checkpoints ---------------------

#[test]
fn failed_checkpoint_does_not_fail_writes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("piece");
    let engine = Engine::open(&path, &small_checkpoints())?;

    // a directory in the tmp slot makes every snapshot attempt fail
    let blocker = path.join("SNAPSHOT.tmp");
    fs::create_dir_all(blocker.join("blocker"))?;
    for i in 0..20u32 {
        engine.insert(format!("k{:02}", i).as_bytes(), b"some value")?;
    }
    assert!(engine.wal_bytes() >= 256);
    assert!(!path.join(SNAPSHOT_FILENAME).exists());
    assert!(engine.checkpoint().is_err());

    // the next write retries and succeeds
    fs::remove_dir_all(&blocker)?;
    engine.insert(b"k99", b"last")?;
    assert_eq!(engine.wal_bytes(), 0);
    assert!(path.join(SNAPSHOT_FILENAME).exists());
    drop(engine);

    let engine = Engine::open(&path, &small_checkpoints())?;
    assert_eq!(engine.len(), 21);
    assert_eq!(engine.lookup(b"k99")?, Some(b"last".to_vec()));
    assert_eq!(engine.seq(), 21);
    Ok(())
}
