use super::helpers::{marked, open_ring, ring};
use crate::rotating_io::ARCHIVE_COUNT_FILENAME;
use crate::*;
use anyhow::Result;
use std::sync::Arc;
use tempfile::tempdir;

// --------------------- open ---------------------

#[test]
fn fresh_store_starts_at_piece_zero_unmarked() -> Result<()> {
    let dir = tempdir()?;
    let io = open_ring(dir.path(), 4)?;

    assert_eq!(io.pieces_count(), 4);
    assert_eq!(io.current_piece_file_no(), 0);
    assert!(marked(&io)?.is_empty());
    for n in 0..4 {
        assert!(dir.path().join(format!("{n}.db")).is_dir());
    }
    Ok(())
}

#[test]
fn zero_pieces_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let err = RotatingDbIo::open(dir.path(), &ring(0), no_crash()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    Ok(())
}

// --------------------- rotate ---------------------

#[test]
fn ring_keeps_exactly_one_marked_piece() -> Result<()> {
    let dir = tempdir()?;
    let n = 4;
    let mut io = open_ring(dir.path(), n)?;

    let mut expected = io.current_piece_file_no();
    for _ in 0..10 {
        io.rotate()?;
        expected = (expected + n - 1) % n;
        assert_eq!(io.pieces_count(), n);
        assert_eq!(io.current_piece_file_no(), expected);
        assert_eq!(marked(&io)?, vec![expected]);
        // the marker is the only key in a fresh piece
        assert_eq!(io.current().len(), 1);
    }
    Ok(())
}

#[test]
fn current_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut io = open_ring(dir.path(), 5)?;
        io.rotate()?;
        io.rotate()?;
        assert_eq!(io.current_piece_file_no(), 3);
    }
    let io = open_ring(dir.path(), 5)?;
    assert_eq!(io.current_piece_file_no(), 3);
    assert_eq!(marked(&io)?, vec![3]);
    Ok(())
}

#[test]
fn data_lives_until_its_piece_is_evicted() -> Result<()> {
    let dir = tempdir()?;
    let n = 3;
    let mut io = open_ring(dir.path(), n)?;
    io.current().insert(b"k", b"v")?;

    for _ in 0..n - 1 {
        io.rotate()?;
        assert!(io.pieces().any(|p| p.exists(b"k").unwrap_or(false)));
    }
    drop(io);

    let mut io = open_ring(dir.path(), n)?;
    assert!(io.pieces().any(|p| p.exists(b"k").unwrap_or(false)));

    io.rotate()?;
    assert!(!io.pieces().any(|p| p.exists(b"k").unwrap_or(false)));
    Ok(())
}

#[test]
fn held_piece_outlives_its_eviction() -> Result<()> {
    let dir = tempdir()?;
    let mut io = open_ring(dir.path(), 2)?;
    io.current().insert(b"k", b"v")?;
    let held = Arc::clone(io.current());

    io.rotate()?;
    io.rotate()?;
    // still readable from memory even though its directory was recreated
    assert_eq!(held.lookup(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn single_piece_ring_rotates_in_place() -> Result<()> {
    let dir = tempdir()?;
    let mut io = open_ring(dir.path(), 1)?;
    io.current().insert(b"k", b"v")?;

    io.rotate()?;
    assert_eq!(io.current_piece_file_no(), 0);
    assert_eq!(marked(&io)?, vec![0]);
    assert!(!io.current().exists(b"k")?);
    Ok(())
}

// --------------------- archive mode ---------------------

#[test]
fn archive_mode_keeps_evicted_pieces() -> Result<()> {
    let dir = tempdir()?;
    let config = ring(2).with_archive_mode(true);
    {
        let mut io = RotatingDbIo::open(dir.path(), &config, no_crash())?;
        for round in 0..3u8 {
            io.current().insert(b"round", &[round])?;
            io.rotate()?;
        }
        assert_eq!(io.archived_count(), 3);
        assert_eq!(io.pieces_count(), 2);
        assert_eq!(io.pieces().count(), 5);
    }

    for k in 0..3 {
        assert!(dir.path().join(format!("archive-{k}.db")).is_dir());
    }
    let count = std::fs::read_to_string(dir.path().join(ARCHIVE_COUNT_FILENAME))?;
    assert_eq!(count.trim(), "3");

    let io = RotatingDbIo::open(dir.path(), &config, no_crash())?;
    assert_eq!(io.archived_count(), 3);
    let rounds: Vec<Option<Vec<u8>>> = io
        .pieces()
        .map(|p| p.lookup(b"round"))
        .collect::<anyhow::Result<_>>()?;
    // ring: fresh current, then round 2; archive newest first
    assert_eq!(
        rounds,
        vec![None, Some(vec![2]), Some(vec![1]), Some(vec![0]), None]
    );
    Ok(())
}

#[test]
fn delete_mode_removes_evicted_directories() -> Result<()> {
    let dir = tempdir()?;
    let mut io = open_ring(dir.path(), 2)?;
    io.current().insert(b"k", b"v")?;
    io.rotate()?;
    io.rotate()?;

    assert!(!dir.path().join("archive-0.db").exists());
    assert!(!dir.path().join(ARCHIVE_COUNT_FILENAME).exists());
    assert!(!io.pieces().any(|p| p.exists(b"k").unwrap_or(false)));
    Ok(())
}
