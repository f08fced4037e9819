use pretty_assertions::assert_eq;

use crate::api::types::HardState;
use crate::api::types::Lookup;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;
use crate::testing::entry;
use crate::testing::payload_entries;
use crate::tests::context::new_testing;
use crate::tests::context::TestContext;
use crate::tests::sample_data::store_1_to_99;
use crate::Config;
use crate::DiskStorage;
use crate::Storage;

#[test]
fn test_store_and_read() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    let written = store_1_to_99(&store)?;

    assert_eq!(1, store.first_index()?);
    assert_eq!(99, store.last_index()?);

    // One by one.
    for index in 1..100u64 {
        let got = store.entries(index, index + 1, u64::MAX)?;
        assert_eq!(
            Lookup::Found(vec![written[index as usize - 1].clone()]),
            got
        );
    }

    // The whole range at once.
    let got = store.entries(1, 100, u64::MAX)?.found().unwrap();
    assert_eq!(written, got);

    // Terms.
    for index in 1..100u64 {
        let term = store.term(index)?;
        assert_eq!(Lookup::Found(written[index as usize - 1].term), term);
    }

    // Byte budget: exactly the first two entries fit.
    let budget = written[0].on_disk_size() + written[1].on_disk_size();
    let got = store.entries(1, 100, budget)?.found().unwrap();
    assert_eq!(written[..2].to_vec(), got);

    // At least one entry even under an impossible budget.
    let got = store.entries(1, 100, 1)?.found().unwrap();
    assert_eq!(written[..1].to_vec(), got);

    // A range dipping below the first index reports compacted.
    let got = store.entries(0, 100, u64::MAX)?;
    assert_eq!(Lookup::Compacted, got);

    Ok(())
}

#[test]
fn test_conflict_truncation() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    let written = store_1_to_99(&store)?;

    // A conflicting entry in the middle of the log replaces the suffix.
    let conflict = entry(50, 100, 256);
    store.store_entries(&[conflict.clone()])?;

    assert_eq!(1, store.first_index()?);
    assert_eq!(50, store.last_index()?);

    let mut expected = written[..49].to_vec();
    expected.push(conflict.clone());
    let got = store.entries(1, 51, u64::MAX)?.found().unwrap();
    assert_eq!(expected, got);

    assert_eq!(Lookup::Found(vec![conflict]), store.entries(50, 51, u64::MAX)?);

    Ok(())
}

#[test]
fn test_conflict_truncation_at_first_index() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store_1_to_99(&store)?;

    // Conflict at the very first entry drops everything.
    let replacement = payload_entries(1, 4, 16);
    store.store_entries(&replacement)?;

    assert_eq!(1, store.first_index()?);
    assert_eq!(3, store.last_index()?);
    let got = store.entries(1, 4, u64::MAX)?.found().unwrap();
    assert_eq!(replacement, got);

    Ok(())
}

#[test]
fn test_apply_snapshot() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store_1_to_99(&store)?;

    let meta = SnapshotMeta {
        index: 500,
        term: 7,
        conf: b"1,2,3".to_vec(),
        user_data: b"checkpoint".to_vec(),
    };
    store.apply_snapshot(meta.clone())?;

    assert_eq!(501, store.first_index()?);
    assert_eq!(500, store.last_index()?);
    assert_eq!(meta, store.snapshot_meta()?);

    assert_eq!(Lookup::Found(7), store.term(500)?);
    assert_eq!(Lookup::Compacted, store.term(480)?);

    // All segment files are gone; the log restarts after the snapshot.
    let e = entry(501, 8, 64);
    store.store_entries(&[e.clone()])?;
    assert_eq!(Lookup::Found(vec![e]), store.entries(501, 502, u64::MAX)?);
    assert_eq!(501, store.last_index()?);

    // Snapshots must advance.
    let res = store.apply_snapshot(SnapshotMeta {
        index: 400,
        term: 7,
        ..Default::default()
    });
    assert!(matches!(res, Err(StorageError::InvalidArgument(_))));

    Ok(())
}

#[test]
fn test_snapshot_boundary_inside_log() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store_1_to_99(&store)?;

    // The boundary almost certainly splits a segment, which discards the
    // whole log: the snapshot supersedes it.
    store.apply_snapshot(SnapshotMeta {
        index: 50,
        term: 6,
        ..Default::default()
    })?;

    assert_eq!(51, store.first_index()?);
    assert_eq!(50, store.last_index()?);
    assert_eq!(Lookup::Found(6), store.term(50)?);
    assert_eq!(Lookup::Compacted, store.term(49)?);

    let e = entry(51, 7, 64);
    store.store_entries(&[e.clone()])?;
    assert_eq!(Lookup::Found(vec![e]), store.entries(51, 52, u64::MAX)?);

    Ok(())
}

#[test]
fn test_store_entries_covered_by_snapshot() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store.apply_snapshot(SnapshotMeta {
        index: 10,
        term: 3,
        ..Default::default()
    })?;

    // The prefix at or below the snapshot is silently dropped.
    let batch = payload_entries(8, 16, 32);
    store.store_entries(&batch)?;

    assert_eq!(11, store.first_index()?);
    assert_eq!(15, store.last_index()?);
    let got = store.entries(11, 16, u64::MAX)?.found().unwrap();
    assert_eq!(batch[3..].to_vec(), got);

    // A batch entirely below the snapshot is a no-op.
    store.store_entries(&payload_entries(1, 5, 32))?;
    assert_eq!(15, store.last_index()?);

    Ok(())
}

#[test]
fn test_initial_first_index() -> Result<(), StorageError> {
    let mut ctx = TestContext::new()?;
    ctx.config.initial_first_index = Some(100);

    let store = ctx.open()?;

    assert_eq!(100, store.first_index()?);
    assert_eq!(99, store.last_index()?);

    // Everything before the hole reads as compacted.
    assert_eq!(Lookup::Compacted, store.entries(99, 200, u64::MAX)?);

    let written = payload_entries(100, 200, 256);
    store.store_entries(&written)?;

    assert_eq!(100, store.first_index()?);
    assert_eq!(199, store.last_index()?);

    let got = store.entries(100, 200, u64::MAX)?.found().unwrap();
    assert_eq!(written, got);

    for index in 100..200u64 {
        let term = store.term(index)?;
        assert_eq!(Lookup::Found(written[index as usize - 100].term), term);
    }

    // The hole survives a reopen that no longer passes the option.
    store.close()?;
    ctx.config.initial_first_index = None;
    let store = ctx.open()?;

    assert_eq!(100, store.first_index()?);
    assert_eq!(199, store.last_index()?);
    let got = store.entries(100, 200, u64::MAX)?.found().unwrap();
    assert_eq!(written, got);

    Ok(())
}

#[test]
fn test_store_entries_rejects_holes() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store.store_entries(&payload_entries(1, 10, 32))?;

    let res = store.store_entries(&payload_entries(11, 12, 32));
    assert!(matches!(
        res,
        Err(StorageError::OutOfOrder {
            start: 11,
            expected: 10
        })
    ));

    Ok(())
}

#[test]
fn test_store_entries_rejects_malformed_batches() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    let res = store.store_entries(&[]);
    assert!(matches!(res, Err(StorageError::InvalidArgument(_))));

    let res = store.store_entries(&[entry(0, 1, 8)]);
    assert!(matches!(res, Err(StorageError::InvalidArgument(_))));

    let res = store.store_entries(&[entry(1, 1, 8), entry(3, 1, 8)]);
    assert!(matches!(res, Err(StorageError::InvalidArgument(_))));

    Ok(())
}

#[test]
fn test_read_bounds() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store.store_entries(&payload_entries(1, 10, 32))?;

    let res = store.entries(5, 11, u64::MAX);
    assert!(matches!(
        res,
        Err(StorageError::OutOfBound { index: 11, last: 9 })
    ));

    let res = store.term(10);
    assert!(matches!(
        res,
        Err(StorageError::OutOfBound { index: 10, last: 9 })
    ));

    let res = store.entries(7, 5, u64::MAX);
    assert!(matches!(res, Err(StorageError::InvalidArgument(_))));

    // An empty range is fine.
    assert_eq!(Lookup::Found(vec![]), store.entries(5, 5, u64::MAX)?);

    Ok(())
}

#[test]
fn test_store_hard_state() -> Result<(), StorageError> {
    let (ctx, store) = new_testing()?;

    assert_eq!(HardState::default(), store.hard_state()?);

    let hs = HardState {
        term: 5,
        vote: 2,
        commit: 17,
    };
    store.store_hard_state(&hs)?;
    assert_eq!(hs, store.hard_state()?);

    store.close()?;
    let store = ctx.open()?;
    assert_eq!(hs, store.hard_state()?);

    Ok(())
}

#[test]
fn test_operations_after_close() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store.store_entries(&payload_entries(1, 5, 32))?;
    store.close()?;

    assert!(matches!(store.first_index(), Err(StorageError::NotOpen)));
    assert!(matches!(
        store.store_entries(&payload_entries(5, 6, 32)),
        Err(StorageError::NotOpen)
    ));
    assert!(matches!(store.close(), Err(StorageError::NotOpen)));

    Ok(())
}

#[test]
fn test_destroy() -> Result<(), StorageError> {
    let (ctx, store) = new_testing()?;

    store_1_to_99(&store)?;
    store.destroy(false)?;

    assert!(!std::path::Path::new(&ctx.config.dir).exists());

    Ok(())
}

#[test]
fn test_destroy_with_backup() -> Result<(), StorageError> {
    let (ctx, store) = new_testing()?;

    let written = store_1_to_99(&store)?;
    store.destroy(true)?;

    let dir = std::path::PathBuf::from(&ctx.config.dir);
    assert!(!dir.exists());

    // The backup sits next to the original directory, suffixed with the
    // unix time of the destroy.
    let parent = dir.parent().unwrap();
    let prefix = format!("{}.bak.", dir.file_name().unwrap().to_str().unwrap());
    let bak: Vec<_> = std::fs::read_dir(parent)?
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(1, bak.len());

    // The backup is a complete storage directory.
    let store = DiskStorage::open(Config::new(bak[0].display()))?;
    let got = store.entries(1, 100, u64::MAX)?.found().unwrap();
    assert_eq!(written, got);
    store.close()?;

    Ok(())
}
