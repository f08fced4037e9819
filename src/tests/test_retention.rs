use pretty_assertions::assert_eq;

use crate::api::types::Lookup;
use crate::errors::StorageError;
use crate::testing::entry;
use crate::tests::context::new_testing;
use crate::tests::context::TestContext;
use crate::tests::sample_data::store_1_to_99;
use crate::Storage;

/// With `max_log_files = 3` the store sheds applied segments from the
/// front on the next write, keeping the cap plus at most a mutable tail.
#[test]
fn test_retention_keep_count() -> Result<(), StorageError> {
    let mut ctx = TestContext::new()?;
    ctx.config.max_log_files = Some(3);

    let store = ctx.open()?;
    let written = store_1_to_99(&store)?;
    store.applied_to(99)?;

    let count = store.files_count()?;
    assert!(count > 3);

    store.store_entries(&[entry(100, 11, 256)])?;

    let count2 = store.files_count()?;
    assert!(count2 < count);
    assert!(count2 >= 3);
    assert!(count2 <= 3 + 1);

    let first = store.first_index()?;
    assert!(first > 1);

    // Reads across the surviving segments work, before and after a reopen.
    let got = store.entries(first, 101, u64::MAX)?.found().unwrap();
    let mut expected = written[first as usize - 1..].to_vec();
    expected.push(entry(100, 11, 256));
    assert_eq!(expected, got);

    store.close()?;
    let store = ctx.open()?;
    assert_eq!(first, store.first_index()?);
    assert_eq!(100, store.last_index()?);
    let got = store.entries(first, 101, u64::MAX)?.found().unwrap();
    assert_eq!(expected, got);

    Ok(())
}

/// Retention never deletes a segment holding unapplied entries.
#[test]
fn test_retention_respects_applied_index() -> Result<(), StorageError> {
    let mut ctx = TestContext::new()?;
    ctx.config.max_log_files = Some(3);

    let store = ctx.open()?;
    store_1_to_99(&store)?;
    store.applied_to(10)?;

    let count = store.files_count()?;
    store.store_entries(&[entry(100, 11, 256)])?;

    // Only the segments wholly below the applied point are gone.
    assert_eq!(9, store.first_index()?);
    assert!(store.files_count()? < count);
    assert!(store.files_count()? > 3);

    assert_eq!(Lookup::Compacted, store.term(5)?);
    let got = store.entries(9, 101, u64::MAX)?.found().unwrap();
    assert_eq!(92, got.len());

    Ok(())
}

/// An explicit truncation request drops applied prefix segments without a
/// file-count cap, but never splits the segment straddling the boundary.
#[test]
fn test_truncate_drops_applied_prefix() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    let written = store_1_to_99(&store)?;
    store.applied_to(99)?;
    store.truncate(50)?;

    assert_eq!(49, store.first_index()?);
    assert_eq!(99, store.last_index()?);

    assert_eq!(Lookup::Compacted, store.term(48)?);
    assert_eq!(Lookup::Found(written[48].term), store.term(49)?);

    let got = store.entries(49, 100, u64::MAX)?.found().unwrap();
    assert_eq!(written[48..].to_vec(), got);

    Ok(())
}

/// Truncation is gated on the applied index: nothing unapplied is dropped.
#[test]
fn test_truncate_waits_for_applied() -> Result<(), StorageError> {
    let (_ctx, store) = new_testing()?;

    store_1_to_99(&store)?;
    store.truncate(50)?;

    assert_eq!(1, store.first_index()?);

    // Once the state machine catches up, the next truncation takes effect.
    store.applied_to(99)?;
    store.truncate(50)?;
    assert_eq!(49, store.first_index()?);

    Ok(())
}
