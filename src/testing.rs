use crate::api::types::Entry;
use crate::api::types::EntryType;

/// Builds an entry with a deterministic payload derived from its index, so
/// tests can rebuild the expected bytes without carrying them around.
#[allow(dead_code)]
pub(crate) fn entry(index: u64, term: u64, payload_size: usize) -> Entry {
    let payload = (0..payload_size)
        .map(|i| (index as usize).wrapping_add(i) as u8)
        .collect();

    Entry {
        index,
        term,
        kind: EntryType::Normal,
        payload,
    }
}

/// Builds entries for indices `[lo, hi)` with fixed payload size. Terms
/// step up every 10 indices, the way a live log accumulates terms.
#[allow(dead_code)]
pub(crate) fn payload_entries(
    lo: u64,
    hi: u64,
    payload_size: usize,
) -> Vec<Entry> {
    (lo..hi).map(|i| entry(i, 1 + i / 10, payload_size)).collect()
}
