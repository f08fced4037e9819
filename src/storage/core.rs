use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::Arc;

use log::error;
use log::info;
use log::warn;

use crate::api::types::Entry;
use crate::api::types::HardState;
use crate::api::types::Lookup;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;
use crate::file_lock::FileLock;
use crate::meta;
use crate::meta::sync_dir;
use crate::meta::MetaState;
use crate::segment::active::ActiveSegment;
use crate::segment::scan;
use crate::segment::sealed::SealedSegment;
use crate::segment::ScanEnd;
use crate::segment::Segment;
use crate::Config;

/// A segment as classified while opening the directory.
enum Loaded {
    Sealed(SealedSegment),
    Tail(ActiveSegment),
}

impl Loaded {
    fn first_index(&self) -> u64 {
        match self {
            Loaded::Sealed(s) => s.first_index(),
            Loaded::Tail(a) => a.seg.first_index,
        }
    }

    fn last_index(&self) -> Option<u64> {
        match self {
            Loaded::Sealed(s) => Some(s.last_index()),
            Loaded::Tail(a) => a.seg.last_index(),
        }
    }

    fn path(&self) -> &std::path::Path {
        match self {
            Loaded::Sealed(s) => &s.seg.path,
            Loaded::Tail(a) => &a.seg.path,
        }
    }
}

/// The single-threaded storage engine: the segment index and every
/// invariant about which indices are live, compacted, or torn.
///
/// [`DiskStorage`](crate::DiskStorage) wraps this in a `RwLock` to provide
/// the single-writer / multi-reader contract.
#[derive(Debug)]
pub(crate) struct Core {
    config: Arc<Config>,

    /// Immutable segments keyed by their first index.
    sealed: BTreeMap<u64, SealedSegment>,

    /// The mutable tail, when one exists. Created lazily on the first
    /// append after open, snapshot install, or a roll.
    active: Option<ActiveSegment>,

    /// Durable hard state and snapshot metadata, mirrored from META.
    meta: MetaState,

    /// Sequence number the next created segment file will carry.
    next_seqno: u64,

    /// Applied-index hint gating retention.
    applied: u64,

    /// Explicit compaction request recorded by `truncate()`.
    truncate_hint: u64,
}

impl Core {
    pub(crate) fn open(config: Arc<Config>) -> Result<Self, StorageError> {
        let mut meta_state = meta::load(&config)?.unwrap_or_default();

        // A staged META left behind by a crash is not authoritative.
        let tmp = config.meta_tmp_path();
        if tmp.exists() {
            warn!("Removing stale '{}'", tmp.display());
            fs::remove_file(&tmp)?;
        }

        let mut files: Vec<(u64, u64)> = Vec::new();
        for entry in fs::read_dir(&config.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();

            if name == Config::META_FILE_NAME
                || name == FileLock::LOCK_FILE_NAME
            {
                continue;
            }

            match Config::parse_segment_file_name(&name) {
                Ok((seqno, first_index)) => files.push((seqno, first_index)),
                Err(err) => {
                    warn!("Ignore unrecognized file '{}': {}", name, err);
                }
            }
        }
        files.sort();

        // An empty directory with a seeded first index starts as a log with
        // a hole at the front: persist the synthesized truncation point so
        // it survives reopens that no longer pass the option.
        if files.is_empty()
            && meta_state.snapshot.index == 0
            && config.initial_first_index() > 1
        {
            meta_state.snapshot.index = config.initial_first_index() - 1;
            meta::store(&config, &meta_state)?;
            info!(
                "Seeded empty log starting at index {}",
                config.initial_first_index()
            );
        }

        let applied = meta_state.snapshot.index;
        let next_seqno = files.last().map(|(seqno, _)| seqno + 1).unwrap_or(1);

        let mut core = Self {
            config,
            sealed: BTreeMap::new(),
            active: None,
            meta: meta_state,
            next_seqno,
            applied,
            truncate_hint: 0,
        };

        core.load_segments(files)?;

        Ok(core)
    }

    fn load_segments(
        &mut self,
        mut files: Vec<(u64, u64)>,
    ) -> Result<(), StorageError> {
        let trunc = self.meta.snapshot.index;

        // Files whose whole range is provably below the snapshot need no
        // scan: the next file starts at their last index + 1.
        while files.len() >= 2 && files[1].1 <= trunc + 1 {
            let (seqno, first_index) = files.remove(0);
            let path = self.config.segment_path(seqno, first_index);
            info!("Removing segment below snapshot: '{}'", path.display());
            fs::remove_file(&path)?;
        }

        let n = files.len();
        let mut loaded: Vec<Loaded> = Vec::new();
        let mut truncated_rest = false;

        for (i, &(seqno, first_index)) in files.iter().enumerate() {
            let path = self.config.segment_path(seqno, first_index);

            if truncated_rest {
                warn!(
                    "Removing segment after corruption point: '{}'",
                    path.display()
                );
                fs::remove_file(&path)?;
                continue;
            }

            let is_last = i == n - 1;
            let f = Segment::open_segment_file(
                &self.config,
                seqno,
                first_index,
            )?;
            let file_size = f.metadata()?.len();

            // Sealed segments with an intact trailer reopen without a scan.
            if let Some(offsets) =
                SealedSegment::try_load_trailer(&f, file_size)?
            {
                let seg = Segment {
                    f: Arc::new(f),
                    path,
                    seqno,
                    first_index,
                    offsets,
                };
                loaded.push(Loaded::Sealed(SealedSegment::new(seg)));
                continue;
            }

            let outcome = scan(
                &f,
                file_size,
                self.config.read_buffer_size(),
                first_index,
                &path,
            )?;

            let mut seg = Segment {
                f: Arc::new(f),
                path,
                seqno,
                first_index,
                offsets: outcome.offsets,
            };

            if is_last {
                // Anything after the valid prefix of the last segment is a
                // torn append or leftover seal bytes: cut it and keep the
                // tail mutable.
                match outcome.end {
                    ScanEnd::Eof => {}
                    ScanEnd::EndMarker { .. } => {
                        seg.f.set_len(seg.records_end())?;
                        seg.f.sync_data()?;
                    }
                    ScanEnd::Torn { offset }
                    | ScanEnd::Corrupt { offset, .. } => {
                        warn!(
                            "Truncating tail segment '{}' at offset {}: \
                            discarding bytes {}..{}",
                            seg.path.display(),
                            offset,
                            seg.records_end(),
                            file_size,
                        );
                        seg.f.set_len(seg.records_end())?;
                        seg.f.sync_data()?;
                    }
                }
                loaded.push(Loaded::Tail(ActiveSegment::from_segment(seg)));
                continue;
            }

            match outcome.end {
                ScanEnd::Eof | ScanEnd::EndMarker { .. } => {
                    if seg.is_empty() {
                        return Err(StorageError::corrupt(
                            seg.path.display(),
                            0,
                            "sealed segment holds no records",
                        ));
                    }
                    loaded.push(Loaded::Sealed(SealedSegment::new(seg)));
                }
                ScanEnd::Torn { offset } => {
                    self.handle_mid_corruption(
                        seg,
                        offset,
                        "incomplete record".to_string(),
                        &mut loaded,
                        &mut truncated_rest,
                    )?;
                }
                ScanEnd::Corrupt { offset, reason } => {
                    self.handle_mid_corruption(
                        seg,
                        offset,
                        reason,
                        &mut loaded,
                        &mut truncated_rest,
                    )?;
                }
            }
        }

        // Remove segments that fell at or below the snapshot; a straddling
        // segment invalidates itself and everything after it, mirroring
        // what snapshot installation does at runtime.
        let mut kept: Vec<Loaded> = Vec::new();
        let mut drop_rest = false;
        for seg in loaded {
            let below = seg.last_index().map_or(
                seg.first_index() <= trunc,
                |last| last <= trunc,
            );
            if drop_rest || below {
                info!(
                    "Removing segment below snapshot {}: '{}'",
                    trunc,
                    seg.path().display()
                );
                fs::remove_file(seg.path())?;
                continue;
            }
            if seg.first_index() <= trunc {
                info!(
                    "Removing segment straddling snapshot {}: '{}'",
                    trunc,
                    seg.path().display()
                );
                fs::remove_file(seg.path())?;
                drop_rest = true;
                continue;
            }
            kept.push(seg);
        }

        // The ranges of the survivors must be contiguous.
        let mut prev_last: Option<u64> = None;
        for seg in &kept {
            if let Some(prev) = prev_last {
                if seg.first_index() != prev + 1 {
                    return Err(StorageError::corrupt(
                        seg.path().display(),
                        0,
                        format!(
                            "Gap between segments: {} -> {}; can not open, \
                            fix this error and re-open",
                            prev,
                            seg.first_index(),
                        ),
                    ));
                }
            }
            prev_last = seg.last_index().or(prev_last);
        }

        for seg in kept {
            match seg {
                Loaded::Sealed(s) => {
                    self.sealed.insert(s.first_index(), s);
                }
                Loaded::Tail(a) => {
                    self.active = Some(a);
                }
            }
        }

        Ok(())
    }

    /// A corrupt record in a sealed segment. Refused unless
    /// `allow_corrupt_startup` is set, in which case the segment is cut at
    /// the last good boundary, becomes the tail, and every later segment is
    /// dropped.
    fn handle_mid_corruption(
        &self,
        seg: Segment,
        offset: u64,
        reason: String,
        loaded: &mut Vec<Loaded>,
        truncated_rest: &mut bool,
    ) -> Result<(), StorageError> {
        if !self.config.allow_corrupt_startup() {
            return Err(StorageError::corrupt(
                seg.path.display(),
                offset,
                reason,
            ));
        }

        error!(
            "Corrupt record in sealed segment '{}' at offset {} ({}); \
            truncating the log from index {} onwards",
            seg.path.display(),
            offset,
            reason,
            seg.next_index(),
        );

        seg.f.set_len(seg.records_end())?;
        seg.f.sync_data()?;
        loaded.push(Loaded::Tail(ActiveSegment::from_segment(seg)));
        *truncated_rest = true;

        Ok(())
    }

    pub(crate) fn first_index(&self) -> u64 {
        if let Some((&first, _)) = self.sealed.first_key_value() {
            return first;
        }
        if let Some(a) = &self.active {
            if !a.seg.is_empty() {
                return a.seg.first_index;
            }
        }
        self.meta.snapshot.index + 1
    }

    pub(crate) fn last_index(&self) -> u64 {
        if let Some(a) = &self.active {
            if let Some(last) = a.seg.last_index() {
                return last;
            }
        }
        if let Some((_, s)) = self.sealed.last_key_value() {
            return s.last_index();
        }
        self.meta.snapshot.index
    }

    pub(crate) fn term(&self, index: u64) -> Result<Lookup<u64>, StorageError> {
        if index == self.meta.snapshot.index {
            return Ok(Lookup::Found(self.meta.snapshot.term));
        }
        if index < self.first_index() {
            return Ok(Lookup::Compacted);
        }

        let last = self.last_index();
        if index > last {
            return Err(StorageError::OutOfBound { index, last });
        }

        let term = self.segment_for(index)?.read_term(index)?;
        Ok(Lookup::Found(term))
    }

    pub(crate) fn entries(
        &self,
        lo: u64,
        hi: u64,
        max_bytes: u64,
    ) -> Result<Lookup<Vec<Entry>>, StorageError> {
        if lo > hi {
            return Err(StorageError::invalid_argument(format!(
                "invalid range [{}, {})",
                lo, hi
            )));
        }
        if lo < self.first_index() {
            return Ok(Lookup::Compacted);
        }

        let last = self.last_index();
        if hi > last.saturating_add(1) {
            return Err(StorageError::OutOfBound { index: hi, last });
        }

        let mut out = Vec::new();
        let mut total: u64 = 0;
        for index in lo..hi {
            let entry = self.segment_for(index)?.read_entry(index)?;
            let size = entry.on_disk_size();

            // Always return at least one entry so a paging caller makes
            // progress even when a single entry exceeds the budget.
            if !out.is_empty() && total.saturating_add(size) > max_bytes {
                break;
            }
            total += size;
            out.push(entry);
        }

        Ok(Lookup::Found(out))
    }

    fn segment_for(&self, index: u64) -> Result<&Segment, StorageError> {
        if let Some(a) = &self.active {
            if a.seg.contains(index) {
                return Ok(&a.seg);
            }
        }
        if let Some((_, s)) = self.sealed.range(..=index).next_back() {
            if s.contains(index) {
                return Ok(&s.seg);
            }
        }
        Err(io::Error::other(format!("no segment holds index {}", index))
            .into())
    }

    pub(crate) fn store_entries(
        &mut self,
        entries: &[Entry],
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Err(StorageError::invalid_argument(
                "entries must not be empty",
            ));
        }
        if entries[0].index == 0 {
            return Err(StorageError::invalid_argument(
                "log index 0 is reserved",
            ));
        }
        for w in entries.windows(2) {
            if w[1].index != w[0].index + 1 {
                return Err(StorageError::invalid_argument(format!(
                    "entry indices must ascend by 1: {} then {}",
                    w[0].index, w[1].index
                )));
            }
        }

        let last = self.last_index();
        let base = entries[0].index;
        if base > last + 1 {
            return Err(StorageError::OutOfOrder {
                start: base,
                expected: last + 1,
            });
        }

        // Entries the snapshot already covers are dropped silently.
        let trunc = self.meta.snapshot.index;
        let mut batch = entries;
        if base <= trunc {
            let skip = (trunc - base + 1) as usize;
            if skip >= batch.len() {
                return Ok(());
            }
            batch = &batch[skip..];
        }

        let base = batch[0].index;
        if base <= self.last_index() {
            self.truncate_suffix(base)?;
        }

        self.append_batch(batch)?;
        self.apply_retention()?;
        Ok(())
    }

    /// Removes all stored entries with `index >= base`: whole tail segments
    /// first, then an in-place cut of the segment straddling `base`.
    fn truncate_suffix(&mut self, base: u64) -> Result<(), StorageError> {
        debug_assert!(base > self.meta.snapshot.index);

        if let Some(a) = &self.active {
            if a.seg.first_index >= base {
                let a = self.active.take().unwrap();
                info!(
                    "Conflict truncation removed tail segment '{}'",
                    a.seg.path.display()
                );
                fs::remove_file(&a.seg.path)?;
            }
        }

        while let Some((&first, _)) = self.sealed.last_key_value() {
            if first < base {
                break;
            }
            let (_, s) = self.sealed.pop_last().unwrap();
            info!(
                "Conflict truncation removed segment '{}'",
                s.seg.path.display()
            );
            fs::remove_file(&s.seg.path)?;
        }

        if let Some(a) = &mut self.active {
            if a.seg.contains(base) {
                a.truncate_from(base)?;
            }
        } else {
            let straddler = match self.sealed.last_key_value() {
                Some((&first, s)) if s.contains(base) => Some(first),
                _ => None,
            };
            if let Some(first) = straddler {
                let s = self.sealed.remove(&first).unwrap();
                info!(
                    "Reopening sealed segment '{}' to truncate from {}",
                    s.seg.path.display(),
                    base
                );
                let mut a = s.unseal()?;
                a.truncate_from(base)?;
                self.active = Some(a);
            }
        }

        sync_dir(&self.config.dir)?;
        Ok(())
    }

    fn append_batch(&mut self, batch: &[Entry]) -> Result<(), StorageError> {
        let pre_active = self
            .active
            .as_ref()
            .map(|a| (a.seg.seqno, a.seg.first_index, a.seg.count()));
        let pre_next_seqno = self.next_seqno;

        match self.append_batch_inner(batch) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Store batch failed, rolling back: {}", e);
                self.rollback_batch(pre_active, pre_next_seqno);
                Err(e)
            }
        }
    }

    fn append_batch_inner(
        &mut self,
        batch: &[Entry],
    ) -> Result<(), StorageError> {
        for entry in batch {
            if self.active.is_none() {
                let a = ActiveSegment::create(
                    &self.config,
                    self.next_seqno,
                    entry.index,
                )?;
                self.next_seqno += 1;
                self.active = Some(a);
            }

            let a = self.active.as_mut().unwrap();
            a.append(entry)?;

            if a.size() > self.config.log_file_size() {
                let a = self.active.take().unwrap();
                let sealed = a.seal()?;
                self.sealed.insert(sealed.first_index(), sealed);
            }
        }

        if let Some(a) = self.active.as_mut() {
            a.flush()?;
            a.sync()?;
        }
        Ok(())
    }

    /// Restores the pre-batch state after a partial write failure so the
    /// batch is fully absent. Best effort: failures here are logged, not
    /// propagated over the original error.
    fn rollback_batch(
        &mut self,
        pre_active: Option<(u64, u64, usize)>,
        pre_next_seqno: u64,
    ) {
        if let Some(a) = &self.active {
            if a.seg.seqno >= pre_next_seqno {
                let a = self.active.take().unwrap();
                if let Err(e) = fs::remove_file(&a.seg.path) {
                    error!(
                        "Rollback: cannot remove '{}': {}",
                        a.seg.path.display(),
                        e
                    );
                }
            }
        }

        let created: Vec<u64> = self
            .sealed
            .values()
            .filter(|s| s.seg.seqno >= pre_next_seqno)
            .map(|s| s.first_index())
            .collect();
        for first in created {
            if let Some(s) = self.sealed.remove(&first) {
                if let Err(e) = fs::remove_file(&s.seg.path) {
                    error!(
                        "Rollback: cannot remove '{}': {}",
                        s.seg.path.display(),
                        e
                    );
                }
            }
        }
        self.next_seqno = pre_next_seqno;

        if let Some((seqno, first_index, count)) = pre_active {
            let still_active =
                matches!(&self.active, Some(a) if a.seg.seqno == seqno);

            if still_active {
                let a = self.active.as_mut().unwrap();
                if let Err(e) = a.truncate_to_count(count) {
                    error!(
                        "Rollback: cannot rewind '{}': {}",
                        a.seg.path.display(),
                        e
                    );
                }
            } else if let Some(s) = self.sealed.remove(&first_index) {
                // The original tail was sealed mid-batch; reopen and rewind.
                match s.unseal() {
                    Ok(mut a) => {
                        if let Err(e) = a.truncate_to_count(count) {
                            error!(
                                "Rollback: cannot rewind '{}': {}",
                                a.seg.path.display(),
                                e
                            );
                        }
                        self.active = Some(a);
                    }
                    Err(e) => error!("Rollback: cannot unseal: {}", e),
                }
            }
        }
    }

    /// Deletes sealed segments from the front: past the retention cap once
    /// they are applied, and unconditionally below the explicit truncation
    /// hint. Never crosses the applied index and never touches the tail.
    fn apply_retention(&mut self) -> Result<(), StorageError> {
        let mut removed = false;

        let max = self.config.max_log_files();
        if max > 0 {
            while self.sealed.len() > max {
                let (_, front) = self.sealed.first_key_value().unwrap();
                if front.last_index() > self.applied {
                    break;
                }
                let (_, s) = self.sealed.pop_first().unwrap();
                info!(
                    "Retention removed segment '{}': [{}, {}]",
                    s.seg.path.display(),
                    s.first_index(),
                    s.last_index()
                );
                fs::remove_file(&s.seg.path)?;
                removed = true;
            }
        }

        let upto = self.applied.min(self.truncate_hint);
        while let Some((_, front)) = self.sealed.first_key_value() {
            if front.last_index() > upto {
                break;
            }
            let (_, s) = self.sealed.pop_first().unwrap();
            info!(
                "Truncation removed segment '{}': [{}, {}]",
                s.seg.path.display(),
                s.first_index(),
                s.last_index()
            );
            fs::remove_file(&s.seg.path)?;
            removed = true;
        }

        if removed {
            sync_dir(&self.config.dir)?;
        }
        Ok(())
    }

    pub(crate) fn apply_snapshot(
        &mut self,
        m: SnapshotMeta,
    ) -> Result<(), StorageError> {
        if m.index < self.meta.snapshot.index {
            return Err(StorageError::invalid_argument(format!(
                "snapshot index must advance: {} < current {}",
                m.index, self.meta.snapshot.index
            )));
        }

        info!(
            "Applying snapshot: index {}, term {}",
            m.index, m.term
        );

        // Persist the compaction point first; segment removal replays from
        // it at open time if interrupted.
        self.meta.snapshot = m;
        meta::store(&self.config, &self.meta)?;

        let idx = self.meta.snapshot.index;

        let straddles = self
            .sealed
            .values()
            .any(|s| s.first_index() <= idx && idx < s.last_index())
            || self.active.as_ref().is_some_and(|a| {
                a.seg.first_index <= idx
                    && a.seg.last_index().is_some_and(|last| idx < last)
            });

        if straddles {
            // Entries above the boundary inside a straddling segment cannot
            // be split out; the snapshot supersedes the whole log.
            for (_, s) in std::mem::take(&mut self.sealed) {
                fs::remove_file(&s.seg.path)?;
            }
            if let Some(a) = self.active.take() {
                fs::remove_file(&a.seg.path)?;
            }
        } else {
            while let Some((_, front)) = self.sealed.first_key_value() {
                if front.last_index() > idx {
                    break;
                }
                let (_, s) = self.sealed.pop_first().unwrap();
                fs::remove_file(&s.seg.path)?;
            }
            if let Some(a) = &self.active {
                let below = match a.seg.last_index() {
                    Some(last) => last <= idx,
                    None => a.seg.first_index <= idx,
                };
                if below {
                    let a = self.active.take().unwrap();
                    fs::remove_file(&a.seg.path)?;
                }
            }
        }

        sync_dir(&self.config.dir)?;
        self.applied = self.applied.max(idx);
        Ok(())
    }

    pub(crate) fn store_hard_state(
        &mut self,
        hs: &HardState,
    ) -> Result<(), StorageError> {
        self.meta.hard = *hs;
        meta::store(&self.config, &self.meta)?;
        Ok(())
    }

    pub(crate) fn hard_state(&self) -> HardState {
        self.meta.hard
    }

    pub(crate) fn snapshot_meta(&self) -> SnapshotMeta {
        self.meta.snapshot.clone()
    }

    pub(crate) fn applied_to(&mut self, index: u64) {
        self.applied = self.applied.max(index);
    }

    pub(crate) fn truncate(&mut self, index: u64) -> Result<(), StorageError> {
        self.truncate_hint = self.truncate_hint.max(index);
        self.apply_retention()
    }

    pub(crate) fn close(&mut self) -> Result<(), StorageError> {
        if let Some(a) = self.active.as_mut() {
            a.flush()?;
            a.sync()?;
        }
        Ok(())
    }

    pub(crate) fn files_count(&self) -> usize {
        self.sealed.len() + usize::from(self.active.is_some())
    }
}
