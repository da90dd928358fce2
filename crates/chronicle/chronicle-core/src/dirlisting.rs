//! The directory-listing file (`directory-listing.cq4t` / `metadata.cq4t`):
//! a single small wire-encoded metadata record whose `highestCycle`,
//! `lowestCycle` and `modCount` fields are aligned 8-byte cells that every
//! reader and writer polls directly out of the mapping, without ever
//! re-parsing the wire format after the first open.

use crate::error::{ChronicleError, Result};
use chronicle_mmap::MappedWindowMut;
use chronicle_wire::{WirePad, WireVisitor, parse};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const NONE_CYCLE: i64 = i64::MIN;
const FILE_LEN: usize = 4096;

/// Sentinel stored in `chronicle.write.lock` when no process holds it, and
/// in the two replication-index cells when nothing has been replicated yet.
const UNSET: u64 = u64::MAX;

pub struct DirListing {
    path: PathBuf,
    window: MappedWindowMut,
    highest_cycle_offset: usize,
    lowest_cycle_offset: usize,
    mod_count_offset: usize,
    write_lock_offset: usize,
    last_index_replicated_offset: usize,
    last_acknowledged_index_replicated_offset: usize,
}

#[derive(Default)]
struct OffsetVisitor {
    last_field: Option<String>,
    highest_cycle_offset: Option<usize>,
    lowest_cycle_offset: Option<usize>,
    mod_count_offset: Option<usize>,
    write_lock_offset: Option<usize>,
    last_index_replicated_offset: Option<usize>,
    last_acknowledged_index_replicated_offset: Option<usize>,
}

impl WireVisitor for OffsetVisitor {
    fn field_name(&mut self, name: &str) {
        self.last_field = Some(name.to_string());
    }

    fn ptr_u64(&mut self, offset: usize) {
        match self.last_field.as_deref() {
            Some("highestCycle") => self.highest_cycle_offset = Some(offset),
            Some("lowestCycle") => self.lowest_cycle_offset = Some(offset),
            Some("modCount") => self.mod_count_offset = Some(offset),
            Some("chronicle.write.lock") => self.write_lock_offset = Some(offset),
            Some("chronicle.lastIndexReplicated") => self.last_index_replicated_offset = Some(offset),
            Some("chronicle.lastAcknowledgedIndexReplicated") => {
                self.last_acknowledged_index_replicated_offset = Some(offset)
            }
            _ => {}
        }
    }
}

impl DirListing {
    pub fn create(path: &Path) -> Result<Self> {
        let mut pad = WirePad::new();
        let mark = pad.record_start();
        let highest_cycle_offset = pad.field_uint64_aligned("highestCycle", NONE_CYCLE as u64);
        let lowest_cycle_offset = pad.field_uint64_aligned("lowestCycle", NONE_CYCLE as u64);
        let mod_count_offset = pad.field_uint64_aligned("modCount", 0);
        let write_lock_offset = pad.field_uint64_aligned("chronicle.write.lock", UNSET);
        let last_index_replicated_offset =
            pad.field_uint64_aligned("chronicle.lastIndexReplicated", UNSET);
        let last_acknowledged_index_replicated_offset =
            pad.field_uint64_aligned("chronicle.lastAcknowledgedIndexReplicated", UNSET);
        pad.field_varint("deltaCheckpointInterval", crate::DELTA_CHECKPOINT_INTERVAL);
        pad.field_varint("sourceId", crate::SOURCE_ID);
        pad.record_finish_metadata(mark);
        let bytes = pad.into_bytes();
        assert!(bytes.len() <= FILE_LEN, "directory-listing record overflowed its fixed extent");

        let mut window = MappedWindowMut::create(path, FILE_LEN as u64, FILE_LEN)
            .map_err(|source| ChronicleError::Mmap {
                path: path.to_path_buf(),
                source,
            })?;
        window.as_slice_mut()[..bytes.len()].copy_from_slice(&bytes);

        Ok(Self {
            path: path.to_path_buf(),
            window,
            highest_cycle_offset,
            lowest_cycle_offset,
            mod_count_offset,
            write_lock_offset,
            last_index_replicated_offset,
            last_acknowledged_index_replicated_offset,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let window =
            MappedWindowMut::open(path, 0, FILE_LEN).map_err(|source| ChronicleError::Mmap {
                path: path.to_path_buf(),
                source,
            })?;
        let mut visitor = OffsetVisitor::default();
        parse(window.as_slice(), &mut visitor)?;
        let (
            Some(highest_cycle_offset),
            Some(lowest_cycle_offset),
            Some(mod_count_offset),
            Some(write_lock_offset),
            Some(last_index_replicated_offset),
            Some(last_acknowledged_index_replicated_offset),
        ) = (
            visitor.highest_cycle_offset,
            visitor.lowest_cycle_offset,
            visitor.mod_count_offset,
            visitor.write_lock_offset,
            visitor.last_index_replicated_offset,
            visitor.last_acknowledged_index_replicated_offset,
        )
        else {
            return Err(ChronicleError::CorruptDirectoryListing);
        };
        Ok(Self {
            path: path.to_path_buf(),
            window,
            highest_cycle_offset,
            lowest_cycle_offset,
            mod_count_offset,
            write_lock_offset,
            last_index_replicated_offset,
            last_acknowledged_index_replicated_offset,
        })
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cell(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: `offset` was recorded by `WirePad::uint64_aligned` (create)
        // or recovered from the same layout via `ptr_u64` (open), and always
        // names an 8-byte-aligned, in-bounds cell within `window`.
        unsafe { AtomicU64::from_ptr(self.window.as_ptr().add(offset) as *mut u64) }
    }

    pub fn highest_cycle(&self) -> Option<i64> {
        let v = self.cell(self.highest_cycle_offset).load(Ordering::SeqCst) as i64;
        (v != NONE_CYCLE).then_some(v)
    }

    pub fn lowest_cycle(&self) -> Option<i64> {
        let v = self.cell(self.lowest_cycle_offset).load(Ordering::SeqCst) as i64;
        (v != NONE_CYCLE).then_some(v)
    }

    pub fn mod_count(&self) -> u64 {
        self.cell(self.mod_count_offset).load(Ordering::SeqCst)
    }

    /// Advances `highestCycle` to `cycle` if it is greater than the current
    /// value (or unset), bumping `modCount` with a lock-prefixed add so
    /// concurrent tailers polling it observe the change.
    pub fn advance_highest_cycle(&self, cycle: i64) {
        let cell = self.cell(self.highest_cycle_offset);
        loop {
            let current = cell.load(Ordering::SeqCst) as i64;
            if current != NONE_CYCLE && current >= cycle {
                return;
            }
            let desired = cycle as u64;
            if cell
                .compare_exchange(
                    current as u64,
                    desired,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.cell(self.mod_count_offset).fetch_add(1, Ordering::SeqCst);
                return;
            }
        }
    }

    pub fn ensure_lowest_cycle(&self, cycle: i64) {
        let cell = self.cell(self.lowest_cycle_offset);
        loop {
            let current = cell.load(Ordering::SeqCst) as i64;
            if current != NONE_CYCLE && current <= cycle {
                return;
            }
            let desired = cycle as u64;
            if cell
                .compare_exchange(
                    current as u64,
                    desired,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Claims the whole-queue write lock for `pid`, returning `false` if
    /// another process already holds it.
    pub fn try_lock_write(&self, pid: u32) -> bool {
        self.cell(self.write_lock_offset)
            .compare_exchange(UNSET, pid as u64, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the write lock held by `pid`; a no-op if `pid` does not
    /// currently hold it.
    pub fn unlock_write(&self, pid: u32) {
        let _ = self.cell(self.write_lock_offset).compare_exchange(
            pid as u64,
            UNSET,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn write_lock_holder(&self) -> Option<u32> {
        let v = self.cell(self.write_lock_offset).load(Ordering::SeqCst);
        (v != UNSET).then_some(v as u32)
    }

    pub fn last_index_replicated(&self) -> Option<u64> {
        let v = self.cell(self.last_index_replicated_offset).load(Ordering::SeqCst);
        (v != UNSET).then_some(v)
    }

    pub fn set_last_index_replicated(&self, index: u64) {
        self.cell(self.last_index_replicated_offset).store(index, Ordering::SeqCst);
    }

    pub fn last_acknowledged_index_replicated(&self) -> Option<u64> {
        let v = self
            .cell(self.last_acknowledged_index_replicated_offset)
            .load(Ordering::SeqCst);
        (v != UNSET).then_some(v)
    }

    pub fn set_last_acknowledged_index_replicated(&self, index: u64) {
        self.cell(self.last_acknowledged_index_replicated_offset)
            .store(index, Ordering::SeqCst);
    }
}
