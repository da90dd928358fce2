//! Tailer engine: walks forward through cycle files collecting data
//! records, skipping metadata records and busy/unallocated slots, and
//! rolling over to the next cycle file on EOF.

use crate::dirlisting::DirListing;
use crate::error::{ChronicleError, Result};
use crate::parser::{self, RecordOutcome};
use crate::{Collected, Decoder, WINDOW_BLOCKSIZE, make_index};
use chronicle_mmap::MappedWindow;
use chronicle_roll::RollScheme;
use std::path::{Path, PathBuf};

/// How many cycles behind `highestCycle` a tailer will fast-forward past
/// before giving up and reporting no data, trading replay compatibility
/// against scanning every empty cycle since the dawn of the queue.
pub const DEFAULT_PATCH_CYCLES: i64 = 3;

pub struct Tailer<'a> {
    dir: PathBuf,
    roll: &'a RollScheme,
    dirlisting: &'a DirListing,
    patch_cycles: i64,
    cycle: i64,
    version: u32,
    window: Option<MappedWindow>,
    pos: usize,
    seq: u64,
}

fn cycle_file_path(dir: &Path, roll: &RollScheme, cycle: i64) -> Result<PathBuf> {
    let name = roll
        .filename_for_cycle(cycle)
        .map_err(|_| ChronicleError::UnknownRollScheme(roll.name.to_string()))?;
    Ok(dir.join(format!("{name}.cq4")))
}

impl<'a> Tailer<'a> {
    pub fn from_start(dir: &Path, roll: &'a RollScheme, dirlisting: &'a DirListing, version: u32) -> Self {
        let cycle = dirlisting.lowest_cycle().unwrap_or(0);
        Self {
            dir: dir.to_path_buf(),
            roll,
            dirlisting,
            patch_cycles: DEFAULT_PATCH_CYCLES,
            cycle,
            version,
            window: None,
            pos: 0,
            seq: 0,
        }
    }

    pub fn from_cycle(
        dir: &Path,
        roll: &'a RollScheme,
        dirlisting: &'a DirListing,
        cycle: i64,
        version: u32,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            roll,
            dirlisting,
            patch_cycles: DEFAULT_PATCH_CYCLES,
            cycle,
            version,
            window: None,
            pos: 0,
            seq: 0,
        }
    }

    pub fn with_patch_cycles(mut self, patch_cycles: i64) -> Self {
        self.patch_cycles = patch_cycles;
        self
    }

    fn ensure_window(&mut self) -> Result<bool> {
        if self.window.is_some() {
            return Ok(true);
        }
        let path = cycle_file_path(&self.dir, self.roll, self.cycle)?;
        if !path.exists() {
            return Ok(false);
        }
        let window = MappedWindow::open(&path, 0, WINDOW_BLOCKSIZE)
            .map_err(|source| ChronicleError::Mmap { path, source })?;
        self.window = Some(window);
        Ok(true)
    }

    fn extend_window(&mut self, needed_end: usize) -> Result<()> {
        let path = cycle_file_path(&self.dir, self.roll, self.cycle).unwrap_or_default();
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };
        let file_len = window
            .file_len()
            .map_err(|source| ChronicleError::Mmap { path: path.clone(), source })?;
        let mut new_len = window.len().max(WINDOW_BLOCKSIZE);
        while (new_len as u64) < file_len && new_len < needed_end {
            new_len *= 2;
        }
        let new_len = (new_len as u64).min(file_len) as usize;
        if new_len > window.len() {
            window
                .remap(0, new_len)
                .map_err(|source| ChronicleError::Mmap { path, source })?;
        }
        Ok(())
    }

    fn advance_cycle(&mut self) -> bool {
        let highest = self.dirlisting.highest_cycle().unwrap_or(self.cycle);
        if self.cycle >= highest {
            return false;
        }
        self.cycle += 1;
        self.window = None;
        self.pos = 0;
        self.seq = 0;
        true
    }

    /// Collects the next available data record, or `None` if the tailer has
    /// caught up to the live edge of the queue.
    pub fn collect<T>(&mut self, decoder: &impl Decoder<T>) -> Result<Option<Collected<T>>> {
        loop {
            if !self.ensure_window()? {
                if self.advance_cycle() {
                    continue;
                }
                return Ok(None);
            }
            let window = self.window.as_ref().unwrap();
            let outcome = unsafe { parser::parse_at(window.as_ptr(), window.len(), self.pos) };
            match outcome {
                RecordOutcome::AwaitingEntry => {
                    // An unallocated slot this far behind the live edge is
                    // almost certainly an abandoned cycle that never got its
                    // EOF marker (the writer crashed, or raced a roll before
                    // patching it in). Skip it rather than stall the tailer
                    // forever on a file nothing will ever append to again.
                    let highest = self.dirlisting.highest_cycle().unwrap_or(self.cycle);
                    if highest - self.cycle > self.patch_cycles && self.advance_cycle() {
                        continue;
                    }
                    return Ok(None);
                }
                RecordOutcome::Busy => return Ok(None),
                RecordOutcome::NeedExtend => {
                    self.extend_window(self.pos + 4 + WINDOW_BLOCKSIZE)?;
                    let window = self.window.as_ref().unwrap();
                    if self.pos + 4 > window.len() {
                        return Ok(None); // caught up to the live edge mid-header
                    }
                    continue;
                }
                RecordOutcome::ReachedEof => {
                    if self.advance_cycle() {
                        continue;
                    }
                    return Ok(None);
                }
                RecordOutcome::Metadata { body_offset, len } => {
                    self.pos = parser::next_position(body_offset, len, self.version);
                    continue;
                }
                RecordOutcome::Data { body_offset, len } => {
                    let window = self.window.as_ref().unwrap();
                    let body = &window.as_slice()[body_offset..body_offset + len as usize];
                    let value = decoder.decode(body)?;
                    let index = make_index(self.cycle, self.seq);
                    self.seq += 1;
                    self.pos = parser::next_position(body_offset, len, self.version);
                    return Ok(Some(Collected {
                        value,
                        size: len as usize,
                        index,
                    }));
                }
            }
        }
    }

    /// Repeatedly collects records, invoking `f` with each record's index
    /// and raw bytes, until the tailer catches up to the live edge.
    pub fn peek_dispatch(&mut self, mut f: impl FnMut(u64, &[u8])) -> Result<()> {
        use crate::RawDecoder;
        while let Some(collected) = self.collect(&RawDecoder)? {
            f(collected.index, &collected.value);
        }
        Ok(())
    }

    pub fn cycle(&self) -> i64 {
        self.cycle
    }
}
