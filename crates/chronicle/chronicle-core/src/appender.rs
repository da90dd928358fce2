//! Appender engine: claims a record slot with a single compare-and-swap,
//! writes the payload, then publishes it by rewriting the header with the
//! final length. On losing a race it spins on the contended slot; running
//! off the end of the current mapping extends the mapping and retries —
//! this process never blocks on another writer's completion by waiting on
//! anything but the header word itself.

use crate::dirlisting::DirListing;
use crate::error::{ChronicleError, Result};
use crate::parser::{self, RecordOutcome};
use crate::{Encoder, WINDOW_BLOCKSIZE, header, make_index};
use chronicle_mmap::MappedWindowMut;
use chronicle_roll::RollScheme;
use chronicle_wire::WirePad;
use std::path::{Path, PathBuf};

pub struct Appender<'a> {
    dir: PathBuf,
    roll: &'a RollScheme,
    dirlisting: &'a DirListing,
    pid: u32,
    cycle: i64,
    version: u32,
    window: MappedWindowMut,
    pos: usize,
    seq: u64,
}

fn cycle_file_path(dir: &Path, roll: &RollScheme, cycle: i64) -> Result<PathBuf> {
    let name = roll
        .filename_for_cycle(cycle)
        .map_err(|_| ChronicleError::UnknownRollScheme(roll.name.to_string()))?;
    Ok(dir.join(format!("{name}.cq4")))
}

fn cycle_header_bytes(roll: &RollScheme, version: u32) -> Vec<u8> {
    let mut pad = WirePad::new();
    let mark = pad.record_start();
    pad.field_varint("version", version as i64);
    pad.field_text("rollScheme", roll.name);
    pad.record_finish_metadata(mark);
    pad.into_bytes()
}

impl<'a> Appender<'a> {
    pub fn open(
        dir: &Path,
        roll: &'a RollScheme,
        dirlisting: &'a DirListing,
        cycle: i64,
        version: u32,
    ) -> Result<Self> {
        let path = cycle_file_path(dir, roll, cycle)?;
        let is_new = !path.exists();
        let mut window = if is_new {
            // The file starts at one window's worth of bytes and grows in
            // doubling steps as records need more room, up to the fixed
            // extent — it is never pre-allocated to the full extent
            // up front.
            MappedWindowMut::create(&path, WINDOW_BLOCKSIZE as u64, WINDOW_BLOCKSIZE)
        } else {
            MappedWindowMut::open(&path, 0, WINDOW_BLOCKSIZE)
        }
        .map_err(|source| ChronicleError::Mmap { path: path.clone(), source })?;

        if is_new {
            let header_bytes = cycle_header_bytes(roll, version);
            window.as_slice_mut()[..header_bytes.len()].copy_from_slice(&header_bytes);
        }

        dirlisting.advance_highest_cycle(cycle);
        dirlisting.ensure_lowest_cycle(cycle);

        let mut appender = Self {
            dir: dir.to_path_buf(),
            roll,
            dirlisting,
            pid: std::process::id(),
            cycle,
            version,
            window,
            pos: 0,
            seq: 0,
        };
        appender.seek_to_end()?;
        Ok(appender)
    }

    /// Walks from the start of the file to the first `AwaitingEntry` slot,
    /// counting data records along the way so freshly opened appenders
    /// (including a second process opening the same cycle file) resume the
    /// sequence numbering where the last writer left off.
    fn seek_to_end(&mut self) -> Result<()> {
        loop {
            self.ensure_mapped(self.pos + 4)?;
            let outcome = unsafe { parser::parse_at(self.window.as_ptr(), self.window.len(), self.pos) };
            match outcome {
                RecordOutcome::AwaitingEntry => return Ok(()),
                RecordOutcome::ReachedEof => return Ok(()),
                RecordOutcome::NeedExtend => {
                    self.ensure_mapped(self.pos + 4 + WINDOW_BLOCKSIZE)?;
                }
                RecordOutcome::Busy => std::hint::spin_loop(),
                RecordOutcome::Metadata { body_offset, len } => {
                    self.pos = parser::next_position(body_offset, len, self.version);
                }
                RecordOutcome::Data { body_offset, len } => {
                    self.seq += 1;
                    self.pos = parser::next_position(body_offset, len, self.version);
                }
            }
        }
    }

    fn path(&self) -> Result<PathBuf> {
        cycle_file_path(&self.dir, self.roll, self.cycle)
    }

    fn ensure_mapped(&mut self, needed_end: usize) -> Result<()> {
        if needed_end <= self.window.len() {
            return Ok(());
        }
        let mut new_len = self.window.len().max(WINDOW_BLOCKSIZE);
        while new_len < needed_end {
            new_len *= 2;
        }
        let new_len = new_len.min(crate::CYCLE_FILE_EXTENT as usize);
        let path = self.path().unwrap_or_default();
        let current_file_len = self
            .window
            .file_len()
            .map_err(|source| ChronicleError::Mmap { path: path.clone(), source })?;
        if (new_len as u64) > current_file_len {
            self.window
                .extend_file(new_len as u64)
                .map_err(|source| ChronicleError::Mmap { path: path.clone(), source })?;
        }
        if new_len > self.window.len() {
            self.window
                .remap(0, new_len)
                .map_err(|source| ChronicleError::Mmap { path, source })?;
        }
        Ok(())
    }

    /// Appends `payload`, returning its index (cycle in the high bits,
    /// zero-based per-cycle sequence number in the low bits).
    pub fn append<E: Encoder>(&mut self, payload: E) -> Result<u64> {
        let len = payload.encoded_len();
        if len as u32 as usize != len {
            return Err(ChronicleError::PayloadTooLarge);
        }

        loop {
            self.ensure_mapped(self.pos + 4)?;
            let outcome = unsafe { parser::parse_at(self.window.as_ptr(), self.window.len(), self.pos) };
            match outcome {
                RecordOutcome::NeedExtend => {
                    self.ensure_mapped(self.pos + 4 + len.max(WINDOW_BLOCKSIZE))?;
                    continue;
                }
                RecordOutcome::Busy => {
                    std::hint::spin_loop();
                    continue;
                }
                RecordOutcome::Metadata { body_offset, len } => {
                    self.pos = parser::next_position(body_offset, len, self.version);
                    continue;
                }
                RecordOutcome::Data { body_offset, len } => {
                    self.seq += 1;
                    self.pos = parser::next_position(body_offset, len, self.version);
                    continue;
                }
                RecordOutcome::ReachedEof => return Err(ChronicleError::ContentionTimeout),
                RecordOutcome::AwaitingEntry => {
                    let claim = unsafe {
                        header::try_claim_working(self.window.as_mut_ptr(), self.pos, self.pid)
                    };
                    if claim.is_err() {
                        continue; // another writer won the slot; re-read it next iteration
                    }
                    self.ensure_mapped(self.pos + 4 + len)?;
                    let body_offset = self.pos + 4;
                    payload.encode_into(&mut self.window.as_slice_mut()[body_offset..body_offset + len]);
                    unsafe {
                        header::commit(self.window.as_mut_ptr(), self.pos, 0, len as u32);
                    }
                    let index = make_index(self.cycle, self.seq);
                    self.seq += 1;
                    self.pos = parser::next_position(body_offset, len as u32, self.version);
                    return Ok(index);
                }
            }
        }
    }

    /// Patches a standalone EOF marker into the first unclaimed slot from the
    /// current position onward, unless one is already there. Called on the
    /// *previous* highest cycle once an append into a newly rolled cycle has
    /// already succeeded — never speculatively, so a writer that never
    /// actually rolls never leaves a premature EOF behind.
    pub fn write_eof_marker(&mut self) -> Result<()> {
        loop {
            self.ensure_mapped(self.pos + 4)?;
            let outcome = unsafe { parser::parse_at(self.window.as_ptr(), self.window.len(), self.pos) };
            match outcome {
                RecordOutcome::NeedExtend => {
                    self.ensure_mapped(self.pos + 4 + WINDOW_BLOCKSIZE)?;
                }
                RecordOutcome::Busy => std::hint::spin_loop(),
                RecordOutcome::Metadata { body_offset, len } => {
                    self.pos = parser::next_position(body_offset, len, self.version);
                }
                RecordOutcome::Data { body_offset, len } => {
                    self.seq += 1;
                    self.pos = parser::next_position(body_offset, len, self.version);
                }
                RecordOutcome::ReachedEof => return Ok(()),
                RecordOutcome::AwaitingEntry => {
                    let claim = unsafe {
                        header::try_claim_working(self.window.as_mut_ptr(), self.pos, self.pid)
                    };
                    if claim.is_err() {
                        continue;
                    }
                    unsafe {
                        header::write_eof(self.window.as_mut_ptr(), self.pos);
                    }
                    return Ok(());
                }
            }
        }
    }
}
