//! Chronicle-queue-compatible append-only message log: a memory-mapped,
//! lock-free, cross-process log directory with no broker or daemon in the
//! write or read path.
//!
//! A [`Queue`] owns a directory of cycle files plus a directory-listing
//! file; [`Queue::tailer`] and [`Queue::append`] are the two ways in and out.
//! There is no background thread: every operation runs on the caller's
//! thread, synchronizing with other processes purely through the mapped
//! memory.

pub mod error;
pub mod header;
pub mod parser;

mod appender;
mod dirlisting;
mod queue;
mod tailer;

pub use error::{ChronicleError, Result};
pub use queue::{Queue, QueueBuilder};
pub use tailer::Tailer;

/// The fixed on-disk size every cycle file is created at and extended to in
/// fixed steps (never pre-allocated any larger).
pub const CYCLE_FILE_EXTENT: u64 = 83_754_496;

/// Default count of bytes an appender or tailer maps at once; the live
/// mapping window is `2 * WINDOW_BLOCKSIZE` bytes, doubled when a `NeedExtend`
/// recurs at the very first header of a freshly widened window.
pub const WINDOW_BLOCKSIZE: usize = 1024 * 1024;

/// Constant cells carried in the directory-listing file for byte
/// compatibility with installations that read them; this implementation
/// does not otherwise interpret them.
pub const DELTA_CHECKPOINT_INTERVAL: i64 = 64;
pub const SOURCE_ID: i64 = 0;

/// On-disk queue format version this implementation writes and reads.
pub const QUEUE_VERSION: u32 = 5;

/// An index packs a cycle number into the high bits and a per-cycle,
/// zero-based data-record sequence number into the low bits.
pub const CYCLE_SHIFT: u32 = 32;
pub const SEQNUM_MASK: u64 = (1u64 << CYCLE_SHIFT) - 1;

pub fn make_index(cycle: i64, seq: u64) -> u64 {
    ((cycle as u64) << CYCLE_SHIFT) | (seq & SEQNUM_MASK)
}

pub fn index_cycle(index: u64) -> i64 {
    (index >> CYCLE_SHIFT) as i64
}

pub fn index_seq(index: u64) -> u64 {
    index & SEQNUM_MASK
}

/// Caller-supplied payload encoder: given a destination buffer exactly
/// [`Encoder::encoded_len`] bytes long, write the payload into it.
pub trait Encoder {
    fn encoded_len(&self) -> usize;
    fn encode_into(&self, buf: &mut [u8]);
}

impl Encoder for &[u8] {
    fn encoded_len(&self) -> usize {
        self.len()
    }
    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }
}

impl Encoder for Vec<u8> {
    fn encoded_len(&self) -> usize {
        self.len()
    }
    fn encode_into(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }
}

/// Caller-supplied payload decoder, parameterized over the value it produces.
pub trait Decoder<T> {
    fn decode(&self, buf: &[u8]) -> Result<T>;
}

/// A decoder that copies the raw record bytes out as an owned `Vec<u8>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawDecoder;

impl Decoder<Vec<u8>> for RawDecoder {
    fn decode(&self, buf: &[u8]) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

/// One record handed back from a tailer: the decoded value, its size on the
/// wire, and its index within the queue.
#[derive(Debug, Clone)]
pub struct Collected<T> {
    pub value: T,
    pub size: usize,
    pub index: u64,
}
