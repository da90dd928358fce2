//! Record header decode/CAS: the 32-bit little-endian word at the start of
//! every record in a cycle file, and the lock-free single-writer-per-slot
//! protocol built on it.

use chronicle_wire::{HD_EOF, HD_MASK_LENGTH, HD_MASK_META, HD_METADATA, HD_UNALLOCATED, HD_WORKING};
use std::sync::atomic::{AtomicU32, Ordering, fence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unallocated,
    /// Another writer (or this one) holds the slot; `pid` is whatever was
    /// packed into the low 30 bits when the slot was claimed.
    Working { pid: u32 },
    Metadata { len: u32 },
    Eof,
    Data { len: u32 },
}

pub fn decode(word: u32) -> HeaderState {
    if word == HD_UNALLOCATED {
        return HeaderState::Unallocated;
    }
    match word & HD_MASK_META {
        HD_WORKING => HeaderState::Working {
            pid: word & HD_MASK_LENGTH,
        },
        HD_METADATA => HeaderState::Metadata {
            len: word & HD_MASK_LENGTH,
        },
        HD_EOF => HeaderState::Eof,
        _ => HeaderState::Data {
            len: word & HD_MASK_LENGTH,
        },
    }
}

/// Reads the header word at byte `offset` within the mapped region starting
/// at `base`, with a full fence around the load so a subsequent read of the
/// record body is guaranteed to see a writer's prior stores.
///
/// # Safety
/// `base` must point to a live mapping of at least `offset + 4` bytes.
pub unsafe fn read_header(base: *const u8, offset: usize) -> u32 {
    let atomic = unsafe { AtomicU32::from_ptr(base.add(offset) as *mut u32) };
    let word = atomic.load(Ordering::Acquire);
    fence(Ordering::SeqCst);
    word
}

/// Attempts to claim an `Unallocated` slot as `Working` for `pid`, the
/// single compare-and-swap at the heart of the append protocol. Returns
/// `Ok(())` on success, or `Err(current)` with the header's actual current
/// value when the CAS lost the race.
///
/// # Safety
/// `base` must point to a live, writable mapping of at least `offset + 4`
/// bytes that is not concurrently mutated by safe Rust aliases.
pub unsafe fn try_claim_working(base: *mut u8, offset: usize, pid: u32) -> Result<(), u32> {
    let atomic = unsafe { AtomicU32::from_ptr(base.add(offset) as *mut u32) };
    let desired = HD_WORKING | (pid & HD_MASK_LENGTH);
    atomic
        .compare_exchange(
            HD_UNALLOCATED,
            desired,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .map(|_| ())
}

/// Writes the final header word for a slot this writer already holds as
/// `Working`, publishing the record body written before this call. A full
/// fence precedes the store so every byte of the body is visible to any
/// reader that subsequently observes the new header.
///
/// # Safety
/// Same as [`try_claim_working`]; the caller must currently hold the slot.
pub unsafe fn commit(base: *mut u8, offset: usize, pattern: u32, len: u32) {
    let atomic = unsafe { AtomicU32::from_ptr(base.add(offset) as *mut u32) };
    fence(Ordering::SeqCst);
    atomic.store(pattern | (len & HD_MASK_LENGTH), Ordering::Release);
}

/// Writes a standalone EOF marker at `offset`, unconditionally.
///
/// # Safety
/// Same as [`try_claim_working`].
pub unsafe fn write_eof(base: *mut u8, offset: usize) {
    let atomic = unsafe { AtomicU32::from_ptr(base.add(offset) as *mut u32) };
    atomic.store(HD_EOF, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_header_state() {
        assert_eq!(decode(HD_UNALLOCATED), HeaderState::Unallocated);
        assert_eq!(decode(HD_WORKING | 42), HeaderState::Working { pid: 42 });
        assert_eq!(decode(HD_METADATA | 16), HeaderState::Metadata { len: 16 });
        assert_eq!(decode(HD_EOF), HeaderState::Eof);
        assert_eq!(decode(128), HeaderState::Data { len: 128 });
    }

    #[test]
    fn claim_then_commit_round_trips_through_decode() {
        let mut word = [0u8; 4];
        unsafe {
            try_claim_working(word.as_mut_ptr(), 0, 777).unwrap();
            let raw = u32::from_le_bytes(word);
            assert_eq!(decode(raw), HeaderState::Working { pid: 777 });

            commit(word.as_mut_ptr(), 0, HD_UNALLOCATED, 64);
            let raw = u32::from_le_bytes(word);
            assert_eq!(decode(raw), HeaderState::Data { len: 64 });
        }
    }

    #[test]
    fn second_claim_on_already_working_slot_fails() {
        let mut word = [0u8; 4];
        unsafe {
            try_claim_working(word.as_mut_ptr(), 0, 1).unwrap();
            let err = try_claim_working(word.as_mut_ptr(), 0, 2).unwrap_err();
            assert_eq!(decode(err), HeaderState::Working { pid: 1 });
        }
    }
}
