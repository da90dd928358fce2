//! Sliding-window mmap management over a single cycle file.
//!
//! Unlike a ring buffer that maps its backing file once for its entire
//! lifetime, a tailer or appender here must be able to remap to a different
//! `[offset, offset+length)` window as its `tip` advances past the edge of
//! what is currently mapped (§4.3). [`MappedWindow`] and [`MappedWindowMut`]
//! own the file handle and the current mapping, and `remap` replaces the
//! mapping in place without losing the handle.

use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Read-only mapped window into a file.
pub struct MappedWindow {
    file: File,
    mmap: Mmap,
    offset: u64,
}

/// Read-write mapped window into a file.
pub struct MappedWindowMut {
    file: File,
    mmap: MmapMut,
    offset: u64,
}

impl MappedWindow {
    pub fn open<P: AsRef<Path>>(path: P, offset: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = map_ro(&file, offset, len)?;
        Ok(Self { file, mmap, offset })
    }

    /// Replaces the current mapping with a new window over the same file.
    pub fn remap(&mut self, offset: u64, len: usize) -> io::Result<()> {
        self.mmap = map_ro(&self.file, offset, len)?;
        self.offset = offset;
        Ok(())
    }

    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl MappedWindowMut {
    /// Creates a new file of `size_bytes` (the fixed cycle-file extent) and
    /// maps its first `len` bytes read-write.
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        grow_to(&file, size_bytes)?;
        let mmap = map_rw(&file, 0, len)?;
        Ok(Self {
            file,
            mmap,
            offset: 0,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P, offset: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = map_rw(&file, offset, len)?;
        Ok(Self { file, mmap, offset })
    }

    pub fn remap(&mut self, offset: u64, len: usize) -> io::Result<()> {
        self.mmap = map_rw(&self.file, offset, len)?;
        self.offset = offset;
        Ok(())
    }

    /// Grows the backing file to `new_len_bytes` via `lseek` + a single
    /// one-byte write, matching the reference implementation's on-disk
    /// extend sequence rather than a plain `set_len` truncate-style resize.
    pub fn extend_file(&self, new_len_bytes: u64) -> io::Result<()> {
        grow_to(&self.file, new_len_bytes)
    }

    pub fn file_len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    #[inline]
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

fn map_ro(file: &File, offset: u64, len: usize) -> io::Result<Mmap> {
    unsafe { MmapOptions::new().offset(offset).len(len).map(file) }
}

fn map_rw(file: &File, offset: u64, len: usize) -> io::Result<MmapMut> {
    unsafe { MmapOptions::new().offset(offset).len(len).map_mut(file) }
}

fn grow_to(file: &File, new_len_bytes: u64) -> io::Result<()> {
    if new_len_bytes == 0 {
        return Ok(());
    }
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid, open file descriptor for the lifetime of `file`.
    let pos = unsafe { libc::lseek(fd, (new_len_bytes - 1) as libc::off_t, libc::SEEK_SET) };
    if pos < 0 {
        return Err(io::Error::last_os_error());
    }
    let zero: [u8; 1] = [0];
    // SAFETY: writing one byte at a valid seek position into an open fd.
    let written = unsafe { libc::write(fd, zero.as_ptr() as *const libc::c_void, 1) };
    if written != 1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_path(name: &str) -> String {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/tmp/chronicle_mmap_test_{name}_{ts}")
    }

    #[test]
    fn create_then_reopen_round_trips_bytes() {
        let path = tmp_path("roundtrip");
        {
            let mut mm = MappedWindowMut::create(&path, 4096, 4096).unwrap();
            unsafe {
                let p = mm.as_mut_ptr();
                *p.add(0) = 0xAB;
                *p.add(1) = 0xCD;
            }
        }
        {
            let mm = MappedWindow::open(&path, 0, 4096).unwrap();
            assert_eq!(mm.as_slice()[0], 0xAB);
            assert_eq!(mm.as_slice()[1], 0xCD);
        }
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn extend_file_grows_length_without_truncating_existing_bytes() {
        let path = tmp_path("extend");
        {
            let mut mm = MappedWindowMut::create(&path, 4096, 4096).unwrap();
            unsafe {
                *mm.as_mut_ptr() = 0x42;
            }
        }
        {
            let mm = MappedWindowMut::open(&path, 0, 4096).unwrap();
            mm.extend_file(8192).unwrap();
            assert_eq!(mm.file_len().unwrap(), 8192);
        }
        let mm = MappedWindow::open(&path, 0, 4096).unwrap();
        assert_eq!(mm.as_slice()[0], 0x42);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn remap_moves_window_to_new_offset() {
        let path = tmp_path("remap");
        let mut mm = MappedWindowMut::create(&path, 4096, 2048).unwrap();
        unsafe {
            *mm.as_mut_ptr().add(2000) = 0x7;
        }
        mm.remap(2048, 2048).unwrap();
        assert_eq!(mm.offset(), 2048);
        let _ = fs::remove_file(&path);
    }
}
