use std::cell::Cell;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use super::error::TpsError;

/// Random-access byte reader over a whole file, mapped as a contiguous
/// image. All positions are absolute file offsets.
///
/// Mirrors the reference implementation's `mmap.mmap(fd, 0)` plus its
/// stateful `seek`/`read` pair: a caller may pass an explicit position or
/// rely on the internal cursor left by the previous read.
pub struct ByteSource {
    mmap: Mmap,
    cursor: Cell<u64>,
}

impl ByteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TpsError> {
        let path: PathBuf = path.as_ref().to_owned();
        if !path.is_file() {
            return Err(TpsError::NotFound(path));
        }
        let file = File::open(&path)?;
        // SAFETY: the file is opened read-only and the map is never handed
        // out as mutable; concurrent external writers could in principle
        // invalidate pages, but the core treats the file as immutable for
        // the handle's lifetime per spec.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(ByteSource {
            mmap,
            cursor: Cell::new(0),
        })
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn seek(&self, pos: u64) {
        self.cursor.set(pos);
    }

    pub fn tell(&self) -> u64 {
        self.cursor.get()
    }

    /// Reads `size` bytes starting at `pos` (or the cursor, if `pos` is
    /// `None`), advancing the cursor past the read region.
    pub fn read(&self, size: usize, pos: Option<u64>) -> Result<&[u8], TpsError> {
        let start = pos.unwrap_or_else(|| self.cursor.get());
        let end = start
            .checked_add(size as u64)
            .ok_or_else(|| TpsError::Io("read range overflow".into()))?;
        if end > self.len() {
            return Err(TpsError::Io(format!(
                "read [{start}, {end}) out of range for file of length {}",
                self.len()
            )));
        }
        self.cursor.set(end);
        Ok(&self.mmap[start as usize..end as usize])
    }
}

impl std::ops::Index<std::ops::Range<usize>> for ByteSource {
    type Output = [u8];

    fn index(&self, index: std::ops::Range<usize>) -> &[u8] {
        &self.mmap[index]
    }
}
