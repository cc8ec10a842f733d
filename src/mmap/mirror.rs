//! The double-mapped ring region.
//!
//! A `MirrorMap` makes an `N`-byte file region appear twice, back-to-back,
//! in one contiguous `2N`-byte virtual span: the byte at virtual offset `v`
//! aliases the file byte at `v % N`. Any span `[o, o + k)` with `o < N` and
//! `k <= N` is therefore a single flat slice of memory even when it crosses
//! the wrap point, which is what lets the ring read and write whole frames
//! (length prefix included) with one copy each.
//!
//! Construction follows the classic trick: reserve `2N` bytes of anonymous
//! address space, then replace each half with a `MAP_FIXED` shared mapping
//! of the same file region. Either fixed mapping landing anywhere else
//! tears the mirror, so the addresses are verified and the whole thing is
//! unwound on any failure.

use super::{region, MapError};
use log::{debug, trace};
use std::fs::File;
use std::ptr::NonNull;

/// A `2N`-byte virtual span whose halves alias the same `N`-byte file
/// region. Read-write, shared with the file.
pub struct MirrorMap {
    base: NonNull<u8>,
    len: usize,
}

impl MirrorMap {
    /// Map `len` bytes of `file` starting at `offset` twice, back-to-back.
    ///
    /// `len` must be a positive multiple of the page size and `offset` page
    /// aligned; the caller checks both (the kernel would reject them with
    /// an opaque error otherwise).
    pub fn new(file: &File, offset: u64, len: usize) -> Result<Self, MapError> {
        let base = region::reserve(len << 1)?;

        if let Err(err) = region::map_fixed(base, len, file, offset) {
            let _ = region::unmap(base, len << 1);
            return Err(err);
        }

        let upper = unsafe { NonNull::new_unchecked(base.as_ptr().add(len)) };
        if let Err(err) = region::map_fixed(upper, len, file, offset) {
            let _ = region::unmap(base, len << 1);
            return Err(err);
        }

        debug!(
            "mirrored {} bytes at file offset {} into a {} byte span",
            len,
            offset,
            len << 1
        );
        Ok(Self { base, len })
    }

    /// Size of the underlying file region (`N`). The virtual span is twice
    /// this.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this map has already been torn down.
    pub fn is_unmapped(&self) -> bool {
        self.len == 0
    }

    /// Read the machine-word length prefix at virtual offset `off`.
    ///
    /// Frames land on arbitrary byte offsets, so the word is read
    /// unaligned.
    pub fn read_word(&self, off: usize) -> usize {
        debug_assert!(off + std::mem::size_of::<usize>() <= self.len << 1);
        unsafe { (self.base.as_ptr().add(off) as *const usize).read_unaligned() }
    }

    /// Write a machine word at virtual offset `off`.
    pub fn write_word(&self, off: usize, val: usize) {
        debug_assert!(off + std::mem::size_of::<usize>() <= self.len << 1);
        unsafe { (self.base.as_ptr().add(off) as *mut usize).write_unaligned(val) }
    }

    /// Copy `src` into the span starting at virtual offset `off`.
    pub fn copy_in(&self, off: usize, src: &[u8]) {
        debug_assert!(off + src.len() <= self.len << 1);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(off), src.len())
        }
    }

    /// Copy `dst.len()` bytes out of the span starting at virtual offset
    /// `off`.
    pub fn copy_out(&self, off: usize, dst: &mut [u8]) {
        debug_assert!(off + dst.len() <= self.len << 1);
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(off), dst.as_mut_ptr(), dst.len())
        }
    }

    /// Tear the mirror down: both halves, then the base reservation.
    ///
    /// Idempotent; the map is unusable afterwards.
    pub fn unmap(&mut self) -> Result<(), MapError> {
        if self.len == 0 {
            return Ok(());
        }
        let len = self.len;
        self.len = 0;

        let upper = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(len)) };
        region::unmap(self.base, len)?;
        region::unmap(upper, len)?;
        region::unmap(self.base, len << 1)?;
        trace!("unmapped {} byte mirror", len << 1);
        Ok(())
    }
}

impl Drop for MirrorMap {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

// The span is exclusively owned and all access goes through the owning
// ring's mutex.
unsafe impl Send for MirrorMap {}
