//! Raw mmap operations on explicit addresses.
//!
//! `memmap2` covers the ordinary "map this file somewhere" case, but the
//! mirror needs placement control: an anonymous reservation followed by
//! `MAP_FIXED` file mappings inside it. These wrappers speak raw addresses
//! so the mirror module can do that arithmetic once, in one place.

use super::MapError;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// Reserve `len` bytes of address space with no backing permissions.
///
/// The span is inaccessible until parts of it are replaced with real
/// mappings via [`map_fixed`].
pub(crate) fn reserve(len: usize) -> Result<NonNull<u8>, MapError> {
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(MapError::Reserve(io::Error::last_os_error()));
    }
    Ok(NonNull::new(addr as *mut u8).unwrap())
}

/// Replace `[addr, addr + len)` with a shared read-write mapping of `file`
/// starting at `offset`.
///
/// The kernel must honor the address exactly; a mapping that lands anywhere
/// else fails with [`MapError::Split`].
pub(crate) fn map_fixed(
    addr: NonNull<u8>,
    len: usize,
    file: &File,
    offset: u64,
) -> Result<(), MapError> {
    let got = unsafe {
        libc::mmap(
            addr.as_ptr().cast(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            file.as_raw_fd(),
            offset as libc::off_t,
        )
    };
    if got == libc::MAP_FAILED {
        return Err(MapError::Map(io::Error::last_os_error()));
    }
    if got as *mut u8 != addr.as_ptr() {
        // MAP_FIXED should make this impossible, but a kernel that moved
        // the mapping has torn the mirror apart; unwind it.
        unsafe { libc::munmap(got, len) };
        return Err(MapError::Split);
    }
    Ok(())
}

/// Release the mapping covering `[addr, addr + len)`.
pub(crate) fn unmap(addr: NonNull<u8>, len: usize) -> Result<(), MapError> {
    if unsafe { libc::munmap(addr.as_ptr().cast(), len) } != 0 {
        return Err(MapError::Unmap(io::Error::last_os_error()));
    }
    Ok(())
}
