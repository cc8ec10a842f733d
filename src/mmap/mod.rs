//! Platform memory-map layer
//!
//! This module wraps the small set of virtual-memory capabilities the ring
//! needs and nothing more:
//!
//! - Reserving a span of address space with no access permissions
//! - Replacing a reserved span with a shared file mapping at a fixed address
//! - Unmapping a span
//! - Querying the native page size
//!
//! Everything above this layer works with typed spans; raw address
//! arithmetic stays in here. The interesting consumer is the mirror map,
//! which maps the same file region twice back-to-back so the ring becomes
//! flat-addressable across its wrap point.

pub mod mirror;
pub(crate) mod region;

use once_cell::sync::OnceCell;
use std::io;
use thiserror::Error;

/// Errors raised by the map layer.
#[derive(Error, Debug)]
pub enum MapError {
    /// The anonymous address-space reservation failed.
    #[error("address space reservation failed: {0}")]
    Reserve(#[source] io::Error),
    /// A fixed file-backed mapping failed outright.
    #[error("fixed file mapping failed: {0}")]
    Map(#[source] io::Error),
    /// A fixed mapping succeeded but landed at a different address.
    #[error("fixed mapping did not land on the requested address")]
    Split,
    /// Unmapping a span failed.
    #[error("unmap failed: {0}")]
    Unmap(#[source] io::Error),
}

static PAGE_SIZE: OnceCell<usize> = OnceCell::new();

/// Size of virtual memory pages on this machine.
///
/// Backing files must be a multiple of this, and the optional header
/// occupies exactly one page.
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        assert!(ps > 0, "could not determine page size");
        ps as usize
    })
}
