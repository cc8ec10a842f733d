//! Ringfile - a persistent, record-oriented ring buffer backed by a
//! regular file.
//!
//! # Overview
//!
//! A [`Ring`] stores variable-length byte records in a file and hands them
//! back in insertion order, overwriting the oldest records when the writer
//! outruns the reader. The data region of the file is mapped twice,
//! back-to-back, into one contiguous virtual span, so every record is a
//! flat slice of memory even when it straddles the wrap point; reads and
//! writes are single copies with no split handling anywhere above the map
//! layer.
//!
//! # Key Features
//!
//! - Memory-mapped I/O with a mirrored data region for wrap-free framing
//! - Oldest-first overwrite: writes never fail for lack of space
//! - Optional header page persisting the read/write cursor across reopens
//! - Caller-defined header layouts via a cursor locator callback
//! - Blocking reads with a single-slot wakeup for pipe-like use
//! - Thread-safe: one mutex, shareable across threads
//!
//! # Usage
//!
//! Size the backing file to a multiple of [`page_size`] (plus one page
//! when reserving a header), then open it:
//!
//! ```no_run
//! use ringfile::{Ring, RingOptions};
//!
//! # fn main() -> ringfile::Result<()> {
//! let ring = Ring::open_with_options(
//!     "events.ring",
//!     RingOptions {
//!         reserve_header: true,
//!         ..Default::default()
//!     },
//! )?;
//!
//! ring.write(b"hello")?;
//! let mut buf = [0u8; 64];
//! let n = ring.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! Records are framed with a native machine-word length prefix, so
//! persisted files are not portable across machines with a different word
//! size or byte order.
//!
//! This crate is Unix-only: the mirror needs fixed-address shared file
//! mappings.

#![cfg(unix)]
#![deny(missing_docs)]

mod mmap;
mod ring;

pub use mmap::page_size;
pub use mmap::MapError;
pub use ring::buffer::Ring;
pub use ring::{frame_len, Cursor, CursorLocator, Result, RingError, RingOptions, PREFIX};
