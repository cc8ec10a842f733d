//! Ring data model: cursor, frame layout, options, and errors.
//!
//! The types in here are the vocabulary the ring core speaks:
//!
//! - [`Cursor`] is the `(head, tail)` pair defining the live window
//! - Frames are a native-word length prefix followed by the payload
//! - [`RingOptions`] selects header persistence and blocking behavior
//! - [`RingError`] is the crate-wide error type
//!
//! The two small notifier primitives also live here: the single-slot
//! reader wakeup and the write gate that parks writers while writes are
//! administratively blocked.

pub mod buffer;

use crate::mmap::MapError;
use parking_lot::{Condvar, Mutex};
use std::io;
use thiserror::Error;

/// Width of the frame length prefix: one native machine word.
///
/// Persisted files are consequently not portable across machines with a
/// different word size or byte order.
pub const PREFIX: usize = std::mem::size_of::<usize>();

/// Total on-ring cost of a frame carrying `payload_len` bytes.
pub const fn frame_len(payload_len: usize) -> usize {
    PREFIX + payload_len
}

/// The pair of offsets bounding the live records on the ring.
///
/// `head` is the offset of the oldest record's length prefix; `tail` is
/// where the next prefix will be written. Both stay inside `[0, N)`. With
/// a reserved header page this struct is stored verbatim at the start of
/// the page (or wherever a [`CursorLocator`] points inside a custom
/// header), so its layout is fixed.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Offset of the oldest live record's length prefix.
    pub head: usize,
    /// Offset where the next record's length prefix will be written.
    pub tail: usize,
}

impl Cursor {
    /// Size of the cursor in bytes as stored on a header page.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Locates a [`Cursor`] embedded in a user-defined header page.
///
/// Invoked once at construction with the mapped header bytes. Returning
/// `Ok(Some(offset))` tells the ring its cursor lives at that byte offset
/// inside the header; the offset must be word aligned and leave room for
/// [`Cursor::SIZE`] bytes. Returning `Ok(None)` keeps the cursor in
/// memory. The callback may also initialize its own metadata in the page
/// before the ring touches it.
pub type CursorLocator = Box<dyn FnOnce(&mut [u8]) -> io::Result<Option<usize>>>;

/// Construction-time configuration for a [`buffer::Ring`].
///
/// The default state suits a pipe-like single-process buffer: no header
/// page, reads return [`RingError::Eof`] on empty, and the backing file is
/// closed with the ring.
pub struct RingOptions {
    /// Reserve the first page of the file as a header and persist the
    /// cursor there, so the buffer contents survive reopening the file.
    pub reserve_header: bool,
    /// Load the on-disk cursor but operate on an in-memory copy, leaving
    /// the file untouched. Writes are rejected in this mode. Only
    /// meaningful together with `reserve_header`.
    pub read_only_cursor: bool,
    /// Park readers on an empty ring until a writer arrives, instead of
    /// returning [`RingError::Eof`].
    pub blocking_reads: bool,
    /// Locate the cursor inside a caller-managed header layout. Only
    /// invoked when `reserve_header` is set.
    pub cursor_locator: Option<CursorLocator>,
    /// Leave the backing file open when the ring is closed; `close`
    /// returns it to the caller.
    pub dont_close_file: bool,
}

impl Default for RingOptions {
    fn default() -> Self {
        Self {
            reserve_header: false,
            read_only_cursor: false,
            blocking_reads: false,
            cursor_locator: None,
            dont_close_file: false,
        }
    }
}

/// Errors raised by ring construction and operation.
#[derive(Error, Debug)]
pub enum RingError {
    /// The data region is not a positive multiple of the page size.
    #[error("file must be aligned to the page size")]
    NotPageAligned,
    /// The header page cannot hold a cursor, or a locator placed the
    /// cursor where one does not fit.
    #[error("header page cannot hold the cursor")]
    HeaderTooSmall,
    /// A cursor recovered from a header page points outside the ring.
    #[error("recovered cursor is out of range")]
    InvalidCursor,
    /// The ring was opened with a read-only cursor; writes are rejected.
    #[error("ring cursor is read only")]
    ReadOnly,
    /// The payload exceeds a quarter of the ring.
    #[error("payload exceeds a quarter of the ring")]
    TooLarge,
    /// The destination buffer is smaller than the next record. The head is
    /// not advanced; retry with at least `needed` bytes.
    #[error("buffer of {needed} bytes needed to hold the next record")]
    BufferTooSmall {
        /// Payload length of the record the buffer must hold.
        needed: usize,
    },
    /// The ring holds no records.
    #[error("ring is empty")]
    Eof,
    /// The head cannot advance on an empty ring.
    #[error("no record to advance over")]
    Empty,
    /// The ring has been closed.
    #[error("ring is closed")]
    Closed,
    /// A map-layer operation failed.
    #[error(transparent)]
    Map(#[from] MapError),
    /// An I/O error from the backing file.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RingError>;

/// Single-slot reader notifier.
///
/// Writers post at most one pending signal; extra posts collapse into it.
/// Waiters may wake spuriously, so callers re-check their condition under
/// the ring mutex after every wait.
pub(crate) struct Wakeup {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Post one signal and wake one waiter. Never blocks.
    pub fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    /// Post one signal and wake every waiter (close uses this).
    pub fn notify_all(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_all();
    }

    /// Wait until a signal is pending or the wait is interrupted, then
    /// consume the slot if it was filled.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }
}

/// The block-writes flag and the condvar writers park on.
///
/// Kept apart from the ring mutex so a blocked writer never starves
/// readers while it waits.
pub(crate) struct WriteGate {
    blocked: Mutex<bool>,
    cond: Condvar,
}

impl WriteGate {
    pub fn new() -> Self {
        Self {
            blocked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn block(&self) {
        *self.blocked.lock() = true;
    }

    pub fn unblock(&self) {
        let mut blocked = self.blocked.lock();
        *blocked = false;
        self.cond.notify_all();
    }

    pub fn is_blocked(&self) -> bool {
        *self.blocked.lock()
    }

    /// Park until the gate is open. Callers must not hold the ring mutex.
    pub fn wait_until_open(&self) {
        let mut blocked = self.blocked.lock();
        while *blocked {
            self.cond.wait(&mut blocked);
        }
    }
}
