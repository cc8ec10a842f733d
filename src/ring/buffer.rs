//! The ring core: a persistent ring buffer over a double-mapped file.
//!
//! A [`Ring`] writes variable-length records into the mirrored data region
//! and reads them back in insertion order, overwriting the oldest records
//! when a writer outpaces the reader. All state lives behind one mutex;
//! the only suspension points are a reader parked on the wakeup slot and a
//! writer parked on the write gate, neither of which holds the mutex while
//! waiting.
//!
//! Records are framed with a native-word length prefix. Thanks to the
//! mirror, a frame is always one contiguous span of memory even when it
//! straddles the wrap point, so reads and writes are single copies.

use crate::mmap::mirror::MirrorMap;
use crate::mmap::page_size;
use crate::ring::{frame_len, Cursor, RingError, RingOptions, Wakeup, WriteGate};
use crate::ring::{Result, PREFIX};
use log::{debug, trace};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::ptr::NonNull;

/// Where the live cursor is stored.
///
/// `Mapped` points at a [`Cursor`] inside the header page mapping, so
/// ordinary loads and stores persist it. `Inline` keeps it in process
/// memory, either because no header was reserved or because the ring was
/// opened with a read-only cursor.
enum CursorSlot {
    Inline(Cursor),
    Mapped(NonNull<Cursor>),
}

impl CursorSlot {
    fn load(&self) -> Cursor {
        match self {
            CursorSlot::Inline(cur) => *cur,
            CursorSlot::Mapped(ptr) => unsafe { ptr.as_ptr().read() },
        }
    }

    fn store(&mut self, cur: Cursor) {
        match self {
            CursorSlot::Inline(slot) => *slot = cur,
            CursorSlot::Mapped(ptr) => unsafe { ptr.as_ptr().write(cur) },
        }
    }
}

// A mapped cursor points into the header mapping owned by the same Inner,
// and every dereference happens under the ring mutex.
unsafe impl Send for CursorSlot {}

/// Mutex-guarded ring state.
struct Inner {
    mirror: MirrorMap,
    header: Option<MmapMut>,
    cursor: CursorSlot,
    file: Option<File>,
    closed: bool,
}

impl Inner {
    /// Bytes currently occupied by live frames.
    fn used(&self) -> usize {
        let Cursor { head, tail } = self.cursor.load();
        if tail >= head {
            tail - head
        } else {
            self.mirror.len() - head + tail
        }
    }

    fn free(&self) -> usize {
        self.mirror.len() - self.used()
    }

    /// Drop the oldest record by jumping the head over its frame.
    fn advance_head(&mut self) -> Result<()> {
        if self.used() == 0 {
            return Err(RingError::Empty);
        }
        let mut cur = self.cursor.load();
        let length = self.mirror.read_word(cur.head);
        cur.head = (cur.head + frame_len(length)) % self.mirror.len();
        self.cursor.store(cur);
        Ok(())
    }
}

/// A persistent, record-oriented ring buffer backed by a file.
///
/// The ring is safe to share across threads; every operation runs under an
/// internal mutex. Dropping the ring tears down its mappings; call
/// [`Ring::close`] instead to observe unmap failures or to take the
/// backing file back.
pub struct Ring {
    size: usize,
    read_only: bool,
    blocking_reads: bool,
    dont_close_file: bool,
    wakeup: Wakeup,
    gate: WriteGate,
    inner: Mutex<Inner>,
}

impl Ring {
    /// Build a ring over `file` with default options.
    ///
    /// The file must be open read-write and its size a positive multiple
    /// of the page size.
    pub fn new(file: File) -> Result<Self> {
        Self::with_options(file, RingOptions::default())
    }

    /// Build a ring over `file` according to `options`.
    ///
    /// The ring takes ownership of the file; on failure the file is
    /// dropped along with any partially constructed mappings.
    ///
    /// With `reserve_header` the first page of the file holds the
    /// persisted cursor (or a caller-defined header located through
    /// `cursor_locator`), and the remainder of the file is the data
    /// region. The data region must itself be a positive multiple of the
    /// page size.
    pub fn with_options(file: File, mut options: RingOptions) -> Result<Self> {
        let page = page_size();
        let file_len = file.metadata()?.len() as usize;

        let mut header = None;
        let mut cursor = CursorSlot::Inline(Cursor::default());
        let data_offset = if options.reserve_header { page } else { 0 };

        if options.reserve_header {
            if page <= Cursor::SIZE {
                return Err(RingError::HeaderTooSmall);
            }
            if file_len < page {
                return Err(RingError::NotPageAligned);
            }
            let mut map = unsafe { MmapOptions::new().len(page).map_mut(&file)? };

            let located = match options.cursor_locator.take() {
                None => Some(0),
                Some(locate) => locate(&mut map[..])?,
            };
            if let Some(off) = located {
                if off % std::mem::align_of::<Cursor>() != 0 || off + Cursor::SIZE > page {
                    return Err(RingError::HeaderTooSmall);
                }
                let ptr = unsafe { NonNull::new_unchecked(map.as_mut_ptr().add(off).cast()) };
                cursor = CursorSlot::Mapped(ptr);
            }
            if options.read_only_cursor {
                // Snapshot the on-disk cursor; the file copy is never
                // touched again.
                cursor = CursorSlot::Inline(cursor.load());
            }
            header = Some(map);
        }

        let size = file_len - data_offset;
        if size == 0 || size % page != 0 {
            return Err(RingError::NotPageAligned);
        }

        let recovered = cursor.load();
        if recovered.head >= size || recovered.tail >= size {
            return Err(RingError::InvalidCursor);
        }

        let mirror = MirrorMap::new(&file, data_offset as u64, size)?;
        debug!(
            "opened {} byte ring (header: {}, cursor at {}/{})",
            size, options.reserve_header, recovered.head, recovered.tail
        );

        Ok(Self {
            size,
            read_only: options.read_only_cursor,
            blocking_reads: options.blocking_reads,
            dont_close_file: options.dont_close_file,
            wakeup: Wakeup::new(),
            gate: WriteGate::new(),
            inner: Mutex::new(Inner {
                mirror,
                header,
                cursor,
                file: Some(file),
                closed: false,
            }),
        })
    }

    /// Open the file at `path` read-write and build a ring over it with
    /// default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, RingOptions::default())
    }

    /// Open the file at `path` read-write and build a ring over it
    /// according to `options`.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: RingOptions) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::with_options(file, options)
    }

    fn lock_open(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RingError::Closed);
        }
        Ok(inner)
    }

    /// Append one record holding `payload` to the ring.
    ///
    /// If the ring lacks room, the head is advanced over the oldest
    /// records until the frame fits; the ring drains itself rather than
    /// filling up. Payloads above a quarter of the ring are rejected with
    /// [`RingError::TooLarge`] so several records always coexist.
    ///
    /// Returns the payload length on success. Blocks while writes are
    /// blocked via [`Ring::block_writes`].
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        if self.read_only {
            return Err(RingError::ReadOnly);
        }
        if payload.len() > self.size / 4 {
            return Err(RingError::TooLarge);
        }

        let mut inner = self.lock_open()?;
        while self.gate.is_blocked() {
            drop(inner);
            self.gate.wait_until_open();
            inner = self.lock_open()?;
        }

        // Keep the ring strictly below capacity: a frame exactly filling
        // the free space would land tail on head, and tail == head means
        // empty.
        let need = frame_len(payload.len());
        while need >= inner.free() {
            trace!("dropping oldest record to fit {} bytes", payload.len());
            inner.advance_head()?;
        }

        let mut cur = inner.cursor.load();
        inner.mirror.copy_in(cur.tail + PREFIX, payload);
        inner.mirror.write_word(cur.tail, payload.len());
        cur.tail = (cur.tail + need) % self.size;
        inner.cursor.store(cur);

        self.wakeup.notify();
        Ok(payload.len())
    }

    /// Copy the oldest record's payload into `buf` and advance the head
    /// over it.
    ///
    /// Returns the payload length. An undersized `buf` fails with
    /// [`RingError::BufferTooSmall`] and leaves the record in place, so
    /// the caller can retry with a larger buffer.
    ///
    /// On an empty ring this returns [`RingError::Eof`], unless the ring
    /// was opened with `blocking_reads`, in which case the call parks
    /// until a writer arrives or the ring is closed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock_open()?;
        while inner.used() == 0 {
            if !self.blocking_reads {
                return Err(RingError::Eof);
            }
            // Park without the mutex, then re-check: another reader may
            // have consumed the record that triggered the wakeup.
            drop(inner);
            self.wakeup.wait();
            inner = self.lock_open()?;
        }

        let cur = inner.cursor.load();
        let length = inner.mirror.read_word(cur.head);
        if buf.len() < length {
            return Err(RingError::BufferTooSmall { needed: length });
        }
        inner.mirror.copy_out(cur.head + PREFIX, &mut buf[..length]);
        inner.advance_head()?;
        Ok(length)
    }

    /// Drop the oldest record without copying it out.
    ///
    /// Fails with [`RingError::Empty`] when there is nothing to drop.
    pub fn advance(&self) -> Result<()> {
        let mut inner = self.lock_open()?;
        inner.advance_head()
    }

    /// Discard every record by zeroing the cursor.
    ///
    /// The file bytes are not erased. A no-op on a closed ring.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.cursor.store(Cursor::default());
    }

    /// Hold all writers until [`Ring::unblock_writes`].
    ///
    /// Lets a consumer drain the ring completely while new records are
    /// unacceptable. Parked writers do not hold the ring mutex, so reads
    /// proceed normally.
    pub fn block_writes(&self) {
        self.gate.block();
    }

    /// Release writers parked by [`Ring::block_writes`].
    pub fn unblock_writes(&self) {
        self.gate.unblock();
    }

    /// Tear the ring down: unmap the header page and the mirror, then
    /// close the backing file.
    ///
    /// Parked readers and writers are released and observe
    /// [`RingError::Closed`], as does every later operation. A second
    /// `close` is an error-free no-op. With `dont_close_file` the backing
    /// file is returned instead of closed.
    pub fn close(&self) -> Result<Option<File>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(None);
        }
        inner.closed = true;

        self.wakeup.notify_all();
        self.gate.unblock();

        inner.header = None;
        let unmapped = inner.mirror.unmap();
        let file = inner.file.take();
        let file = if self.dont_close_file { file } else { None };
        unmapped?;
        debug!("closed {} byte ring", self.size);
        Ok(file)
    }

    /// Size of the data region in bytes.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes currently occupied by live frames, prefixes included.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        if inner.closed {
            0
        } else {
            inner.used()
        }
    }

    /// Whether the ring holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes available before the next write starts dropping old records.
    pub fn free(&self) -> usize {
        let inner = self.inner.lock();
        if inner.closed {
            0
        } else {
            inner.free()
        }
    }

    /// Run `f` over the mapped header page, if one was reserved.
    ///
    /// Grants mutex-guarded access to caller-maintained metadata living
    /// alongside the cursor. Returns `None` without a reserved header or
    /// after close.
    pub fn with_header<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.header.as_mut().map(|map| f(&mut map[..]))
    }
}
