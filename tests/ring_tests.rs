//! Integration tests for the core ring: framing, overwrite, wrap, and
//! the blocking read path.

use ringfile::{frame_len, page_size, Ring, RingError, RingOptions};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

// Helper managing a page-aligned backing file in a temporary directory.
struct TestContext {
    _temp_dir: TempDir,
    ring_path: PathBuf,
}

impl TestContext {
    fn new(pages: usize) -> Self {
        let temp_dir = tempdir().unwrap();
        let ring_path = temp_dir.path().join("test.ring");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&ring_path)
            .unwrap();
        file.set_len((pages * page_size()) as u64).unwrap();

        Self {
            _temp_dir: temp_dir,
            ring_path,
        }
    }

    fn open(&self) -> Ring {
        Ring::open(&self.ring_path).unwrap()
    }

    fn open_with(&self, options: RingOptions) -> Ring {
        Ring::open_with_options(&self.ring_path, options).unwrap()
    }
}

/// Writing a batch of records and reading them back preserves order and
/// content exactly.
#[test]
fn test_round_trip_in_order() {
    let context = TestContext::new(2);
    let ring = context.open();

    let payloads: Vec<Vec<u8>> = (0..20)
        .map(|i| format!("record number {}", i).into_bytes())
        .collect();
    for payload in &payloads {
        assert_eq!(ring.write(payload).unwrap(), payload.len());
    }

    let mut buf = vec![0u8; 64];
    for payload in &payloads {
        let n = ring.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &payload[..]);
    }
    assert!(matches!(ring.read(&mut buf), Err(RingError::Eof)));
}

/// Payloads above a quarter of the ring are rejected and the ring is left
/// untouched; a payload of exactly a quarter is accepted.
#[test]
fn test_quarter_ring_cap() {
    let context = TestContext::new(1);
    let ring = context.open();
    let cap = ring.capacity() / 4;

    assert!(matches!(
        ring.write(&vec![0u8; cap + 1]),
        Err(RingError::TooLarge)
    ));
    assert!(ring.is_empty(), "rejected write must not move the cursor");

    assert_eq!(ring.write(&vec![1u8; cap]).unwrap(), cap);
    assert_eq!(ring.len(), frame_len(cap));
}

/// Overfilling the ring drops the oldest records first; the survivors
/// read back in order.
#[test]
fn test_overwrite_drops_oldest_first() {
    let context = TestContext::new(1);
    let ring = context.open();
    let quarter = ring.capacity() / 4;

    // Five quarter-ring records cannot coexist; with the length prefix on
    // top of each payload only three fit at once.
    for tag in [b'A', b'B', b'C', b'D', b'E'] {
        ring.write(&vec![tag; quarter]).unwrap();
    }

    let mut buf = vec![0u8; quarter];
    for expected in [b'C', b'D', b'E'] {
        let n = ring.read(&mut buf).unwrap();
        assert_eq!(n, quarter);
        assert!(buf[..n].iter().all(|&b| b == expected));
    }
    assert!(matches!(ring.read(&mut buf), Err(RingError::Eof)));
}

/// A record written across the wrap point reads back bit-exact.
#[test]
fn test_wrap_preserves_bytes() {
    let context = TestContext::new(1);
    let ring = context.open();
    let n = ring.capacity();

    // March the cursor to seven eighths of the region with frames of
    // exactly n/8 bytes, draining each one as it goes.
    let filler = vec![0u8; n / 8 - frame_len(0)];
    let mut buf = vec![0u8; n / 4];
    for _ in 0..7 {
        ring.write(&filler).unwrap();
        ring.read(&mut buf).unwrap();
    }

    // A quarter-ring record starting at 7n/8 straddles the wrap point.
    let pattern: Vec<u8> = (0..(n / 4)).map(|i| (i % 251) as u8).collect();
    ring.write(&pattern).unwrap();
    let got = ring.read(&mut buf).unwrap();
    assert_eq!(&buf[..got], &pattern[..]);
}

/// An undersized read buffer fails without advancing the head; the same
/// record is returned by the next adequate read.
#[test]
fn test_buffer_too_small_is_idempotent() {
    let context = TestContext::new(1);
    let ring = context.open();
    ring.write(b"hello world").unwrap();
    let used = ring.len();

    let mut small = [0u8; 4];
    match ring.read(&mut small) {
        Err(RingError::BufferTooSmall { needed }) => assert_eq!(needed, 11),
        other => panic!("expected BufferTooSmall, got {:?}", other),
    }
    assert_eq!(ring.len(), used, "failed read must not advance the head");

    let mut buf = [0u8; 32];
    let n = ring.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello world");
}

/// Zero-length payloads are legal records.
#[test]
fn test_empty_payload_round_trips() {
    let context = TestContext::new(1);
    let ring = context.open();

    assert_eq!(ring.write(b"").unwrap(), 0);
    assert_eq!(ring.len(), frame_len(0));

    let mut buf = [0u8; 8];
    assert_eq!(ring.read(&mut buf).unwrap(), 0);
    assert!(matches!(ring.read(&mut buf), Err(RingError::Eof)));
}

/// A reader parked on an empty ring is woken by a concurrent writer.
#[test]
fn test_blocking_read_wakes_on_write() {
    let context = TestContext::new(1);
    let ring = Arc::new(context.open_with(RingOptions {
        blocking_reads: true,
        ..Default::default()
    }));

    let reader = {
        let ring = ring.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 16];
            let n = ring.read(&mut buf).unwrap();
            buf[..n].to_vec()
        })
    };

    thread::sleep(Duration::from_millis(50));
    ring.write(b"ping").unwrap();

    assert_eq!(reader.join().unwrap(), b"ping");
}

/// A writer thread and a blocking reader thread hand records over in
/// order through a small ring.
#[test]
fn test_pipe_between_threads() {
    const COUNT: usize = 500;

    let context = TestContext::new(1);
    let ring = Arc::new(context.open_with(RingOptions {
        blocking_reads: true,
        ..Default::default()
    }));

    let reader = {
        let ring = ring.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            let mut received = Vec::with_capacity(COUNT);
            for _ in 0..COUNT {
                let n = ring.read(&mut buf).unwrap();
                received.push(String::from_utf8(buf[..n].to_vec()).unwrap());
            }
            received
        })
    };

    for i in 0..COUNT {
        ring.write(format!("message {}", i).as_bytes()).unwrap();
        // Keep the writer from lapping the reader: the ring is small and
        // overwrite would eat unread records.
        while ring.len() > ring.capacity() / 2 {
            thread::yield_now();
        }
    }

    let received = reader.join().unwrap();
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message, &format!("message {}", i));
    }
}

/// Close releases a parked reader with `Closed`.
#[test]
fn test_close_releases_blocked_reader() {
    let context = TestContext::new(1);
    let ring = Arc::new(context.open_with(RingOptions {
        blocking_reads: true,
        ..Default::default()
    }));

    let reader = {
        let ring = ring.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 16];
            ring.read(&mut buf)
        })
    };

    thread::sleep(Duration::from_millis(50));
    ring.close().unwrap();

    assert!(matches!(reader.join().unwrap(), Err(RingError::Closed)));
}

/// Blocked writers park without starving readers, then complete once
/// writes are unblocked.
#[test]
fn test_block_writes_gates_writers() {
    let context = TestContext::new(1);
    let ring = Arc::new(context.open());
    ring.write(b"before the gate").unwrap();

    ring.block_writes();

    let writer = {
        let ring = ring.clone();
        thread::spawn(move || ring.write(b"after the gate").unwrap())
    };

    // The parked writer must not hold the ring mutex: reads still work.
    thread::sleep(Duration::from_millis(50));
    let mut buf = [0u8; 32];
    let n = ring.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"before the gate");
    assert!(ring.is_empty());

    ring.unblock_writes();
    writer.join().unwrap();

    let n = ring.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"after the gate");
}

/// Reset discards all live records without erasing the file.
#[test]
fn test_reset_empties_the_ring() {
    let context = TestContext::new(1);
    let ring = context.open();

    for _ in 0..5 {
        ring.write(b"stale").unwrap();
    }
    ring.reset();

    assert!(ring.is_empty());
    assert_eq!(ring.free(), ring.capacity());
    ring.write(b"fresh").unwrap();

    let mut buf = [0u8; 16];
    let n = ring.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"fresh");
}
