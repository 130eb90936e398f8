//! File-backed shared-memory packet ring.
//!
//! Single-producer/single-consumer ring of fixed-size packets, mapped from a
//! file (typically under `/dev/shm`). The producer advances `head` after
//! writing a packet; the consumer advances `tail` after reading one. Both
//! indices are modulo-capacity atomics paired acquire/release, so packet
//! bytes written before the `head` store are visible after the matching
//! `head` load. One slot is kept empty to distinguish full from empty.

use std::fs::OpenOptions;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::MmapMut;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::FeedError;

/// Payload bytes per packet.
pub const PACKET_DATA_SIZE: usize = 256;

/// One ring slot.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct Packet {
    /// Payload bytes; only the first `len` are meaningful
    pub data: [u8; PACKET_DATA_SIZE],
    /// Payload length
    pub len: u16,
    _pad: u16,
}

#[repr(C)]
struct RingHeader {
    head: AtomicU32,
    tail: AtomicU32,
}

const HEADER_SIZE: usize = mem::size_of::<RingHeader>();
const PACKET_SIZE: usize = mem::size_of::<Packet>();

/// Exact byte size of a ring with `capacity` slots.
///
/// Computed explicitly — header plus `capacity` whole packets — so the mapped
/// region always covers every slot the indices can address.
pub fn region_size(capacity: u32) -> usize {
    HEADER_SIZE + capacity as usize * PACKET_SIZE
}

/// Memory-mapped SPSC packet ring.
pub struct RingBuffer {
    // Kept alive for the mapping; all access goes through `base`.
    _map: MmapMut,
    base: *mut u8,
    capacity: u32,
}

// The mmap base is stable for the lifetime of the map and all cross-thread
// access is ordered by the head/tail atomics.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create (or truncate) the backing file and map a zeroed ring.
    pub fn create(path: impl AsRef<Path>, capacity: u32) -> Result<Self, FeedError> {
        if capacity < 2 {
            return Err(FeedError::Ring(format!(
                "capacity {capacity} too small, need at least 2 slots"
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(region_size(capacity) as u64)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = map.as_mut_ptr();
        Ok(Self {
            _map: map,
            base,
            capacity,
        })
    }

    /// Attach to an existing ring, validating the region size.
    pub fn open(path: impl AsRef<Path>, capacity: u32) -> Result<Self, FeedError> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let expected = region_size(capacity) as u64;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(FeedError::Ring(format!(
                "region size mismatch for {}: expected {expected} bytes for {capacity} slots, found {actual}",
                path.as_ref().display()
            )));
        }
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        let base = map.as_mut_ptr();
        Ok(Self {
            _map: map,
            base,
            capacity,
        })
    }

    /// Slot count.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn header(&self) -> &RingHeader {
        // Header lives at offset zero; the mapping outlives the reference and
        // the file was sized in create/open.
        unsafe { &*(self.base as *const RingHeader) }
    }

    fn packet_ptr(&self, index: u32) -> *mut Packet {
        let offset = HEADER_SIZE + (index % self.capacity) as usize * PACKET_SIZE;
        unsafe { self.base.add(offset) as *mut Packet }
    }

    /// Producer side: append one payload, truncating to the slot size.
    ///
    /// Returns false when the ring is full.
    pub fn try_push(&self, payload: &[u8]) -> bool {
        let header = self.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Acquire);
        let next_head = (head + 1) % self.capacity;
        if next_head == tail {
            return false;
        }

        let take = payload.len().min(PACKET_DATA_SIZE);
        let mut packet = Packet::new_zeroed();
        packet.data[..take].copy_from_slice(&payload[..take]);
        packet.len = take as u16;
        unsafe { self.packet_ptr(head).write(packet) };

        header.head.store(next_head, Ordering::Release);
        true
    }

    /// Consumer side: take the oldest unread payload, if any.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        let header = self.header();
        let tail = header.tail.load(Ordering::Acquire);
        let head = header.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let packet = unsafe { self.packet_ptr(tail).read() };
        let len = (packet.len as usize).min(PACKET_DATA_SIZE);
        let payload = packet.data[..len].to_vec();

        header.tail.store((tail + 1) % self.capacity, Ordering::Release);
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: u32) -> (tempfile::TempDir, RingBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.shm");
        let ring = RingBuffer::create(&path, capacity).unwrap();
        (dir, ring)
    }

    #[test]
    fn rejects_degenerate_capacity() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RingBuffer::create(dir.path().join("r"), 1).is_err());
    }

    #[test]
    fn open_validates_region_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.shm");
        RingBuffer::create(&path, 8).unwrap();
        assert!(RingBuffer::open(&path, 8).is_ok());
        assert!(matches!(
            RingBuffer::open(&path, 16),
            Err(FeedError::Ring(_))
        ));
    }

    #[test]
    fn push_pop_round_trips_in_fifo_order() {
        let (_dir, ring) = ring(8);
        assert!(ring.try_push(b"100.0,1.0,1725000001"));
        assert!(ring.try_push(b"101.0,2.0,1725000002"));
        assert_eq!(ring.try_pop().unwrap(), b"100.0,1.0,1725000001");
        assert_eq!(ring.try_pop().unwrap(), b"101.0,2.0,1725000002");
        assert!(ring.try_pop().is_none());
    }

    #[test]
    fn full_ring_rejects_push_until_drained() {
        let (_dir, ring) = ring(4);
        // One slot is sacrificed to disambiguate full/empty.
        assert!(ring.try_push(b"a"));
        assert!(ring.try_push(b"b"));
        assert!(ring.try_push(b"c"));
        assert!(!ring.try_push(b"d"));
        assert_eq!(ring.try_pop().unwrap(), b"a");
        assert!(ring.try_push(b"d"));
    }

    #[test]
    fn oversize_payloads_are_truncated() {
        let (_dir, ring) = ring(4);
        let big = vec![b'X'; PACKET_DATA_SIZE + 50];
        assert!(ring.try_push(&big));
        assert_eq!(ring.try_pop().unwrap().len(), PACKET_DATA_SIZE);
    }

    #[test]
    fn cross_mapping_visibility() {
        // Producer and consumer on two separate mappings of the same file.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.shm");
        let producer = RingBuffer::create(&path, 1024).unwrap();
        let consumer = RingBuffer::open(&path, 1024).unwrap();

        let writer = std::thread::spawn(move || {
            let mut written = 0u32;
            while written < 500 {
                let line = format!("100.0,{},{}", written + 1, 1_725_000_000 + written);
                if producer.try_push(line.as_bytes()) {
                    written += 1;
                }
            }
        });

        let mut read = 0u32;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while read < 500 && std::time::Instant::now() < deadline {
            match consumer.try_pop() {
                Some(_) => read += 1,
                None => std::thread::sleep(std::time::Duration::from_micros(50)),
            }
        }
        writer.join().unwrap();
        assert_eq!(read, 500);
    }
}
