//! Deduplicated order storage with arena backing.
//!
//! An [`OrderBook`] stores validated orders in one of two modes chosen at
//! construction: a pre-sized slab carved out of an [`ArenaAllocator`], or an
//! unbounded heap vector. Both modes share timestamp deduplication and a
//! single mutex around all operations, so snapshots are always consistent.
//!
//! Insertion never fails visibly: duplicates are silently rejected and arena
//! exhaustion is converted into a failure counter, never a panic.

use std::collections::HashSet;
use std::mem;

use parking_lot::Mutex;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use tickforge_buffers::ArenaAllocator;
use tickforge_types::Order;

/// POD image of an order as persisted in the arena slab.
///
/// Records are only ever written from validated [`Order`]s, so reading one
/// back cannot resurrect an out-of-range value.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct OrderRecord {
    price: f64,
    amount: f64,
    timestamp: i64,
}

impl From<Order> for OrderRecord {
    fn from(o: Order) -> Self {
        Self {
            price: o.price,
            amount: o.amount,
            timestamp: o.timestamp,
        }
    }
}

impl From<OrderRecord> for Order {
    fn from(r: OrderRecord) -> Self {
        Order {
            price: r.price,
            amount: r.amount,
            timestamp: r.timestamp,
        }
    }
}

enum Storage {
    /// Slab of `capacity` record slots inside the arena buffer.
    Arena {
        arena: ArenaAllocator,
        /// Byte offset of each occupied slot, in insertion order.
        slots: Vec<usize>,
        capacity: usize,
        failed_inserts: u64,
    },
    /// Unbounded heap sequence.
    Fallback { orders: Vec<Order> },
}

struct BookState {
    storage: Storage,
    seen: HashSet<i64>,
}

/// Deduplicated store of orders with optional arena backing.
///
/// The upstream feed model treats identical timestamps as replays, so a
/// second order with a seen timestamp is dropped without any visible effect.
pub struct OrderBook {
    state: Mutex<BookState>,
}

impl OrderBook {
    /// Heap-backed book with no capacity bound.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BookState {
                storage: Storage::Fallback { orders: Vec::new() },
                seen: HashSet::new(),
            }),
        }
    }

    /// Arena-backed book over a freshly sized arena.
    ///
    /// Convenience for the common case where the arena exists only to back
    /// this book: the buffer is sized to exactly `capacity` order records.
    pub fn arena_sized(capacity: usize) -> Self {
        Self::with_arena(
            ArenaAllocator::new(capacity * mem::size_of::<OrderRecord>()),
            capacity,
        )
    }

    /// Arena-backed book holding at most `capacity` orders.
    ///
    /// The arena is owned by the book for its whole lifetime and only touched
    /// under the book's mutex.
    pub fn with_arena(arena: ArenaAllocator, capacity: usize) -> Self {
        Self {
            state: Mutex::new(BookState {
                storage: Storage::Arena {
                    arena,
                    slots: Vec::with_capacity(capacity),
                    capacity,
                    failed_inserts: 0,
                },
                seen: HashSet::with_capacity(capacity),
            }),
        }
    }

    /// Insert an order.
    ///
    /// Duplicate timestamps are rejected silently. In arena mode, capacity or
    /// allocation exhaustion increments the failure counter instead of
    /// propagating an error.
    pub fn insert(&self, order: Order) {
        let mut s = self.state.lock();
        if s.seen.contains(&order.timestamp) {
            return;
        }
        match &mut s.storage {
            Storage::Arena {
                arena,
                slots,
                capacity,
                failed_inserts,
            } => {
                if slots.len() >= *capacity {
                    *failed_inserts += 1;
                    return;
                }
                let offset = match arena
                    .allocate(mem::size_of::<OrderRecord>(), mem::align_of::<OrderRecord>())
                {
                    Ok(offset) => offset,
                    Err(_) => {
                        *failed_inserts += 1;
                        return;
                    }
                };
                let record = OrderRecord::from(order);
                arena.bytes_mut()[offset..offset + mem::size_of::<OrderRecord>()]
                    .copy_from_slice(record.as_bytes());
                slots.push(offset);
            }
            Storage::Fallback { orders } => {
                orders.push(order);
            }
        }
        s.seen.insert(order.timestamp);
    }

    /// Current number of stored orders.
    pub fn len(&self) -> usize {
        let s = self.state.lock();
        match &s.storage {
            Storage::Arena { slots, .. } => slots.len(),
            Storage::Fallback { orders } => orders.len(),
        }
    }

    /// True when no orders are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot capacity in arena mode; `None` for the unbounded fallback.
    pub fn capacity(&self) -> Option<usize> {
        let s = self.state.lock();
        match &s.storage {
            Storage::Arena { capacity, .. } => Some(*capacity),
            Storage::Fallback { .. } => None,
        }
    }

    /// True when the arena slab holds `capacity` orders.
    ///
    /// Always false in fallback mode.
    pub fn is_arena_full(&self) -> bool {
        let s = self.state.lock();
        match &s.storage {
            Storage::Arena {
                slots, capacity, ..
            } => slots.len() >= *capacity,
            Storage::Fallback { .. } => false,
        }
    }

    /// Number of inserts rejected by arena capacity or allocation failure.
    pub fn failed_arena_inserts(&self) -> u64 {
        let s = self.state.lock();
        match &s.storage {
            Storage::Arena { failed_inserts, .. } => *failed_inserts,
            Storage::Fallback { .. } => 0,
        }
    }

    /// Copy of all current orders in insertion order.
    pub fn snapshot(&self) -> Vec<Order> {
        let s = self.state.lock();
        match &s.storage {
            Storage::Arena { arena, slots, .. } => slots
                .iter()
                .map(|&offset| read_record(arena, offset).into())
                .collect(),
            Storage::Fallback { orders } => orders.clone(),
        }
    }

    /// Reorder in place, highest price first.
    ///
    /// Stable comparison sort (a SIMD-accelerated path may replace it where
    /// available). Arena mode sorts a temporary copy and writes the records
    /// back so the slot layout is preserved.
    pub fn sort_by_price_desc(&self) {
        let mut s = self.state.lock();
        match &mut s.storage {
            Storage::Arena { arena, slots, .. } => {
                let mut records: Vec<OrderRecord> = slots
                    .iter()
                    .map(|&offset| read_record(arena, offset))
                    .collect();
                records.sort_by(|a, b| b.price.total_cmp(&a.price));
                for (&offset, record) in slots.iter().zip(records.iter()) {
                    arena.bytes_mut()[offset..offset + mem::size_of::<OrderRecord>()]
                        .copy_from_slice(record.as_bytes());
                }
            }
            Storage::Fallback { orders } => {
                orders.sort_by(|a, b| b.price.total_cmp(&a.price));
            }
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

fn read_record(arena: &ArenaAllocator, offset: usize) -> OrderRecord {
    OrderRecord::read_from(&arena.bytes()[offset..offset + mem::size_of::<OrderRecord>()])
        .expect("slot offset always addresses a whole record")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(price: f64, ts: i64) -> Order {
        Order::new(price, 1.0, ts).unwrap()
    }

    #[test]
    fn fallback_mode_appends_in_order() {
        let book = OrderBook::new();
        for i in 0..5 {
            book.insert(order(99.0 + i as f64, 1_725_000_100 + i));
        }
        assert_eq!(book.len(), 5);
        let snap = book.snapshot();
        assert_eq!(snap[0].price, 99.0);
        assert_eq!(snap[4].price, 103.0);
        assert_eq!(book.capacity(), None);
        assert!(!book.is_arena_full());
    }

    #[test]
    fn duplicate_timestamps_are_silently_rejected() {
        let book = OrderBook::new();
        book.insert(order(100.0, 1_725_000_000));
        book.insert(order(999.0, 1_725_000_000));
        assert_eq!(book.len(), 1);
        assert_eq!(book.snapshot()[0].price, 100.0);
    }

    #[test]
    fn sort_desc_is_idempotent() {
        let book = OrderBook::new();
        book.insert(order(101.0, 1_725_000_001));
        book.insert(order(105.0, 1_725_000_002));
        book.insert(order(99.0, 1_725_000_003));
        book.sort_by_price_desc();
        let once = book.snapshot();
        book.sort_by_price_desc();
        let twice = book.snapshot();
        assert_eq!(once, twice);
        assert_eq!(once[0].price, 105.0);
        assert_eq!(once[2].price, 99.0);
    }
}
