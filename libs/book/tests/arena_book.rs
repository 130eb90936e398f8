//! Arena-mode order book behavior: graceful degradation, dedup, slot reuse.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tickforge_book::OrderBook;
use tickforge_buffers::ArenaAllocator;
use tickforge_types::Order;

const RECORD_SIZE: usize = mem::size_of::<f64>() * 2 + mem::size_of::<i64>();

fn order(price: f64, ts: i64) -> Order {
    Order::new(price, 1.0, ts).unwrap()
}

#[test]
fn inserts_and_snapshots_in_order() {
    let arena = ArenaAllocator::new(4096);
    let book = OrderBook::with_arena(arena, 50);

    for i in 0..10 {
        book.insert(order(100.0 + i as f64, 1_725_000_000 + i));
    }

    assert_eq!(book.len(), 10);
    let snap = book.snapshot();
    assert_eq!(snap.len(), 10);
    assert_eq!(snap.first().unwrap().price, 100.0);
    assert_eq!(snap.last().unwrap().price, 109.0);
}

#[test]
fn overflow_degrades_gracefully() {
    // Room for exactly 10 orders, insert 20 unique timestamps.
    let capacity = 10;
    let arena = ArenaAllocator::new(capacity * RECORD_SIZE);
    let book = OrderBook::with_arena(arena, capacity);

    for i in 0..(capacity as i64 * 2) {
        book.insert(order(100.0 + i as f64, 1_725_000_000 + i));
    }

    assert_eq!(book.len(), capacity);
    assert_eq!(book.failed_arena_inserts(), capacity as u64);
    assert!(book.is_arena_full());
}

#[test]
fn memory_exhaustion_counts_failures() {
    // High slot limit, tiny buffer: the arena runs dry first.
    let arena = ArenaAllocator::new(128);
    let book = OrderBook::with_arena(arena, 100);
    let fits = 128 / RECORD_SIZE;

    for i in 0..50 {
        book.insert(order(100.0 + i as f64, 1_725_000_000 + i));
    }

    assert_eq!(book.len(), fits);
    assert_eq!(book.failed_arena_inserts(), (50 - fits) as u64);
    assert!(!book.is_arena_full()); // slot limit never reached
}

#[test]
fn overflow_insert_leaves_contents_intact() {
    let arena = ArenaAllocator::new(256);
    let book = OrderBook::with_arena(arena, 5);

    for i in 0..5 {
        book.insert(order(100.0 + i as f64, 1_725_000_000 + i));
    }
    assert_eq!(book.failed_arena_inserts(), 0);

    book.insert(order(200.0, 1_725_000_010));
    assert_eq!(book.len(), 5);
    assert_eq!(book.failed_arena_inserts(), 1);
    assert!(book.snapshot().iter().all(|o| o.price < 200.0));
}

#[test]
fn dedup_under_load() {
    let arena = ArenaAllocator::new(200 * RECORD_SIZE);
    let book = OrderBook::with_arena(arena, 200);

    for i in 0..100 {
        book.insert(order(100.0, 1_725_000_000 + i));
    }
    // Replay the first ten timestamps with a poison price.
    for i in 0..10 {
        book.insert(order(999.0, 1_725_000_000 + i));
    }

    assert_eq!(book.len(), 100);
    assert!(book.snapshot().iter().all(|o| o.price != 999.0));
}

#[test]
fn sorts_descending_preserving_slot_layout() {
    let arena = ArenaAllocator::new(2048);
    let book = OrderBook::with_arena(arena, 10);

    book.insert(order(101.0, 1_725_000_001));
    book.insert(order(105.0, 1_725_000_002));
    book.insert(order(99.0, 1_725_000_003));

    book.sort_by_price_desc();
    let sorted = book.snapshot();
    assert_eq!(sorted[0].price, 105.0);
    assert_eq!(sorted[1].price, 101.0);
    assert_eq!(sorted[2].price, 99.0);
}

#[test]
fn all_stored_orders_satisfy_type_invariants() {
    let arena = ArenaAllocator::new(64 * RECORD_SIZE);
    let book = OrderBook::with_arena(arena, 64);
    for i in 0..64 {
        book.insert(Order::new(0.5 + i as f64, 0.25, 1_725_000_000 + i).unwrap());
    }
    for o in book.snapshot() {
        assert!(o.price.is_finite() && (Order::MIN_PRICE..=Order::MAX_PRICE).contains(&o.price));
        assert!(
            o.amount.is_finite() && (Order::MIN_AMOUNT..=Order::MAX_AMOUNT).contains(&o.amount)
        );
        assert!((Order::MIN_TIMESTAMP..=Order::MAX_TIMESTAMP).contains(&o.timestamp));
    }
}

#[test]
fn snapshot_stays_consistent_under_concurrent_writes() {
    let arena = ArenaAllocator::new(128 * RECORD_SIZE);
    let book = Arc::new(OrderBook::with_arena(arena, 128));
    let run = Arc::new(AtomicBool::new(true));

    let writer = {
        let book = Arc::clone(&book);
        let run = Arc::clone(&run);
        std::thread::spawn(move || {
            let mut ts = 1_725_000_000i64;
            while run.load(Ordering::Relaxed) {
                book.insert(Order::new(100.0, 1.0, ts).unwrap());
                ts += 1;
            }
        })
    };

    for _ in 0..50 {
        let snap = book.snapshot();
        assert!(snap.len() <= 128);
        // Dedup invariant: timestamps within a snapshot are unique.
        let mut seen = std::collections::HashSet::new();
        assert!(snap.iter().all(|o| seen.insert(o.timestamp)));
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    run.store(false, Ordering::Relaxed);
    writer.join().unwrap();
}
