//! Thread-safe fixed-capacity sliding window

use parking_lot::Mutex;
use thiserror::Error;

/// Failures from [`FixedWindow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    /// A window cannot hold zero elements
    #[error("window capacity must be non-zero")]
    ZeroCapacity,

    /// Index past the current element count
    #[error("index {index} out of bounds (len {len})")]
    OutOfBounds {
        /// Requested logical index
        index: usize,
        /// Current element count
        len: usize,
    },
}

struct WindowState<T> {
    buf: Vec<Option<T>>,
    head: usize,
    len: usize,
}

/// Circular buffer of fixed capacity with overwrite-on-full semantics.
///
/// `push` never blocks and never fails: once the window is full the oldest
/// element is evicted. Elements are addressed in insertion order, index 0
/// being the oldest retained element. All operations serialize on an internal
/// mutex so indicators can share a window across the flush thread pool.
pub struct FixedWindow<T> {
    capacity: usize,
    state: Mutex<WindowState<T>>,
}

impl<T: Clone> FixedWindow<T> {
    /// Create a window holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        if capacity == 0 {
            return Err(WindowError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            state: Mutex::new(WindowState {
                buf: vec![None; capacity],
                head: 0,
                len: 0,
            }),
        })
    }

    /// Append a value, evicting the oldest element when full.
    pub fn push(&self, value: T) {
        let mut s = self.state.lock();
        let head = s.head;
        s.buf[head] = Some(value);
        s.head = (head + 1) % self.capacity;
        if s.len < self.capacity {
            s.len += 1;
        }
    }

    /// Current element count (`<= capacity`).
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// True when no elements have been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The `index`-th element in insertion order (0 = oldest).
    pub fn get(&self, index: usize) -> Result<T, WindowError> {
        let s = self.state.lock();
        if index >= s.len {
            return Err(WindowError::OutOfBounds { index, len: s.len });
        }
        let physical = (s.head + self.capacity - s.len + index) % self.capacity;
        Ok(s.buf[physical]
            .clone()
            .expect("occupied slot within len is always Some"))
    }

    /// Snapshot of the retained elements, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        let s = self.state.lock();
        (0..s.len)
            .map(|i| {
                let physical = (s.head + self.capacity - s.len + i) % self.capacity;
                s.buf[physical]
                    .clone()
                    .expect("occupied slot within len is always Some")
            })
            .collect()
    }
}
