//! Bounded memory primitives used across the tickforge engine.
//!
//! [`ArenaAllocator`] is a single-owner bump allocator over one contiguous
//! buffer; [`FixedWindow`] is a mutex-guarded ring used by indicators to keep
//! sliding statistics. Both fail with typed errors instead of panicking.

pub mod arena;
pub mod window;

pub use arena::{ArenaAllocator, ArenaError};
pub use window::{FixedWindow, WindowError};
