//! # Tickforge Types
//!
//! Core market-data value types shared by every tickforge service.
//!
//! ## Design Philosophy
//!
//! - **Constructor-validated**: an [`Order`] or [`Candlestick`] that exists is
//!   in-range and finite, so downstream code (books, windows, indicators)
//!   never re-checks.
//! - **Move-friendly**: values are small `Copy` records that flow through
//!   queues and worker threads without sharing.
//! - **Provenance-aware**: every parsed order carries an [`AuthFlags`] label
//!   describing how much the transport trusted the payload.
//!
//! ## Quick Start
//!
//! ```rust
//! use tickforge_types::{AuthFlags, Candlestick, Order};
//!
//! let order = Order::new(100.0, 1.5, 1_725_000_000)?;
//! assert_eq!(order.to_feed_line(), "100,1.5,1725000000");
//!
//! let candle = Candlestick::new(100.0, 102.0, 99.5, 101.0, 4.5,
//!                               1_725_000_000, 1_725_000_060)?;
//! assert!(candle.volume >= 0.0);
//!
//! let auth: AuthFlags = "TRUSTED".parse()?;
//! assert_eq!(auth, AuthFlags::Trusted);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod auth;
pub mod candlestick;
pub mod error;
pub mod order;

pub use auth::AuthFlags;
pub use candlestick::Candlestick;
pub use error::{AuthFlagError, CandleError, OrderError};
pub use order::Order;
