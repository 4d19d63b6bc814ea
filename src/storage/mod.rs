//! Storage Module
//!
//! The in-memory key space and everything that keeps it bounded and
//! current: the [`Store`] map itself, the eviction policies that enforce
//! `keysLimit`, and the [`ExpiryTicker`] driving active expiration.
//!
//! Ownership model: one `Store`, constructed at startup, held in an
//! `Rc<RefCell<_>>` on the event-loop thread. Every mutation happens from
//! that thread inside a synchronous borrow; there is no locking because
//! there is nothing to lock against.

pub mod eviction;
pub mod expiry;
pub mod store;

pub use eviction::{EvictionPolicy, UnknownPolicy};
pub use expiry::{ExpiryTicker, SWEEP_REPEAT_THRESHOLD};
pub use store::{now_ms, Entry, Store, Value, NO_EXPIRY, SWEEP_SAMPLE_SIZE};
