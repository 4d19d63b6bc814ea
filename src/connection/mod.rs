//! Connection Module
//!
//! Owns everything per-client: socket, buffers, teardown. The handler is
//! driven as a local task on the event-loop thread; faults are confined
//! to the connection that raised them.

pub mod handler;

pub use handler::{ConnectionError, ConnectionHandler, ConnectionStats, MAX_BUFFER_SIZE};
