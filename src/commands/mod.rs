//! Command Module
//!
//! Parses request frames into [`Command`] records and evaluates them
//! against the store. See [`handler`] for the verb table and the exact
//! error strings each failure mode produces.

pub mod handler;

pub use handler::{Command, CommandHandler};
