//! # EmberKV - A Minimal Single-Threaded In-Memory Key-Value Server
//!
//! EmberKV speaks a RESP-style text protocol over TCP and keeps its whole
//! key space in memory, bounded by a configurable key limit with eviction
//! and per-key expiration.
//!
//! ## Architecture
//!
//! Everything runs on one OS thread. A tokio current-thread runtime
//! multiplexes all I/O through its readiness reactor; the acceptor, every
//! connection handler, and the expiration ticker are cooperative local
//! tasks sharing the store through `Rc<RefCell<_>>` — no locks, no
//! atomics, no cross-thread state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  current-thread runtime                      │
//! │                                                              │
//! │  ┌──────────┐   ┌─────────────┐   ┌──────────────┐          │
//! │  │ Acceptor │──>│ Connection  │──>│   Command    │          │
//! │  │ (listen) │   │  Handler    │   │   Handler    │          │
//! │  └──────────┘   └─────────────┘   └──────┬───────┘          │
//! │                                          │                   │
//! │  ┌──────────────┐               ┌────────▼────────┐         │
//! │  │ ExpiryTicker │──────────────>│  Rc<RefCell<    │         │
//! │  │ (sweeps)     │               │     Store>>     │         │
//! │  └──────────────┘               └─────────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow: socket bytes → per-connection buffer → [`protocol`] decoder
//! → [`commands`] evaluator → [`storage`] store → encoder → socket.
//!
//! ## Expiration & capacity
//!
//! Keys carry an absolute millisecond deadline (`-1` = immortal). Reads
//! expire lazily; the ticker actively sweeps bounded samples so untouched
//! keys are reclaimed too. Inserting a net-new key at `keysLimit` evicts
//! one resident key first (`simple-first`, `lru` or `random`).
//!
//! ## Quick start
//!
//! ```no_run
//! use emberkv::{AppConfig, Server};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::default();
//!     config.validate()?;
//!
//!     let runtime = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()?;
//!     let local = tokio::task::LocalSet::new();
//!     runtime.block_on(local.run_until(Server::new(config).run()))
//! }
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::{Command, CommandHandler};
pub use config::{AppConfig, CliArgs, ConfigError};
pub use connection::{ConnectionHandler, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::Server;
pub use storage::{Entry, EvictionPolicy, ExpiryTicker, Store, Value};

/// Crate version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port.
pub const DEFAULT_PORT: u16 = 7379;
