//! Per-Connection Handling
//!
//! One [`ConnectionHandler`] owns one client for its whole lifetime: the
//! socket, the accumulating input buffer, and the teardown. The loop is
//!
//! 1. decode as many complete frames as the buffer holds, evaluating each
//!    and writing its reply before decoding the next (replies leave in
//!    arrival order);
//! 2. await more bytes from the socket;
//! 3. repeat until EOF, a transport error, or a protocol violation.
//!
//! TCP is a byte stream, so a request may arrive in fragments or several
//! may arrive back to back; the decoder's need-more/consumed contract and
//! the retained buffer handle both. Command errors are ordinary replies
//! and keep the connection open. Protocol errors and an overflowing input
//! buffer get a best-effort error reply and then close the connection.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Per-connection input buffer bound (64 KiB). A single well-formed
/// request never legitimately needs more before a frame completes.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Process-wide connection counters. Single-threaded, so plain `Cell`s;
/// the live tally doubles as the admission count checked by the acceptor.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connections_accepted: Cell<u64>,
    active_connections: Cell<u64>,
    commands_processed: Cell<u64>,
    bytes_read: Cell<u64>,
    bytes_written: Cell<u64>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.set(self.connections_accepted.get() + 1);
        self.active_connections.set(self.active_connections.get() + 1);
    }

    pub fn connection_closed(&self) {
        self.active_connections.set(self.active_connections.get() - 1);
    }

    pub fn command_processed(&self) {
        self.commands_processed.set(self.commands_processed.get() + 1);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.set(self.bytes_read.get() + count as u64);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written.set(self.bytes_written.get() + count as u64);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.get()
    }

    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.get()
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.get()
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Orderly EOF from the client.
    #[error("client disconnected")]
    ClientDisconnected,

    /// EOF with a partial frame still buffered.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Input buffer exceeded [`MAX_BUFFER_SIZE`].
    #[error("input buffer limit exceeded")]
    BufferFull,
}

/// State for one client connection, owned by its handler task.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    parser: RespParser,
    stats: Rc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Registers the connection (bumping the live tally immediately, so
    /// admission control sees it before the handler task first runs) and
    /// takes ownership of the socket.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Rc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Drives the connection to completion and tears it down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::Parse(e)) => {
                warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                let _ = self.send_reply(&reply).await;
            }
            Err(ConnectionError::BufferFull) => {
                warn!(client = %self.addr, "Input buffer overflow, closing connection");
                let reply = RespValue::error("ERR input buffer limit exceeded");
                let _ = self.send_reply(&reply).await;
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.try_parse_frame()? {
                let reply = self.commands.execute(frame);
                self.stats.command_processed();
                self.send_reply(&reply).await?;
            }

            self.read_more().await?;
        }
    }

    /// Decodes one frame off the front of the buffer, if complete.
    fn try_parse_frame(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((frame, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Decoded request frame"
                );
                Ok(Some(frame))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, awaiting more bytes"
                );
                Ok(None)
            }
        }
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.add_bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read");

        Ok(())
    }

    async fn send_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.add_bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Wrote reply");
        Ok(())
    }
}
