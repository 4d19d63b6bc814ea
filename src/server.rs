//! TCP Server & Event Loop Wiring
//!
//! Everything runs on one OS thread: the acceptor, every connection
//! handler, and the expiration ticker are tasks on a current-thread
//! runtime's `LocalSet`, multiplexed by the runtime's readiness reactor.
//! The store is built here, once, and handed out as an `Rc<RefCell<_>>`
//! owned handle; there is no global state and nothing crosses a thread.
//!
//! Listener lifecycle: IPv4 socket, `SO_REUSEADDR`, bind, listen with a
//! backlog of `maxClients`. Admission control compares the live
//! connection tally against `maxClients` and immediately drops
//! freshly-accepted sockets while at capacity. A failed accept is logged
//! and the loop carries on; per-connection faults never reach it.

use crate::commands::CommandHandler;
use crate::config::AppConfig;
use crate::connection::{ConnectionHandler, ConnectionStats};
use crate::storage::{ExpiryTicker, Store};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, warn};

/// The assembled server. Construct with a validated [`AppConfig`], then
/// call [`Server::run`] from inside a `LocalSet` on a current-thread
/// runtime.
#[derive(Debug)]
pub struct Server {
    config: AppConfig,
}

impl Server {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Binds the listener and serves until the task is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = self.bind()?;
        info!(addr = %listener.local_addr()?, "Listening");
        self.serve(listener).await
    }

    /// IPv4 only; the backlog mirrors `maxClients` so the kernel queue
    /// and the admission limit agree.
    fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.socket_addr()?;
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr.into())?;
        let listener = socket.listen(self.config.max_clients as u32)?;
        Ok(listener)
    }

    /// Wires the components together and runs the accept loop.
    async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let policy = self.config.eviction_policy()?;
        let store = Rc::new(RefCell::new(Store::new(self.config.keys_limit, policy)));
        info!(
            keys_limit = self.config.keys_limit,
            eviction = %policy,
            "Store initialized"
        );

        let _ticker = ExpiryTicker::start(Rc::clone(&store), self.config.auto_delete_interval()?);

        let stats = Rc::new(ConnectionStats::new());
        let commands = CommandHandler::new(store);
        let max_clients = self.config.max_clients as u64;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if stats.active_connections() >= max_clients {
                        warn!(client = %addr, max_clients, "At capacity, refusing connection");
                        drop(stream);
                        continue;
                    }

                    // Constructed before spawning so the live tally is
                    // already bumped when the next accept is admitted.
                    let handler = ConnectionHandler::new(
                        stream,
                        addr,
                        commands.clone(),
                        Rc::clone(&stats),
                    );
                    tokio::task::spawn_local(async move {
                        let _ = handler.run().await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::LocalSet;

    fn test_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            keys_limit: 64,
            auto_delete_frequency: "100ms".to_string(),
            max_clients: 16,
            ..Default::default()
        }
    }

    /// Binds an ephemeral port and spawns the accept loop locally.
    async fn start_server(config: AppConfig) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::task::spawn_local(async move {
            let _ = Server::new(config).serve(listener).await;
        });
        addr
    }

    async fn roundtrip(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).await.unwrap();
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            expected,
            "reply was {:?}",
            String::from_utf8_lossy(&buf)
        );
    }

    #[tokio::test]
    async fn ping_scenario() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();
                roundtrip(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
            })
            .await;
    }

    #[tokio::test]
    async fn echo_scenario() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();
                roundtrip(
                    &mut client,
                    b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n",
                    b"$5\r\nhello\r\n",
                )
                .await;
            })
            .await;
    }

    #[tokio::test]
    async fn set_get_scenario() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();
                roundtrip(
                    &mut client,
                    b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
                    b"+OK\r\n",
                )
                .await;
                roundtrip(
                    &mut client,
                    b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
                    b"$3\r\nbar\r\n",
                )
                .await;
            })
            .await;
    }

    #[tokio::test]
    async fn expiry_scenario() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                roundtrip(
                    &mut client,
                    b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nEX\r\n$1\r\n1\r\n",
                    b"+OK\r\n",
                )
                .await;
                roundtrip(&mut client, b"*2\r\n$3\r\nTTL\r\n$1\r\nk\r\n", b":1\r\n").await;

                tokio::time::sleep(Duration::from_millis(1100)).await;

                roundtrip(&mut client, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$-1\r\n").await;
                roundtrip(&mut client, b"*2\r\n$3\r\nTTL\r\n$1\r\nk\r\n", b":-2\r\n").await;
            })
            .await;
    }

    #[tokio::test]
    async fn del_scenario_counts_existing_only() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                roundtrip(
                    &mut client,
                    b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n",
                    b"+OK\r\n",
                )
                .await;
                roundtrip(
                    &mut client,
                    b"*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n",
                    b":1\r\n",
                )
                .await;
            })
            .await;
    }

    #[tokio::test]
    async fn unknown_command_scenario() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();
                roundtrip(
                    &mut client,
                    b"*2\r\n$7\r\nUNKNOWN\r\n$1\r\nx\r\n",
                    b"-ERR unknown command 'UNKNOWN'\r\n",
                )
                .await;
            })
            .await;
    }

    #[tokio::test]
    async fn cross_connection_visibility() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;

                let mut writer = TcpStream::connect(addr).await.unwrap();
                roundtrip(
                    &mut writer,
                    b"*3\r\n$3\r\nSET\r\n$6\r\nshared\r\n$3\r\nyes\r\n",
                    b"+OK\r\n",
                )
                .await;

                // The reply above acknowledges the write, so a second
                // connection must observe it.
                let mut reader = TcpStream::connect(addr).await.unwrap();
                roundtrip(
                    &mut reader,
                    b"*2\r\n$3\r\nGET\r\n$6\r\nshared\r\n",
                    b"$3\r\nyes\r\n",
                )
                .await;
            })
            .await;
    }

    #[tokio::test]
    async fn connections_beyond_max_clients_are_refused() {
        LocalSet::new()
            .run_until(async {
                let config = AppConfig {
                    max_clients: 1,
                    ..test_config()
                };
                let addr = start_server(config).await;

                let mut admitted = TcpStream::connect(addr).await.unwrap();
                roundtrip(&mut admitted, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

                // Second connection is accepted by the kernel, then
                // immediately closed by admission control.
                let mut refused = TcpStream::connect(addr).await.unwrap();
                let mut buf = Vec::new();
                let n = refused.read_to_end(&mut buf).await.unwrap();
                assert_eq!(n, 0);

                // The admitted client is unaffected.
                roundtrip(&mut admitted, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
            })
            .await;
    }

    #[tokio::test]
    async fn slot_frees_after_disconnect() {
        LocalSet::new()
            .run_until(async {
                let config = AppConfig {
                    max_clients: 1,
                    ..test_config()
                };
                let addr = start_server(config).await;

                let first = TcpStream::connect(addr).await.unwrap();
                // Let the acceptor register the connection before dropping.
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(first);
                tokio::time::sleep(Duration::from_millis(50)).await;

                let mut second = TcpStream::connect(addr).await.unwrap();
                roundtrip(&mut second, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
            })
            .await;
    }

    #[tokio::test]
    async fn active_expiration_reclaims_untouched_keys() {
        LocalSet::new()
            .run_until(async {
                let addr = start_server(test_config()).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                roundtrip(
                    &mut client,
                    b"*5\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\nv\r\n$2\r\nEX\r\n$1\r\n1\r\n",
                    b"+OK\r\n",
                )
                .await;

                // Wait past the deadline plus a couple of sweep ticks;
                // the key must be gone without ever being read.
                tokio::time::sleep(Duration::from_millis(1400)).await;

                roundtrip(&mut client, b"*2\r\n$3\r\nTTL\r\n$1\r\nx\r\n", b":-2\r\n").await;
            })
            .await;
    }
}
