//! EmberKV server entry point.
//!
//! Startup order: parse flags, merge with the config document, validate,
//! install logging, then serve on a current-thread runtime until Ctrl+C.
//! Configuration and bind failures exit non-zero before any client is
//! served.

use anyhow::Context;
use emberkv::config::{AppConfig, CliArgs};
use emberkv::Server;
use tokio::signal;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = CliArgs::parse(&args)?;

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("EmberKV version {}", emberkv::VERSION);
        return Ok(());
    }

    let config = AppConfig::load(&cli)?;
    config.validate().context("invalid configuration")?;

    FmtSubscriber::builder()
        .with_max_level(config.tracing_level()?)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    // Single OS thread: the runtime's reactor multiplexes readiness, the
    // LocalSet hosts the acceptor, connections, and the expiry ticker.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    runtime.block_on(local.run_until(async {
        let server = Server::new(config);
        tokio::select! {
            result = server.run() => result,
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping server");
                Ok(())
            }
        }
    }))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        // With no signal handler, park forever rather than busy-loop.
        std::future::pending::<()>().await;
    }
}

fn print_banner(config: &AppConfig) {
    println!(
        r#"
EmberKV v{} - Minimal In-Memory Key-Value Server
────────────────────────────────────────────────
Listening on     {}:{}
Keys limit       {}
Eviction         {}
Sweep interval   {}
Max clients      {}

Use Ctrl+C to shut down.
"#,
        emberkv::VERSION,
        config.host,
        config.port,
        config.keys_limit,
        config.eviction_strategy,
        config.auto_delete_frequency,
        config.max_clients,
    );
}

fn print_help() {
    println!(
        r#"
EmberKV - Minimal In-Memory Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
        --host <ADDR>          IPv4 address to bind (default: 0.0.0.0)
    -p, --port <PORT>          Port to listen on (default: 7379)
        --keys-limit <N>       Maximum number of resident keys (default: 1000)
        --eviction <POLICY>    simple-first, lru or random (default: simple-first)
        --max-clients <N>      Maximum concurrent clients (default: 20000)
        --log-level <LEVEL>    debug, info, warn or error (default: info)
    -c, --config <PATH>        JSON config file (default: config.json; missing file is fine)
    -h, --help                 Print this help message
    -v, --version              Print version information

Flags override config file values.

CONNECTING:
    Any RESP client works:
    $ redis-cli -p 7379
    127.0.0.1:7379> SET greeting hello EX 60
    OK
    127.0.0.1:7379> GET greeting
    "hello"
"#
    );
}
