//! Configuration
//!
//! Settings come from two places, in increasing precedence: a JSON
//! document read at startup (missing file is non-fatal) and command-line
//! flags. The merged result is validated once, before any socket is
//! bound; everything after that treats the configuration as immutable.
//!
//! Recognized document keys (camelCase): `host`, `port`, `keysLimit`,
//! `evictionStrategy`, `autoDeleteFrequency`, `maxClients`, `logLevel`.

use crate::storage::{EvictionPolicy, UnknownPolicy};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Config file consulted when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// The merged server configuration. Immutable after validation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// IPv4 address to bind.
    pub host: String,
    pub port: u16,
    /// Upper bound on resident keys; eviction keeps the store under it.
    pub keys_limit: usize,
    /// One of `simple-first`, `lru`, `random`.
    pub eviction_strategy: String,
    /// Interval between active-expiration sweeps, e.g. `1s` or `250ms`.
    pub auto_delete_frequency: String,
    pub max_clients: usize,
    /// One of `debug`, `info`, `warn`, `error`.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7379,
            keys_limit: 1000,
            eviction_strategy: "simple-first".to_string(),
            auto_delete_frequency: "1s".to_string(),
            max_clients: 20000,
            log_level: "info".to_string(),
        }
    }
}

/// A validation failure. Any of these aborts startup with a non-zero
/// exit before a socket is bound.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid port number: {0}")]
    InvalidPort(u16),

    #[error("keys limit must be greater than 0")]
    InvalidKeysLimit,

    #[error("max clients must be greater than 0")]
    InvalidMaxClients,

    #[error("invalid IPv4 host address: {0}")]
    InvalidHost(String),

    #[error(transparent)]
    InvalidEviction(#[from] UnknownPolicy),

    #[error("invalid auto delete frequency: {0}")]
    InvalidDuration(String),

    #[error("invalid log level: {0} (expected debug, info, warn or error)")]
    InvalidLogLevel(String),
}

impl AppConfig {
    /// Reads and deserializes a config document.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let config: AppConfig = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// File config (when present) merged with CLI flag overrides.
    ///
    /// A missing file is non-fatal: defaults apply and flags still
    /// override. An unreadable or unparseable file is fatal.
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let config = Self::load_from_file(&path)?;
            eprintln!("Loaded configuration from {}", path.display());
            config
        } else {
            eprintln!("Config file not found, using defaults and command line arguments");
            Self::default()
        };

        if let Some(ref host) = cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(keys_limit) = cli.keys_limit {
            config.keys_limit = keys_limit;
        }
        if let Some(ref eviction) = cli.eviction {
            config.eviction_strategy = eviction.clone();
        }
        if let Some(max_clients) = cli.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(ref log_level) = cli.log_level {
            config.log_level = log_level.clone();
        }

        Ok(config)
    }

    /// Checks every field; called once before serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.keys_limit == 0 {
            return Err(ConfigError::InvalidKeysLimit);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::InvalidMaxClients);
        }

        self.host_addr()?;
        self.eviction_policy()?;
        self.auto_delete_interval()?;
        self.tracing_level()?;

        Ok(())
    }

    pub fn host_addr(&self) -> Result<Ipv4Addr, ConfigError> {
        Ipv4Addr::from_str(&self.host).map_err(|_| ConfigError::InvalidHost(self.host.clone()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        Ok(SocketAddrV4::new(self.host_addr()?, self.port))
    }

    pub fn eviction_policy(&self) -> Result<EvictionPolicy, ConfigError> {
        Ok(self.eviction_strategy.parse::<EvictionPolicy>()?)
    }

    pub fn auto_delete_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.auto_delete_frequency)
            .ok_or_else(|| ConfigError::InvalidDuration(self.auto_delete_frequency.clone()))
    }

    pub fn tracing_level(&self) -> Result<Level, ConfigError> {
        match self.log_level.as_str() {
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

/// Parses a duration string: a non-negative integer with a `us`, `ms`,
/// `s`, `m` or `h` suffix.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    let (number, unit): (&str, fn(u64) -> Duration) = if let Some(n) = value.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = value.strip_suffix("us") {
        (n, Duration::from_micros)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, |v| Duration::from_secs(v * 60))
    } else if let Some(n) = value.strip_suffix('h') {
        (n, |v| Duration::from_secs(v * 3600))
    } else {
        return None;
    };

    number.trim().parse::<u64>().ok().map(unit)
}

/// Flags accepted on the command line. Every value flag overrides the
/// corresponding config-file field.
#[derive(Debug, Default, Clone)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub keys_limit: Option<usize>,
    pub eviction: Option<String>,
    pub max_clients: Option<usize>,
    pub log_level: Option<String>,
    pub help: bool,
    pub version: bool,
}

impl CliArgs {
    /// Parses `args` (including the program name at index 0). Unknown
    /// flags and unparseable values are fatal.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut cli = CliArgs::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    cli.config = Some(PathBuf::from(next_value(args, &mut i)?));
                }
                "--host" => {
                    cli.host = Some(next_value(args, &mut i)?.to_string());
                }
                "--port" | "-p" => {
                    let value = next_value(args, &mut i)?;
                    cli.port = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid port number: {}", value))?,
                    );
                }
                "--keys-limit" => {
                    let value = next_value(args, &mut i)?;
                    cli.keys_limit = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid keys limit: {}", value))?,
                    );
                }
                "--eviction" => {
                    cli.eviction = Some(next_value(args, &mut i)?.to_string());
                }
                "--max-clients" => {
                    let value = next_value(args, &mut i)?;
                    cli.max_clients = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid max clients: {}", value))?,
                    );
                }
                "--log-level" => {
                    cli.log_level = Some(next_value(args, &mut i)?.to_string());
                }
                "--help" | "-h" => cli.help = true,
                "--version" | "-v" => cli.version = true,
                other => bail!("unknown argument: {}", other),
            }
            i += 1;
        }

        Ok(cli)
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    match args.get(*i) {
        Some(value) => Ok(value),
        None => bail!("{} requires a value", flag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(parts: &[&str]) -> Vec<String> {
        std::iter::once("emberkv")
            .chain(parts.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 7379);
        assert_eq!(config.keys_limit, 1000);
        assert_eq!(config.eviction_strategy, "simple-first");
    }

    #[test]
    fn document_uses_camel_case_keys() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "host": "127.0.0.1",
                "port": 6380,
                "keysLimit": 50,
                "evictionStrategy": "lru",
                "autoDeleteFrequency": "250ms",
                "maxClients": 64,
                "logLevel": "debug"
            }"#,
        )
        .unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6380);
        assert_eq!(config.keys_limit, 50);
        assert_eq!(config.eviction_policy().unwrap(), EvictionPolicy::Lru);
        assert_eq!(
            config.auto_delete_interval().unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(config.max_clients, 64);
        assert_eq!(config.tracing_level().unwrap(), Level::DEBUG);
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"port": 6380}"#).unwrap();
        assert_eq!(config.port, 6380);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.keys_limit, 1000);
    }

    #[test]
    fn flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 6380, "keysLimit": 10}}"#).unwrap();

        let cli = CliArgs::parse(&args(&[
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "6400",
        ]))
        .unwrap();

        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config.port, 6400);
        assert_eq!(config.keys_limit, 10);
    }

    #[test]
    fn missing_config_file_is_non_fatal() {
        let cli = CliArgs::parse(&args(&["--config", "/nonexistent/emberkv.json"])).unwrap();
        let config = AppConfig::load(&cli).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn malformed_config_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let cli = CliArgs::parse(&args(&["--config", file.path().to_str().unwrap()])).unwrap();
        assert!(AppConfig::load(&cli).is_err());
    }

    #[test]
    fn validation_rejects_zero_port() {
        let config = AppConfig {
            port: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn validation_rejects_zero_keys_limit() {
        let config = AppConfig {
            keys_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidKeysLimit));
    }

    #[test]
    fn validation_rejects_zero_max_clients() {
        let config = AppConfig {
            max_clients: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxClients));
    }

    #[test]
    fn validation_rejects_unknown_eviction_strategy() {
        let config = AppConfig {
            eviction_strategy: "lfu".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEviction(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_duration() {
        let config = AppConfig {
            auto_delete_frequency: "often".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_log_level() {
        let config = AppConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn validation_rejects_non_ipv4_host() {
        for host in ["::1", "localhost", "10.0.0"] {
            let config = AppConfig {
                host: host.to_string(),
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidHost(_))),
                "host {:?} should be rejected",
                host
            );
        }
    }

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("10us"), Some(Duration::from_micros(10)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("-1s"), None);
    }

    #[test]
    fn cli_parses_every_flag() {
        let cli = CliArgs::parse(&args(&[
            "--host",
            "127.0.0.1",
            "--port",
            "6400",
            "--keys-limit",
            "500",
            "--eviction",
            "random",
            "--max-clients",
            "128",
            "--log-level",
            "warn",
            "--config",
            "server.json",
        ]))
        .unwrap();

        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(6400));
        assert_eq!(cli.keys_limit, Some(500));
        assert_eq!(cli.eviction.as_deref(), Some("random"));
        assert_eq!(cli.max_clients, Some(128));
        assert_eq!(cli.log_level.as_deref(), Some("warn"));
        assert_eq!(cli.config.as_deref(), Some(Path::new("server.json")));
    }

    #[test]
    fn cli_rejects_unknown_flag() {
        assert!(CliArgs::parse(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn cli_rejects_flag_without_value() {
        assert!(CliArgs::parse(&args(&["--port"])).is_err());
    }

    #[test]
    fn cli_rejects_unparseable_port() {
        assert!(CliArgs::parse(&args(&["--port", "seven"])).is_err());
    }
}
