//! Configuration file handling
//!
//! The gateway reads a single TOML file. Listener addresses, log format and
//! worker count are only honoured at start-up; routes and block size are
//! re-read on every reload.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as _, Result, anyhow, bail};
use backend::cache::WORKERS_RANGE;
use backend::context::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use backend::reqwest::Client;
use backend::{CacheConfig, CacheQueue, Context, DEFAULT_BLOCK_SIZE, RouteConfig, RouteTable};
use serde::Deserialize;
use tracing::warn;

/// Configuration file used when none is given on the command line
pub const DEFAULT_CONFIG: &str = "/etc/bootgate.toml";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Protocol served by a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tftp,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tftp => "tftp",
            Protocol::Http => "http",
        })
    }
}

/// A `<proto>@<address>` listen entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub protocol: Protocol,
    pub address: SocketAddr,
}

impl FromStr for Listener {
    type Err = anyhow::Error;

    fn from_str(entry: &str) -> Result<Self> {
        let (protocol, address) = entry
            .trim()
            .split_once('@')
            .ok_or_else(|| anyhow!("missing protocol prefix"))?;
        let protocol = match protocol.trim().to_ascii_lowercase().as_str() {
            "tftp" => Protocol::Tftp,
            "http" => Protocol::Http,
            other => bail!("unsupported protocol {other:?}"),
        };

        // "*:69" means every address
        let address = address.trim();
        let address = match address.strip_prefix('*') {
            Some(port) => format!("0.0.0.0{port}"),
            None => address.to_string(),
        };
        let address = address
            .parse()
            .with_context(|| format!("invalid address {address:?}"))?;

        Ok(Self { protocol, address })
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.protocol, self.address)
    }
}

fn default_listen() -> Vec<String> {
    vec!["tftp@0.0.0.0:69".to_string()]
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_cache_workers() -> usize {
    WORKERS_RANGE.1
}

/// Parsed configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: Vec<String>,
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    #[serde(default = "default_cache_workers")]
    pub cache_workers: usize,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Settings {
    /// Read and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid configuration {}", path.display()))
    }

    /// Parse configuration text; route patterns are compiled to catch errors
    /// before anything is served
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        RouteTable::new(&settings.routes, Client::new())?;
        Ok(settings)
    }

    /// Valid listen entries; malformed ones are logged and skipped
    pub fn listeners(&self) -> Vec<Listener> {
        self.listen
            .iter()
            .filter_map(|entry| match entry.parse::<Listener>() {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!(scope = "server", entry = %entry, error = %e, "Ignoring listen entry");
                    None
                }
            })
            .collect()
    }

    /// Cache engine tunables derived from this file
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            workers: self.cache_workers.clamp(WORKERS_RANGE.0, WORKERS_RANGE.1),
            block_size: self.block_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
            ..CacheConfig::default()
        }
    }

    /// Build a serving snapshot around an existing cache queue
    pub fn context(&self, cache: CacheQueue, client: Client) -> Result<Context> {
        let routes = RouteTable::new(&self.routes, client).context("Failed to compile routes")?;
        Ok(Context::new(routes, cache, self.block_size))
    }
}
