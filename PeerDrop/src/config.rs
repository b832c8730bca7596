use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use peer_link::RtcConfig;
use thiserror::Error;

pub const DEFAULT_LINK_BASE: &str = "peerdrop://receive/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    /// Relay address, used by the relay to listen and by peers to connect.
    pub server_addr: String,
    pub max_clients: usize,
    pub log_file: String,
    /// Prefix of the share link; the peer identifier is appended.
    pub link_base: String,
    /// Listener of the direct connection.
    pub bind_addr: String,
    pub handshake_timeout_secs: u64,
    pub check_timeout_ms: u64,
    pub include_loopback: bool,
    /// `host:port` of a STUN server; unset means host candidates only.
    pub stun_server: Option<String>,
    pub download_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8443".to_string(),
            max_clients: 100,
            log_file: "peerdrop.log".to_string(),
            link_base: DEFAULT_LINK_BASE.to_string(),
            bind_addr: "0.0.0.0:0".to_string(),
            handshake_timeout_secs: 30,
            check_timeout_ms: 3000,
            include_loopback: true,
            stun_server: None,
            download_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /// Loads `path`, keeping defaults for missing keys or a missing file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut cfg = AppConfig::default();
        let entries = parse_kv(content);

        if let Some(addr) = entries.get("server_addr") {
            cfg.server_addr = addr.clone();
        }
        if let Some(max) = parse_entry(&entries, "max_clients")? {
            cfg.max_clients = max;
        }
        if let Some(log) = entries.get("log_file") {
            cfg.log_file = log.clone();
        }
        if let Some(base) = entries.get("link_base") {
            cfg.link_base = base.clone();
        }
        if let Some(bind) = entries.get("bind_addr") {
            cfg.bind_addr = bind.clone();
        }
        if let Some(secs) = parse_entry(&entries, "handshake_timeout_secs")? {
            cfg.handshake_timeout_secs = secs;
        }
        if let Some(ms) = parse_entry(&entries, "check_timeout_ms")? {
            cfg.check_timeout_ms = ms;
        }
        if let Some(loopback) = parse_entry(&entries, "include_loopback")? {
            cfg.include_loopback = loopback;
        }
        if let Some(server) = entries.get("stun_server") {
            cfg.stun_server = Some(server.clone()).filter(|server| !server.is_empty());
        }
        if let Some(dir) = entries.get("download_dir") {
            cfg.download_dir = PathBuf::from(dir);
        }

        Ok(cfg)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn rtc_config(&self) -> RtcConfig {
        RtcConfig {
            bind_addr: self.bind_addr.clone(),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            include_loopback: self.include_loopback,
            stun_server: self.stun_server.clone(),
        }
    }
}

fn parse_entry<T: FromStr>(
    entries: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match entries.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
            }),
    }
}

fn parse_kv(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}
