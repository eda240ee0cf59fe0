//! Startup configuration.
//!
//! A [`Config`] comes either from one TOML file or from the legacy pair of
//! whitespace-separated files, `Common.cfg` and `PeerInfo.cfg`:
//!
//! ```text
//! # Common.cfg
//! NumberOfPreferredNeighbors 2
//! UnchokingInterval 5
//! OptimisticUnchokingInterval 15
//! FileName TheFile.dat
//! FileSize 10000232
//! PieceSize 32768
//!
//! # PeerInfo.cfg
//! 1001 lin114-00.cise.ufl.edu 6008 1
//! 1002 lin114-01.cise.ufl.edu 6008 0
//! ```
//!
//! Either way the result is validated before use; a configuration error is
//! fatal at startup.

use crate::constants::{
    DEFAULT_OPTIMISTIC_INTERVAL, DEFAULT_OPTIMISTIC_NEIGHBORS, DEFAULT_PIECE_SIZE,
    DEFAULT_PREFERRED_NEIGHBORS, DEFAULT_UNCHOKING_INTERVAL, MAX_FRAME_SIZE,
};
use crate::peer::PeerId;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Swarm-wide settings shared by every peer.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonConfig {
    #[serde(default = "default_preferred_neighbors")]
    pub preferred_neighbors: usize,
    /// Seconds between preferred-neighbor selections.
    #[serde(default = "default_unchoking_interval")]
    pub unchoking_interval: u64,
    #[serde(default = "default_optimistic_neighbors")]
    pub optimistic_neighbors: usize,
    /// Seconds between optimistic-neighbor selections.
    #[serde(default = "default_optimistic_interval")]
    pub optimistic_interval: u64,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default = "default_piece_size")]
    pub piece_size: u64,
}

/// One line of the peer list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerInfo {
    pub peer_id: u32,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub has_file: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `file` writes `log_peer_<id>.log`; `console` writes to stderr.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_preferred_neighbors() -> usize {
    DEFAULT_PREFERRED_NEIGHBORS
}

fn default_unchoking_interval() -> u64 {
    DEFAULT_UNCHOKING_INTERVAL
}

fn default_optimistic_neighbors() -> usize {
    DEFAULT_OPTIMISTIC_NEIGHBORS
}

fn default_optimistic_interval() -> u64 {
    DEFAULT_OPTIMISTIC_INTERVAL
}

fn default_piece_size() -> u64 {
    DEFAULT_PIECE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "file".to_string()
}

impl CommonConfig {
    pub fn piece_count(&self) -> usize {
        self.file_size.div_ceil(self.piece_size) as usize
    }

    /// Parses `Common.cfg` text. Unknown keys are ignored.
    pub fn parse_legacy(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut common = CommonConfig {
            preferred_neighbors: DEFAULT_PREFERRED_NEIGHBORS,
            unchoking_interval: DEFAULT_UNCHOKING_INTERVAL,
            optimistic_neighbors: DEFAULT_OPTIMISTIC_NEIGHBORS,
            optimistic_interval: DEFAULT_OPTIMISTIC_INTERVAL,
            file_name: String::new(),
            file_size: 0,
            piece_size: DEFAULT_PIECE_SIZE,
        };

        for (line_no, line) in text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                continue;
            };

            let parse_err = |reason: String| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", line_no + 1, reason),
            };
            let number = || -> Result<u64, ConfigError> {
                value
                    .parse::<u64>()
                    .map_err(|_| parse_err(format!("{key} expects a number, got {value:?}")))
            };

            match key {
                "NumberOfPreferredNeighbors" => common.preferred_neighbors = number()? as usize,
                "UnchokingInterval" => common.unchoking_interval = number()?,
                "NumberOfOptimisticNeighbors" => common.optimistic_neighbors = number()? as usize,
                "OptimisticUnchokingInterval" => common.optimistic_interval = number()?,
                "FileName" => common.file_name = value.to_string(),
                "FileSize" => common.file_size = number()?,
                "PieceSize" => common.piece_size = number()?,
                _ => {}
            }
        }

        Ok(common)
    }
}

impl PeerInfo {
    /// Parses `PeerInfo.cfg` text: `<peerID> <hostname> <port> <hasFile>`
    /// per line. Blank lines are skipped.
    pub fn parse_legacy(text: &str, path: &Path) -> Result<Vec<Self>, ConfigError> {
        let mut peers = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }

            let parse_err = |reason: &str| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", line_no + 1, reason),
            };

            let [id, hostname, port, has_file, ..] = fields.as_slice() else {
                return Err(parse_err("expected <peerID> <hostname> <port> <hasFile>"));
            };

            peers.push(PeerInfo {
                peer_id: id.parse().map_err(|_| parse_err("bad peer ID"))?,
                hostname: hostname.to_string(),
                port: port.parse().map_err(|_| parse_err("bad port"))?,
                has_file: match *has_file {
                    "1" => true,
                    "0" => false,
                    _ => return Err(parse_err("hasFile must be 0 or 1")),
                },
            });
        }

        Ok(peers)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `Common.cfg` and `PeerInfo.cfg`.
    pub fn from_legacy_files(common: &Path, peer_info: &Path) -> Result<Self, ConfigError> {
        let config = Config {
            common: CommonConfig::parse_legacy(&read(common)?, common)?,
            peers: PeerInfo::parse_legacy(&read(peer_info)?, peer_info)?,
            logging: LoggingConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let common = &self.common;

        if common.file_name.trim().is_empty() {
            return invalid("file_name must not be empty".into());
        }
        if common.file_size == 0 {
            return invalid("file_size must be greater than 0".into());
        }
        if common.piece_size == 0 {
            return invalid("piece_size must be greater than 0".into());
        }
        // A PIECE frame carries the type byte and index ahead of the data.
        if common.piece_size > (MAX_FRAME_SIZE - 5) as u64 {
            return invalid(format!(
                "piece_size {} exceeds the {} byte frame limit",
                common.piece_size, MAX_FRAME_SIZE
            ));
        }
        if common.preferred_neighbors == 0 {
            return invalid("preferred_neighbors must be at least 1".into());
        }
        if common.optimistic_neighbors == 0 {
            return invalid("optimistic_neighbors must be at least 1".into());
        }
        if common.unchoking_interval == 0 {
            return invalid("unchoking_interval must be at least 1 second".into());
        }
        if common.optimistic_interval == 0 {
            return invalid("optimistic_interval must be at least 1 second".into());
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if PeerId::new(peer.peer_id).is_none() {
                return invalid(format!("peer ID {} is out of range", peer.peer_id));
            }
            if !seen.insert(peer.peer_id) {
                return invalid(format!("duplicate peer ID {}", peer.peer_id));
            }
        }

        let valid_formats = ["file", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return invalid(format!(
                "invalid log format '{}', must be one of: file, console",
                self.logging.format
            ));
        }

        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.common.piece_count()
    }

    /// The peer list entry for `id`.
    pub fn host(&self, id: PeerId) -> Result<&PeerInfo, ConfigError> {
        self.peers
            .iter()
            .find(|p| p.peer_id == id.get())
            .ok_or_else(|| ConfigError::Invalid(format!("peer {id} is not in the peer list")))
    }

    /// The peers `id` must dial itself: every peer listed before it.
    pub fn known_peers_for(&self, id: PeerId) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .take_while(|p| p.peer_id != id.get())
            .cloned()
            .collect()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
