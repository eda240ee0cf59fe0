//! swarmcast - A small-swarm file sharing peer
//!
//! A fixed set of peers, listed in a shared configuration, cooperatively
//! distribute one file split into fixed-size pieces. Each peer runs the
//! same protocol: a fixed handshake, a framed message stream, and a
//! periodic choke/unchoke scheduler that rewards neighbors which upload to
//! it while reserving slots for random newcomers.
//!
//! # Modules
//!
//! - [`peer`] - Handshake, message framing, piece sets, neighbor sessions, choking
//! - [`bandwidth`] - Per-neighbor download/upload budgets and delayed sends
//! - [`swarm`] - The host: session registry, listener, dialer, background workers
//! - [`storage`] - Piece-indexed file access and progress snapshots
//! - [`config`] - TOML and legacy `Common.cfg`/`PeerInfo.cfg` loading
//! - [`constants`] - Protocol constants and timings

pub mod bandwidth;
pub mod config;
pub mod constants;
pub mod peer;
pub mod storage;
pub mod swarm;

pub use bandwidth::RateLimiter;
pub use config::{CommonConfig, Config, ConfigError, LoggingConfig, PeerInfo};
pub use peer::{
    ChokeScheduler, Handshake, Message, MessageId, NeighborSession, PeerError, PeerId,
    PeerTransport, PieceSet,
};
pub use storage::{ProgressFile, SharedFile, StorageError};
pub use swarm::{file_health, PeerRole, PeerSummary, Swarm, SwarmError, SwarmSummary};
