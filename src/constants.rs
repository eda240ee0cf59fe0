//! Protocol constants and tuning parameters.
//!
//! Wire-level values are fixed by the protocol and must match every other
//! peer in the swarm. Timing values control the background workers.

use std::time::Duration;

// ============================================================================
// Handshake
// ============================================================================

/// Literal that opens every handshake, zero-padded to [`HANDSHAKE_HEADER_LEN`].
pub const HANDSHAKE_PREAMBLE: &[u8] = b"P2PFILESHARINGPROJ";

/// Length of the preamble including its zero padding.
pub const HANDSHAKE_HEADER_LEN: usize = 28;

/// Full handshake length: padded preamble plus a 4-byte peer ID.
pub const HANDSHAKE_LEN: usize = HANDSHAKE_HEADER_LEN + 4;

/// Timeout for each direction of the handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Framing
// ============================================================================

/// Largest frame accepted from a neighbor (type byte + payload).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Initial capacity of a session's read buffer.
pub const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Timeout for writing a single frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Request pipelining
// ============================================================================

/// In-flight requests per neighbor above which the pipeline stops growing.
pub const MAX_IN_FLIGHT_REQUESTS: usize = 200;

/// Requests added to the pipeline after a sample within the expected RTT.
pub const PIPELINE_GROWTH: usize = 2;

// ============================================================================
// Background workers
// ============================================================================

/// Tick of the choke scheduler; selection intervals are whole multiples of it.
pub const SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Tick of the rate limiter's retry loop for delayed sends.
pub const RATE_LIMIT_TICK: Duration = Duration::from_millis(100);

/// Delay between rounds of outbound connection attempts.
pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Timeout for a single outbound TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Shutdown
// ============================================================================

/// Pause after clearing the running flag so in-flight sends can finish.
pub const SHUTDOWN_DRAIN_DELAY: Duration = Duration::from_secs(1);

/// Grace period for session workers to exit before they are aborted.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

// ============================================================================
// Configuration defaults
// ============================================================================

/// Default piece size in bytes.
pub const DEFAULT_PIECE_SIZE: u64 = 65536;

/// Default number of preferred neighbors.
pub const DEFAULT_PREFERRED_NEIGHBORS: usize = 5;

/// Default preferred unchoking interval in seconds.
pub const DEFAULT_UNCHOKING_INTERVAL: u64 = 10;

/// Default number of optimistic neighbors.
pub const DEFAULT_OPTIMISTIC_NEIGHBORS: usize = 1;

/// Default optimistic unchoking interval in seconds.
pub const DEFAULT_OPTIMISTIC_INTERVAL: u64 = 20;

/// Rate limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;
