//! Peer wire protocol and per-neighbor state.
//!
//! This module implements the handshake, the length-prefixed message
//! framing, the piece availability model, and the session that reacts to
//! each message from one neighbor. Neighbor selection (choking) and the
//! adaptive request pipeline live here too, since both operate directly on
//! session state.

mod bitfield;
mod choking;
mod error;
mod message;
mod peer_id;
mod rtt;
mod session;
mod stats;
mod transport;

pub use bitfield::PieceSet;
pub use choking::{ChokeScheduler, Transition};
pub use error::PeerError;
pub use message::{Handshake, Message, MessageId};
pub use peer_id::PeerId;
pub use rtt::{requests_to_issue, RttEstimator};
pub use session::NeighborSession;
pub use stats::TransferCounters;
pub use transport::{Connection, FrameReader, PeerTransport};
