use super::bitfield::{pick_random, PieceSet};
use super::error::PeerError;
use super::message::Message;
use super::peer_id::PeerId;
use super::rtt::{requests_to_issue, RttEstimator};
use super::stats::TransferCounters;
use super::transport::{Connection, FrameReader};
use crate::swarm::Swarm;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, trace, warn};

/// Everything the host knows about one remote peer.
///
/// A session outlives any single socket: when the connection drops it moves
/// to the swarm's inactive set, and a later reconnect
/// [reactivates](Self::reactivate) it with cumulative counters intact.
///
/// Flags and counters are individually atomic so the choke scheduler, the
/// rate limiter and other sessions' workers can touch them without
/// contending with this session's read loop.
pub struct NeighborSession {
    peer_id: PeerId,
    hostname: String,
    port: u16,
    pieces: RwLock<PieceSet>,
    preferred_by_host: AtomicBool,
    optimistic_by_host: AtomicBool,
    interested_in_host: AtomicBool,
    previous_interest_of_host: AtomicBool,
    unchoked_host: AtomicBool,
    counters: TransferCounters,
    in_flight: Mutex<HashMap<u32, Instant>>,
    rtt: Mutex<RttEstimator>,
    connection: RwLock<Option<Arc<Connection>>>,
}

impl NeighborSession {
    pub fn new(peer_id: PeerId, addr: SocketAddr, piece_count: usize) -> Self {
        Self {
            peer_id,
            hostname: addr.ip().to_string(),
            port: addr.port(),
            pieces: RwLock::new(PieceSet::new(piece_count)),
            preferred_by_host: AtomicBool::new(false),
            optimistic_by_host: AtomicBool::new(false),
            interested_in_host: AtomicBool::new(false),
            previous_interest_of_host: AtomicBool::new(false),
            unchoked_host: AtomicBool::new(false),
            counters: TransferCounters::new(),
            in_flight: Mutex::new(HashMap::new()),
            rtt: Mutex::new(RttEstimator::new()),
            connection: RwLock::new(None),
        }
    }

    /// Creates a session already bound to a connection.
    pub fn with_connection(peer_id: PeerId, connection: Arc<Connection>, piece_count: usize) -> Self {
        let session = Self::new(peer_id, connection.addr(), piece_count);
        *session.connection.write() = Some(connection);
        session
    }

    /// Binds a new connection after a reconnect.
    ///
    /// Choke and interest flags, in-flight requests, the RTT estimate and
    /// the sub-interval counters start over. Identity, the neighbor's piece
    /// set and cumulative counters are kept.
    pub fn reactivate(&self, connection: Arc<Connection>) {
        self.preferred_by_host.store(false, Ordering::Relaxed);
        self.optimistic_by_host.store(false, Ordering::Relaxed);
        self.previous_interest_of_host.store(false, Ordering::Relaxed);
        self.interested_in_host.store(false, Ordering::Relaxed);
        self.unchoked_host.store(false, Ordering::Relaxed);
        self.in_flight.lock().clear();
        *self.rtt.lock() = RttEstimator::new();
        self.counters.reset_sub();

        if let Some(old) = self.connection.write().replace(connection) {
            old.close();
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// IP address of the current socket, if any.
    pub fn ip_address(&self) -> Option<String> {
        self.connection
            .read()
            .as_ref()
            .map(|conn| conn.addr().ip().to_string())
    }

    pub fn pieces(&self) -> &RwLock<PieceSet> {
        &self.pieces
    }

    pub fn counters(&self) -> &TransferCounters {
        &self.counters
    }

    pub fn is_preferred_by_host(&self) -> bool {
        self.preferred_by_host.load(Ordering::Relaxed)
    }

    pub fn set_preferred_by_host(&self, value: bool) {
        self.preferred_by_host.store(value, Ordering::Relaxed);
    }

    pub fn is_optimistic_by_host(&self) -> bool {
        self.optimistic_by_host.load(Ordering::Relaxed)
    }

    pub fn set_optimistic_by_host(&self, value: bool) {
        self.optimistic_by_host.store(value, Ordering::Relaxed);
    }

    /// True if the host currently lets this neighbor request pieces.
    pub fn is_unchoked_by_host(&self) -> bool {
        self.is_preferred_by_host() || self.is_optimistic_by_host()
    }

    pub fn is_interested_in_host(&self) -> bool {
        self.interested_in_host.load(Ordering::Relaxed)
    }

    pub fn set_interested_in_host(&self, value: bool) {
        self.interested_in_host.store(value, Ordering::Relaxed);
    }

    /// The interest value the host last sent to this neighbor.
    pub fn previous_interest_of_host(&self) -> bool {
        self.previous_interest_of_host.load(Ordering::Relaxed)
    }

    /// True if the neighbor has unchoked the host.
    pub fn has_unchoked_host(&self) -> bool {
        self.unchoked_host.load(Ordering::Relaxed)
    }

    pub fn set_unchoked_host(&self, value: bool) {
        self.unchoked_host.store(value, Ordering::Relaxed);
    }

    pub fn has_complete_file(&self) -> bool {
        self.pieces.read().is_complete()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, piece: u32) -> bool {
        self.in_flight.lock().contains_key(&piece)
    }

    /// Smoothed RTT and deviation, once at least one sample exists.
    pub fn rtt_estimate(&self) -> Option<(Duration, Duration)> {
        let rtt = self.rtt.lock();
        rtt.estimated().map(|est| (est, rtt.deviation()))
    }

    /// Records a REQUEST as in flight. Returns false if that piece is
    /// already outstanding with this neighbor.
    pub fn begin_request(&self, piece: u32) -> bool {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(&piece) {
            return false;
        }
        in_flight.insert(piece, Instant::now());
        true
    }

    /// Removes a satisfied request, returning when it was sent.
    pub fn finish_request(&self, piece: u32) -> Option<Instant> {
        self.in_flight.lock().remove(&piece)
    }

    /// Forgets in-flight requests for pieces the host already got from
    /// another neighbor. Their PIECE, if it ever arrives, is dropped.
    pub fn drop_satisfied_requests(&self, swarm: &Swarm) {
        let host = swarm.host_pieces().read();
        self.in_flight
            .lock()
            .retain(|piece, _| !host.has_piece(*piece as usize));
    }

    /// True if the host lacks at least one piece this neighbor has.
    pub fn host_interested(&self, swarm: &Swarm) -> bool {
        let host = swarm.host_pieces().read();
        host.is_interested_in(&self.pieces.read())
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .read()
            .as_ref()
            .is_some_and(|conn| !conn.is_closed())
    }

    /// Force-closes the current socket, unblocking the read loop.
    pub fn close(&self) {
        if let Some(conn) = self.connection.read().as_ref() {
            conn.close();
        }
    }

    async fn write(&self, message: &Message) -> Result<(), PeerError> {
        let conn = self
            .connection
            .read()
            .clone()
            .ok_or(PeerError::ConnectionClosed)?;
        conn.send_message(message).await
    }

    pub async fn send_choke(&self) -> Result<(), PeerError> {
        self.write(&Message::Choke).await
    }

    pub async fn send_unchoke(&self) -> Result<(), PeerError> {
        self.write(&Message::Unchoke).await
    }

    /// Sends INTERESTED or NOT_INTERESTED and remembers which was sent.
    pub async fn send_interest(&self, interested: bool) -> Result<(), PeerError> {
        self.previous_interest_of_host
            .store(interested, Ordering::Relaxed);
        let message = if interested {
            Message::Interested
        } else {
            Message::NotInterested
        };
        self.write(&message).await
    }

    /// HAVE is never rate limited.
    pub async fn send_have(&self, piece: u32) -> Result<(), PeerError> {
        self.write(&Message::Have { piece }).await
    }

    /// Sends a REQUEST unless it would duplicate an in-flight one.
    ///
    /// Over the download budget the request is handed to the rate limiter
    /// and retried on its tick.
    pub async fn send_request(&self, swarm: &Swarm, piece: u32) -> Result<(), PeerError> {
        if self.is_in_flight(piece) {
            return Ok(());
        }

        if swarm.limiter().has_reached_download_limit(self) {
            swarm.limiter().delay_request(self.peer_id, piece);
            return Ok(());
        }

        if !self.begin_request(piece) {
            return Ok(());
        }

        let result = self.write(&Message::Request { piece }).await;
        if result.is_err() {
            self.finish_request(piece);
        }
        result
    }

    /// Sends a PIECE, or queues it with the rate limiter.
    ///
    /// Deliveries to one neighbor are serialized: while a PIECE is queued
    /// for it, new ones join the queue. `from_queue` marks a retry coming
    /// from the rate limiter itself.
    pub async fn send_piece(
        &self,
        swarm: &Swarm,
        piece: u32,
        from_queue: bool,
    ) -> Result<(), PeerError> {
        let limiter = swarm.limiter();
        if (!from_queue && limiter.has_delayed_piece(self.peer_id))
            || limiter.has_reached_upload_limit(self)
        {
            limiter.delay_piece(self.peer_id, piece);
            return Ok(());
        }

        let index = piece as usize;
        if !swarm.host_pieces().read().has_piece(index) {
            debug!(host = %swarm.host_id(), peer = %self.peer_id, piece, "request for a piece the host does not have");
            return Ok(());
        }

        let data = swarm.storage().read_piece(index).await;
        if data.is_empty() {
            warn!(host = %swarm.host_id(), peer = %self.peer_id, piece, "failed to read piece for upload");
            return Ok(());
        }

        self.counters.add_uploaded(data.len() as u64);
        self.write(&Message::Piece { piece, data }).await
    }

    /// Issues up to `count` REQUESTs for random pieces the neighbor has,
    /// the host lacks and that are not already in flight.
    pub async fn request_pieces(&self, swarm: &Swarm, count: usize) -> Result<(), PeerError> {
        for _ in 0..count {
            let Some(piece) = self.pick_request(swarm) else {
                break;
            };
            self.send_request(swarm, piece).await?;
        }
        Ok(())
    }

    fn pick_request(&self, swarm: &Swarm) -> Option<u32> {
        let candidates = {
            let host = swarm.host_pieces().read();
            host.interesting_pieces(&self.pieces.read())
        };
        let in_flight = self.in_flight.lock();
        let candidates: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| !in_flight.contains_key(&(i as u32)))
            .collect();
        drop(in_flight);
        pick_random(&candidates).map(|i| i as u32)
    }

    /// The session's read loop. Runs until the socket fails, the
    /// connection is closed, or the swarm stops.
    pub(crate) async fn run(
        self: Arc<Self>,
        swarm: Arc<Swarm>,
        mut reader: FrameReader<OwnedReadHalf>,
        conn: Arc<Connection>,
    ) {
        while swarm.is_running() {
            let received = tokio::select! {
                result = reader.receive_message() => result,
                _ = conn.closed() => break,
            };

            let result = match received {
                Ok(message) => self.handle_message(&swarm, message).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                debug!(host = %swarm.host_id(), peer = %self.peer_id, error = %e, "session ended");
                break;
            }
        }

        conn.shutdown().await;

        if swarm.is_running() {
            info!(host = %swarm.host_id(), peer = %self.peer_id, "connection lost");
            swarm.deregister(&self);
        }
    }

    /// Reacts to one decoded message.
    pub async fn handle_message(&self, swarm: &Swarm, message: Message) -> Result<(), PeerError> {
        let host = swarm.host_id();
        let peer = self.peer_id;

        match message {
            Message::Choke => {
                self.set_unchoked_host(false);
                info!(%host, %peer, "choked by neighbor");
            }
            Message::Unchoke => {
                self.set_unchoked_host(true);
                info!(%host, %peer, "unchoked by neighbor");
                if self.host_interested(swarm) {
                    self.request_pieces(swarm, 1).await?;
                } else {
                    self.send_interest(false).await?;
                }
            }
            Message::Interested => {
                self.set_interested_in_host(true);
                info!(%host, %peer, "received interested");
            }
            Message::NotInterested => {
                self.set_interested_in_host(false);
                info!(%host, %peer, "received not interested");
            }
            Message::Have { piece } => {
                self.pieces.write().mark_complete(piece as usize);
                info!(%host, %peer, piece, "received have");
                if !self.previous_interest_of_host() && self.host_interested(swarm) {
                    self.send_interest(true).await?;
                    if self.has_unchoked_host() {
                        self.request_pieces(swarm, 1).await?;
                    }
                }
            }
            Message::Bitfield(bits) => {
                self.pieces.write().replace_from_wire(&bits);
                debug!(%host, %peer, pieces = self.pieces.read().count(), "received bitfield");
                let interested = self.host_interested(swarm);
                self.send_interest(interested).await?;
            }
            Message::Request { piece } => {
                if self.is_unchoked_by_host() {
                    self.send_piece(swarm, piece, false).await?;
                } else {
                    self.send_choke().await?;
                    swarm.limiter().delay_piece(peer, piece);
                }
            }
            Message::Piece { piece, data } => {
                self.handle_piece(swarm, piece, data).await?;
            }
        }

        Ok(())
    }

    async fn handle_piece(&self, swarm: &Swarm, piece: u32, data: Bytes) -> Result<(), PeerError> {
        let host = swarm.host_id();
        let peer = self.peer_id;

        let Some(sent_at) = self.finish_request(piece) else {
            debug!(%host, %peer, piece, "dropping piece with no matching request");
            return Ok(());
        };

        let sample = sent_at.elapsed();
        let straggler = self.rtt.lock().observe(sample);

        self.counters.add_downloaded(data.len() as u64);

        let index = piece as usize;
        let already_have = swarm.host_pieces().read().has_piece(index);
        if !already_have {
            match swarm.storage().write_piece(index, &data).await {
                Ok(()) => swarm.piece_completed(peer, piece).await,
                Err(e) => {
                    warn!(%host, %peer, piece, error = %e, "failed to store piece");
                }
            }
        }

        self.drop_satisfied_requests(swarm);
        let follow_up = requests_to_issue(straggler, self.in_flight_count());
        trace!(%host, %peer, piece, rtt_ms = sample.as_millis() as u64, straggler, follow_up, "rtt sample");

        if self.has_unchoked_host() && self.host_interested(swarm) {
            self.request_pieces(swarm, follow_up).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for NeighborSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeighborSession")
            .field("peer_id", &self.peer_id)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("preferred_by_host", &self.is_preferred_by_host())
            .field("optimistic_by_host", &self.is_optimistic_by_host())
            .field("interested_in_host", &self.is_interested_in_host())
            .field("unchoked_host", &self.has_unchoked_host())
            .finish()
    }
}
