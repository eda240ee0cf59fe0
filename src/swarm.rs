//! The host's view of the swarm and the workers that drive it.
//!
//! A [`Swarm`] owns the host's piece set, the shared file, the active and
//! inactive neighbor sessions, and four background workers:
//!
//! - a listener that accepts inbound connections,
//! - a dialer that retries the known peers the host must connect to,
//! - the choke scheduler, ticking once a second,
//! - the rate limiter's retry loop for delayed REQUEST and PIECE sends.
//!
//! Each active session additionally runs its own read loop.
//!
//! # Example
//!
//! ```no_run
//! use swarmcast::{Config, PeerId, Swarm};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_legacy_files(Path::new("Common.cfg"), Path::new("PeerInfo.cfg"))?;
//! let host = PeerId::new(1001).unwrap();
//!
//! let swarm = Swarm::new(&config, host, -1, 100 * 1024, Path::new(".")).await?;
//! swarm.start().await?;
//!
//! while !swarm.all_peers_complete() {
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//! }
//! swarm.stop().await;
//! # Ok(())
//! # }
//! ```

mod summary;

pub use summary::{PeerRole, PeerSummary, SwarmSummary};

use crate::bandwidth::RateLimiter;
use crate::config::{CommonConfig, Config, ConfigError, PeerInfo};
use crate::constants::{
    CONNECT_TIMEOUT, DIAL_RETRY_INTERVAL, RATE_LIMIT_TICK, SCHEDULER_TICK, SHUTDOWN_DRAIN_DELAY,
    SHUTDOWN_GRACE_PERIOD,
};
use crate::peer::{
    ChokeScheduler, Message, NeighborSession, PeerId, PeerTransport, PieceSet, Transition,
};
use crate::storage::{ProgressFile, SharedFile, StorageError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub struct Swarm {
    host: PeerInfo,
    host_id: PeerId,
    host_pieces: RwLock<PieceSet>,
    common: CommonConfig,
    peer_count: usize,
    scheduler: ChokeScheduler,
    limiter: RateLimiter,
    storage: SharedFile,
    progress: ProgressFile,
    active: DashMap<PeerId, Arc<NeighborSession>>,
    inactive: DashMap<PeerId, Arc<NeighborSession>>,
    known_peers: Vec<PeerInfo>,
    dial_queue: Mutex<Vec<PeerInfo>>,
    running: AtomicBool,
    paused: AtomicBool,
    download_limit: AtomicI64,
    upload_limit: AtomicI64,
    local_addr: Mutex<Option<SocketAddr>>,
    workers: Mutex<JoinSet<()>>,
    services: Mutex<Vec<JoinHandle<()>>>,
}

impl Swarm {
    /// Builds the host for `host_id`.
    ///
    /// Files live under `dir/peer_<id>/`. A host listed with the complete
    /// file starts with every piece; otherwise progress is restored from a
    /// saved snapshot if one exists. Limits are bytes per second, negative
    /// for unlimited.
    pub async fn new(
        config: &Config,
        host_id: PeerId,
        download_limit: i64,
        upload_limit: i64,
        dir: &Path,
    ) -> Result<Arc<Self>, SwarmError> {
        config.validate()?;
        let host = config.host(host_id)?.clone();
        let common = config.common.clone();
        let piece_count = common.piece_count();

        let peer_dir = dir.join(format!("peer_{host_id}"));
        let storage =
            SharedFile::open(&peer_dir, &common.file_name, common.file_size, common.piece_size)
                .await?;
        let progress = ProgressFile::open(&peer_dir, &common.file_name, piece_count).await?;

        let host_pieces = if host.has_file {
            PieceSet::full(piece_count)
        } else {
            match progress.read_snapshot().await? {
                Some(bits) => PieceSet::from_wire(&bits, piece_count),
                None => PieceSet::new(piece_count),
            }
        };

        info!(
            host = %host_id,
            pieces = host_pieces.count(),
            piece_count,
            "host initialized"
        );

        let known_peers = config.known_peers_for(host_id);

        Ok(Arc::new(Self {
            host,
            host_id,
            host_pieces: RwLock::new(host_pieces),
            scheduler: ChokeScheduler::new(common.preferred_neighbors, common.optimistic_neighbors),
            common,
            peer_count: config.peers.len(),
            limiter: RateLimiter::new(download_limit, upload_limit),
            storage,
            progress,
            active: DashMap::new(),
            inactive: DashMap::new(),
            dial_queue: Mutex::new(known_peers.clone()),
            known_peers,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            download_limit: AtomicI64::new(download_limit),
            upload_limit: AtomicI64::new(upload_limit),
            local_addr: Mutex::new(None),
            workers: Mutex::new(JoinSet::new()),
            services: Mutex::new(Vec::new()),
        }))
    }

    /// Binds the listener and spawns the background workers.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, SwarmError> {
        let listener = TcpListener::bind(("0.0.0.0", self.host.port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);

        self.running.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);

        let mut services = self.services.lock();
        services.push(tokio::spawn(self.clone().accept_loop(listener)));
        services.push(tokio::spawn(self.clone().dial_loop()));
        services.push(tokio::spawn(self.clone().schedule_loop()));
        services.push(tokio::spawn(self.clone().rate_limit_loop()));

        info!(host = %self.host_id, %addr, "listening");
        Ok(addr)
    }

    /// Shuts the host down: stops the workers, closes every socket, waits
    /// briefly for session tasks, then closes the files.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(host = %self.host_id, "stopping");

        sleep(SHUTDOWN_DRAIN_DELAY).await;

        let services: Vec<JoinHandle<()>> = self.services.lock().drain(..).collect();
        for service in &services {
            service.abort();
        }

        for session in self.active_sessions() {
            session.close();
        }

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let drained = timeout(SHUTDOWN_GRACE_PERIOD, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(host = %self.host_id, remaining = workers.len(), "session workers did not exit in time");
            workers.abort_all();
        }

        self.save_progress().await;
        if let Err(e) = self.storage.close().await {
            warn!(host = %self.host_id, error = %e, "failed to close shared file");
        }

        info!(host = %self.host_id, "stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Suspends choking decisions and blocks all REQUEST and PIECE sends.
    /// Connections stay open.
    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::AcqRel) {
            return;
        }
        self.limiter.set_download_limit(0);
        self.limiter.set_upload_limit(0);
        info!(host = %self.host_id, "paused");
    }

    /// Restores the configured limits.
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::AcqRel) {
            return;
        }
        self.limiter
            .set_download_limit(self.download_limit.load(Ordering::Relaxed));
        self.limiter
            .set_upload_limit(self.upload_limit.load(Ordering::Relaxed));
        info!(host = %self.host_id, "resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sets the download budget in bytes per second. While paused the value
    /// is stored and applied on resume.
    pub fn change_download_limit(&self, limit: i64) {
        self.download_limit.store(limit, Ordering::Relaxed);
        if !self.is_paused() {
            self.limiter.set_download_limit(limit);
        }
        info!(host = %self.host_id, limit, "download limit changed");
    }

    /// Sets the upload budget in bytes per second. While paused the value
    /// is stored and applied on resume.
    pub fn change_upload_limit(&self, limit: i64) {
        self.upload_limit.store(limit, Ordering::Relaxed);
        if !self.is_paused() {
            self.limiter.set_upload_limit(limit);
        }
        info!(host = %self.host_id, limit, "upload limit changed");
    }

    /// The configured download budget, which the limiter enforces unless paused.
    pub fn download_limit(&self) -> i64 {
        self.download_limit.load(Ordering::Relaxed)
    }

    pub fn upload_limit(&self) -> i64 {
        self.upload_limit.load(Ordering::Relaxed)
    }

    pub fn host_id(&self) -> PeerId {
        self.host_id
    }

    pub fn host_pieces(&self) -> &RwLock<PieceSet> {
        &self.host_pieces
    }

    pub fn common(&self) -> &CommonConfig {
        &self.common
    }

    pub fn piece_count(&self) -> usize {
        self.storage.piece_count()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn storage(&self) -> &SharedFile {
        &self.storage
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Snapshot of the active sessions.
    pub fn active_sessions(&self) -> Vec<Arc<NeighborSession>> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn inactive_sessions(&self) -> Vec<Arc<NeighborSession>> {
        self.inactive.iter().map(|e| e.value().clone()).collect()
    }

    pub fn active_session(&self, peer: PeerId) -> Option<Arc<NeighborSession>> {
        self.active.get(&peer).map(|e| e.value().clone())
    }

    /// Known peers still waiting for an outbound connection.
    pub fn pending_dials(&self) -> Vec<PeerId> {
        self.dial_queue
            .lock()
            .iter()
            .filter_map(|p| PeerId::new(p.peer_id))
            .collect()
    }

    /// Adopts a handshaken connection as the session for `peer_id`.
    ///
    /// Rejected (and the socket closed) if the host is not running, or the
    /// ID is the host's own or already has an active session. BITFIELD is
    /// written before the session joins the active set or starts reading, so
    /// it is always the first frame on the connection. A previously seen
    /// peer then gets its inactive session back; otherwise a new one is
    /// created.
    pub async fn register_connection(
        self: &Arc<Self>,
        peer_id: PeerId,
        transport: PeerTransport,
    ) -> bool {
        if !self.is_running() {
            debug!(host = %self.host_id, peer = %peer_id, "not running, dropping connection");
            return false;
        }
        if peer_id == self.host_id {
            warn!(host = %self.host_id, "rejecting connection from own peer ID");
            return false;
        }
        if self.active.contains_key(&peer_id) {
            debug!(host = %self.host_id, peer = %peer_id, "duplicate connection rejected");
            return false;
        }

        let (reader, conn) = match transport.into_split() {
            Ok(parts) => parts,
            Err(e) => {
                debug!(host = %self.host_id, peer = %peer_id, error = %e, "connection dropped before registration");
                return false;
            }
        };
        let conn = Arc::new(conn);

        let announced = self.host_pieces.read().clone();
        if let Err(e) = conn
            .send_message(&Message::Bitfield(announced.to_wire()))
            .await
        {
            debug!(host = %self.host_id, peer = %peer_id, error = %e, "failed to send bitfield");
            conn.close();
            return false;
        }

        let session = match self.active.entry(peer_id) {
            Entry::Occupied(_) => {
                debug!(host = %self.host_id, peer = %peer_id, "duplicate connection rejected");
                conn.close();
                return false;
            }
            Entry::Vacant(slot) => {
                let session = match self.inactive.remove(&peer_id) {
                    Some((_, session)) => {
                        session.reactivate(conn.clone());
                        session
                    }
                    None => Arc::new(NeighborSession::with_connection(
                        peer_id,
                        conn.clone(),
                        self.piece_count(),
                    )),
                };
                slot.insert(session.clone());
                session
            }
        };

        {
            let mut workers = self.workers.lock();
            while workers.try_join_next().is_some() {}
            workers.spawn(session.clone().run(self.clone(), reader, conn));
        }

        // Pieces completed after the bitfield snapshot missed the HAVE broadcast.
        let missed: Vec<u32> = {
            let now = self.host_pieces.read();
            let missed = (0..now.piece_count())
                .filter(|&i| now.has_piece(i) && !announced.has_piece(i))
                .map(|i| i as u32)
                .collect();
            missed
        };
        for piece in missed {
            if let Err(e) = session.send_have(piece).await {
                debug!(host = %self.host_id, peer = %peer_id, error = %e, "failed to send have");
                break;
            }
        }
        true
    }

    /// Moves a session whose connection ended to the inactive set, and
    /// queues a redial if the host is responsible for that peer.
    pub fn deregister(&self, session: &Arc<NeighborSession>) {
        let peer_id = session.peer_id();
        let removed = self
            .active
            .remove_if(&peer_id, |_, current| Arc::ptr_eq(current, session));

        let Some((_, session)) = removed else {
            return;
        };
        self.inactive.insert(peer_id, session);
        self.limiter.forget(peer_id);

        if let Some(info) = self.known_peers.iter().find(|p| p.peer_id == peer_id.get()) {
            let mut queue = self.dial_queue.lock();
            if !queue.iter().any(|p| p.peer_id == info.peer_id) {
                queue.push(info.clone());
            }
        }
    }

    /// Records a newly stored piece and announces it to every neighbor.
    pub async fn piece_completed(&self, from: PeerId, piece: u32) {
        let index = piece as usize;
        let (count, complete) = {
            let mut pieces = self.host_pieces.write();
            if pieces.has_piece(index) {
                return;
            }
            pieces.mark_complete(index);
            (pieces.count(), pieces.is_complete())
        };

        info!(host = %self.host_id, peer = %from, piece, count, "downloaded piece");
        if complete {
            info!(host = %self.host_id, "downloaded the complete file");
        }

        self.broadcast_have(piece).await;
    }

    /// Sends HAVE to a snapshot of the active set, dropping any request for
    /// the piece still in flight to them. Neighbors that no longer have
    /// anything the host lacks also get NOT_INTERESTED.
    async fn broadcast_have(&self, piece: u32) {
        for session in self.active_sessions() {
            session.finish_request(piece);
            if let Err(e) = session.send_have(piece).await {
                debug!(host = %self.host_id, peer = %session.peer_id(), error = %e, "failed to send have");
                continue;
            }
            if session.previous_interest_of_host() && !session.host_interested(self) {
                if let Err(e) = session.send_interest(false).await {
                    debug!(host = %self.host_id, peer = %session.peer_id(), error = %e, "failed to send not interested");
                }
            }
        }
    }

    /// `min_count * 100 + above_min * 100 / piece_count` over the host's
    /// and every active neighbor's piece sets.
    pub fn file_health_percentage(&self) -> u32 {
        let mut sets = vec![self.host_pieces.read().clone()];
        sets.extend(self.active_sessions().iter().map(|s| s.pieces().read().clone()));
        file_health(&sets, self.piece_count())
    }

    /// True once the host and every configured neighbor are known to have
    /// the whole file.
    pub fn all_peers_complete(&self) -> bool {
        let mut count = usize::from(self.host_pieces.read().is_complete());
        count += self
            .active
            .iter()
            .filter(|e| e.value().has_complete_file())
            .count();
        count += self
            .inactive
            .iter()
            .filter(|e| e.value().has_complete_file())
            .count();
        count == self.peer_count
    }

    /// The detail view for the host or any neighbor it has seen.
    pub fn peer_detail(&self, peer: PeerId) -> Option<PeerSummary> {
        if peer == self.host_id {
            return Some(self.host_summary());
        }
        if let Some(session) = self.active_session(peer) {
            return Some(PeerSummary::neighbor(&session));
        }
        self.inactive
            .get(&peer)
            .map(|e| PeerSummary::offline(e.value()))
    }

    /// One row per peer, with host aggregates.
    pub fn swarm_table(&self) -> SwarmSummary {
        let neighbors = self
            .active_sessions()
            .iter()
            .map(|s| PeerSummary::neighbor(s))
            .collect();
        let offline = self
            .inactive_sessions()
            .iter()
            .map(|s| PeerSummary::offline(s))
            .collect();
        SwarmSummary::new(self.host_summary(), neighbors, offline)
    }

    fn host_summary(&self) -> PeerSummary {
        let pieces = self.host_pieces.read();
        PeerSummary::host(
            self.host_id,
            &self.host.hostname,
            self.local_addr().map(|a| a.ip().to_string()),
            self.host.port,
            &pieces,
        )
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.is_running() {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(host = %self.host_id, error = %e, "accept failed");
                    sleep(DIAL_RETRY_INTERVAL).await;
                    continue;
                }
            };

            let swarm = self.clone();
            tokio::spawn(async move {
                let mut transport = PeerTransport::new(stream);
                match transport.accept_handshake(swarm.host_id).await {
                    Ok(peer_id) => {
                        info!(host = %swarm.host_id, peer = %peer_id, "connected from peer");
                        swarm.register_connection(peer_id, transport).await;
                    }
                    Err(e) => {
                        warn!(host = %swarm.host_id, %addr, error = %e, "inbound handshake failed");
                    }
                }
            });
        }
    }

    async fn dial_loop(self: Arc<Self>) {
        let mut ticker = interval(DIAL_RETRY_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            ticker.tick().await;
            self.dial_pending().await;
        }
    }

    /// One pass over the dial queue. Peers stay queued until a handshake
    /// with them succeeds.
    pub(crate) async fn dial_pending(self: &Arc<Self>) {
        let pending: Vec<PeerInfo> = self.dial_queue.lock().clone();

        for peer in pending {
            if !self.is_running() {
                return;
            }

            let address = peer.address();
            let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    debug!(host = %self.host_id, peer = peer.peer_id, %address, error = %e, "connect failed");
                    continue;
                }
                Err(_) => {
                    debug!(host = %self.host_id, peer = peer.peer_id, %address, "connect timed out");
                    continue;
                }
            };

            let mut transport = PeerTransport::new(stream);
            match transport.initiate_handshake(self.host_id).await {
                Ok(peer_id) => {
                    info!(host = %self.host_id, peer = %peer_id, "made a connection to peer");
                    self.dial_queue.lock().retain(|p| p.peer_id != peer.peer_id);
                    self.register_connection(peer_id, transport).await;
                }
                Err(e) => {
                    warn!(host = %self.host_id, peer = peer.peer_id, error = %e, "outbound handshake failed");
                }
            }
        }
    }

    async fn schedule_loop(self: Arc<Self>) {
        let mut ticker = interval(SCHEDULER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut elapsed_secs: u64 = 0;

        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            self.scheduler_tick(elapsed_secs).await;
            elapsed_secs += 1;
        }
    }

    /// One scheduler tick. Selections run when `elapsed_secs` is a multiple
    /// of their interval; progress is saved every tick.
    pub(crate) async fn scheduler_tick(&self, elapsed_secs: u64) {
        let sessions = self.active_sessions();

        if self.is_paused() {
            self.scheduler.clear_selections(&sessions);
        } else {
            if elapsed_secs % self.common.unchoking_interval == 0 {
                let complete = self.host_pieces.read().is_complete();
                let transition = self.scheduler.select_preferred(&sessions, complete);
                self.apply_transition(transition, "preferred neighbors changed")
                    .await;
            }
            if elapsed_secs % self.common.optimistic_interval == 0 {
                let transition = self.scheduler.select_optimistic(&sessions);
                self.apply_transition(transition, "optimistic neighbors changed")
                    .await;
            }
        }

        self.save_progress().await;
    }

    async fn apply_transition(&self, transition: Transition, event: &str) {
        for session in &transition.choke {
            if let Err(e) = session.send_choke().await {
                debug!(host = %self.host_id, peer = %session.peer_id(), error = %e, "failed to send choke");
            }
        }
        for session in &transition.unchoke {
            if let Err(e) = session.send_unchoke().await {
                debug!(host = %self.host_id, peer = %session.peer_id(), error = %e, "failed to send unchoke");
            }
        }

        if let Some(ids) = transition.changed {
            let neighbors = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            info!(host = %self.host_id, %neighbors, "{}", event);
        }
    }

    /// Flushes piece data, then snapshots the host's bitfield, so a saved
    /// snapshot never claims pieces that are not on disk.
    async fn save_progress(&self) {
        let bits = self.host_pieces.read().to_wire();
        if let Err(e) = self.storage.flush().await {
            warn!(host = %self.host_id, error = %e, "failed to flush shared file");
            return;
        }
        if let Err(e) = self.progress.write_snapshot(&bits).await {
            warn!(host = %self.host_id, error = %e, "failed to save progress");
        }
    }

    async fn rate_limit_loop(self: Arc<Self>) {
        let mut ticker = interval(RATE_LIMIT_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            ticker.tick().await;
            self.retry_delayed().await;
        }
    }

    /// Re-examines delayed sends. Entries for neighbors that went inactive
    /// are dropped; entries still over budget stay queued.
    pub(crate) async fn retry_delayed(&self) {
        for (peer, mut pieces) in self.limiter.take_delayed_requests() {
            let Some(session) = self.active_session(peer) else {
                continue;
            };

            while let Some(piece) = pieces.pop_front() {
                if self.host_pieces.read().has_piece(piece as usize) {
                    continue;
                }
                if self.limiter.has_reached_download_limit(&session) {
                    pieces.push_front(piece);
                    break;
                }
                if let Err(e) = session.send_request(self, piece).await {
                    debug!(host = %self.host_id, %peer, piece, error = %e, "delayed request failed");
                    pieces.clear();
                }
            }
            self.limiter.restore_requests(peer, pieces);
        }

        for (peer, mut pieces) in self.limiter.take_delayed_pieces() {
            let Some(session) = self.active_session(peer) else {
                continue;
            };
            if session.has_complete_file() {
                continue;
            }

            while let Some(piece) = pieces.pop_front() {
                if session.pieces().read().has_piece(piece as usize) {
                    continue;
                }
                if !session.is_unchoked_by_host() || self.limiter.has_reached_upload_limit(&session)
                {
                    pieces.push_front(piece);
                    break;
                }
                if let Err(e) = session.send_piece(self, piece, true).await {
                    debug!(host = %self.host_id, %peer, piece, error = %e, "delayed piece failed");
                    pieces.clear();
                }
            }
            self.limiter.restore_pieces(peer, pieces);
        }
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("host_id", &self.host_id)
            .field("active", &self.active.len())
            .field("inactive", &self.inactive.len())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish()
    }
}

/// Swarm redundancy: the lowest replica count of any piece, times 100, plus
/// the share of pieces replicated more than that, in percent.
pub fn file_health(sets: &[PieceSet], piece_count: usize) -> u32 {
    if piece_count == 0 {
        return 0;
    }

    let mut counts = vec![0u32; piece_count];
    for set in sets {
        for (index, count) in counts.iter_mut().enumerate() {
            if set.has_piece(index) {
                *count += 1;
            }
        }
    }

    let lowest = counts.iter().copied().min().unwrap_or(0);
    let above = counts.iter().filter(|&&c| c > lowest).count();
    lowest * 100 + (above * 100 / piece_count) as u32
}

#[cfg(test)]
pub(crate) mod tests;
