use crate::peer::{NeighborSession, PeerId, PieceSet};

/// Where a peer sits relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Host,
    Neighbor,
    Offline,
}

/// One row of the swarm table, or the detail view of a single peer.
///
/// Rates and totals are from the host's side: `download_*` is what the host
/// received from that neighbor, `upload_*` what it sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub role: PeerRole,
    pub peer_id: PeerId,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub port: u16,
    pub complete_pieces: usize,
    pub progress_percent: u32,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub preferred: bool,
    pub optimistic: bool,
    pub unchoked_host: bool,
    pub interest_of_host: bool,
    pub interested_in_host: bool,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
}

impl PeerSummary {
    pub(crate) fn host(
        peer_id: PeerId,
        hostname: &str,
        ip_address: Option<String>,
        port: u16,
        pieces: &PieceSet,
    ) -> Self {
        Self {
            role: PeerRole::Host,
            peer_id,
            hostname: hostname.to_string(),
            ip_address,
            port,
            complete_pieces: pieces.count(),
            progress_percent: pieces.progress_percent(),
            download_rate: 0,
            upload_rate: 0,
            preferred: false,
            optimistic: false,
            unchoked_host: false,
            interest_of_host: false,
            interested_in_host: false,
            total_downloaded: 0,
            total_uploaded: 0,
        }
    }

    pub(crate) fn neighbor(session: &NeighborSession) -> Self {
        let counters = session.counters();
        let (complete_pieces, progress_percent) = {
            let pieces = session.pieces().read();
            (pieces.count(), pieces.progress_percent())
        };

        Self {
            role: PeerRole::Neighbor,
            peer_id: session.peer_id(),
            hostname: session.hostname().to_string(),
            ip_address: session.ip_address(),
            port: session.port(),
            complete_pieces,
            progress_percent,
            download_rate: if session.has_unchoked_host() {
                counters.downloaded_sub_rate()
            } else {
                0
            },
            upload_rate: if session.is_unchoked_by_host() {
                counters.uploaded_sub_rate()
            } else {
                0
            },
            preferred: session.is_preferred_by_host(),
            optimistic: session.is_optimistic_by_host(),
            unchoked_host: session.has_unchoked_host(),
            interest_of_host: session.previous_interest_of_host(),
            interested_in_host: session.is_interested_in_host(),
            total_downloaded: counters.downloaded_total(),
            total_uploaded: counters.uploaded_total(),
        }
    }

    /// An inactive session: progress and totals only.
    pub(crate) fn offline(session: &NeighborSession) -> Self {
        Self {
            role: PeerRole::Offline,
            download_rate: 0,
            upload_rate: 0,
            preferred: false,
            optimistic: false,
            unchoked_host: false,
            interest_of_host: false,
            interested_in_host: false,
            ..Self::neighbor(session)
        }
    }

    /// True if the host has picked this peer as preferred or optimistic.
    pub fn is_selected(&self) -> bool {
        self.preferred || self.optimistic
    }
}

/// The whole swarm as the host sees it.
#[derive(Debug, Clone)]
pub struct SwarmSummary {
    pub host: PeerSummary,
    pub neighbors: Vec<PeerSummary>,
    pub offline: Vec<PeerSummary>,
}

impl SwarmSummary {
    pub(crate) fn new(
        mut host: PeerSummary,
        mut neighbors: Vec<PeerSummary>,
        mut offline: Vec<PeerSummary>,
    ) -> Self {
        neighbors.sort_by_key(|p| p.peer_id);
        offline.sort_by_key(|p| p.peer_id);

        host.download_rate = neighbors.iter().map(|p| p.download_rate).sum();
        host.upload_rate = neighbors.iter().map(|p| p.upload_rate).sum();
        host.total_downloaded = neighbors
            .iter()
            .chain(&offline)
            .map(|p| p.total_downloaded)
            .sum();
        host.total_uploaded = neighbors
            .iter()
            .chain(&offline)
            .map(|p| p.total_uploaded)
            .sum();

        Self {
            host,
            neighbors,
            offline,
        }
    }

    pub fn selected_count(&self) -> usize {
        self.neighbors.iter().filter(|p| p.is_selected()).count()
    }

    pub fn unchoked_host_count(&self) -> usize {
        self.neighbors.iter().filter(|p| p.unchoked_host).count()
    }

    pub fn interest_of_host_count(&self) -> usize {
        self.neighbors.iter().filter(|p| p.interest_of_host).count()
    }

    pub fn interested_in_host_count(&self) -> usize {
        self.neighbors.iter().filter(|p| p.interested_in_host).count()
    }
}
