use super::*;
use crate::config::LoggingConfig;
use crate::peer::{FrameReader, Message};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub(crate) fn peer(peer_id: u32, port: u16, has_file: bool) -> PeerInfo {
    PeerInfo {
        peer_id,
        hostname: "127.0.0.1".to_string(),
        port,
        has_file,
    }
}

/// Four pieces of four bytes.
pub(crate) fn test_config(peers: Vec<PeerInfo>, interval_secs: u64) -> Config {
    Config {
        common: CommonConfig {
            preferred_neighbors: 2,
            unchoking_interval: interval_secs,
            optimistic_neighbors: 1,
            optimistic_interval: interval_secs,
            file_name: "shared.dat".to_string(),
            file_size: 16,
            piece_size: 4,
        },
        peers,
        logging: LoggingConfig::default(),
    }
}

/// An unstarted host in a three-peer swarm. Only the host may have the file.
pub(crate) async fn test_swarm(temp: &TempDir, host: u32, has_file: bool) -> Arc<Swarm> {
    let peers = (1..=3)
        .map(|n| peer(n, if n == host { 0 } else { 1 }, n == host && has_file))
        .collect();
    let config = test_config(peers, 10);
    Swarm::new(&config, PeerId::new(host).unwrap(), -1, -1, temp.path())
        .await
        .unwrap()
}

/// Two ends of a loopback TCP connection.
pub(crate) async fn connected_pair() -> (PeerTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (PeerTransport::new(server), client)
}

fn id(n: u32) -> PeerId {
    PeerId::new(n).unwrap()
}

async fn next_message(remote: &mut FrameReader<TcpStream>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), remote.receive_message())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// Registers a loopback connection as neighbor `n` and returns the remote
/// end, with the BITFIELD sent on registration already consumed.
async fn register(swarm: &Arc<Swarm>, n: u32) -> (Arc<NeighborSession>, FrameReader<TcpStream>) {
    let (transport, remote) = connected_pair().await;
    assert!(swarm.register_connection(id(n), transport).await);
    let mut remote = FrameReader::new(remote);
    assert!(matches!(
        next_message(&mut remote).await,
        Message::Bitfield(_)
    ));
    (swarm.active_session(id(n)).unwrap(), remote)
}

#[test]
fn test_file_health_formula() {
    let mut host = PieceSet::new(4);
    host.mark_complete(0);
    host.mark_complete(1);
    let neighbor = PieceSet::full(4);

    assert_eq!(file_health(&[host.clone(), neighbor.clone()], 4), 150);
    assert_eq!(file_health(&[host], 4), 50);
    assert_eq!(file_health(&[neighbor.clone(), neighbor], 4), 200);
    assert_eq!(file_health(&[], 4), 0);
}

#[tokio::test]
async fn test_new_host_with_file() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    assert!(swarm.host_pieces().read().is_complete());
    assert_eq!(swarm.piece_count(), 4);
    assert!(temp.path().join("peer_1").join("shared.dat").exists());
}

#[tokio::test]
async fn test_new_host_restores_progress() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("peer_2");
    let progress = ProgressFile::open(&dir, "shared.dat", 4).await.unwrap();
    let mut saved = PieceSet::new(4);
    saved.mark_complete(3);
    progress.write_snapshot(&saved.to_wire()).await.unwrap();

    let swarm = test_swarm(&temp, 2, false).await;
    assert_eq!(*swarm.host_pieces().read(), saved);
}

#[tokio::test]
async fn test_new_rejects_unknown_host() {
    let temp = TempDir::new().unwrap();
    let config = test_config(vec![peer(1, 0, true)], 10);
    let result = Swarm::new(&config, id(9), -1, -1, temp.path()).await;
    assert!(matches!(result, Err(SwarmError::Config(_))));
}

#[tokio::test]
async fn test_known_peers_are_queued() {
    let temp = TempDir::new().unwrap();
    assert!(test_swarm(&temp, 1, false).await.pending_dials().is_empty());
    assert_eq!(test_swarm(&temp, 3, false).await.pending_dials(), vec![id(1), id(2)]);
}

#[tokio::test]
async fn test_register_sends_bitfield_first() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (transport, remote) = connected_pair().await;
    assert!(swarm.register_connection(id(2), transport).await);

    let mut remote = FrameReader::new(remote);
    match next_message(&mut remote).await {
        Message::Bitfield(bits) => assert_eq!(PieceSet::from_wire(&bits, 4), PieceSet::full(4)),
        other => panic!("expected bitfield, got {other:?}"),
    }
    assert_eq!(swarm.active_sessions().len(), 1);

    swarm.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bitfield_precedes_replies_to_buffered_frames() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let frame = Message::Bitfield(PieceSet::full(4).to_wire()).encode().unwrap();
    for n in 10..60 {
        let (transport, mut remote) = connected_pair().await;
        // The neighbor's BITFIELD is already waiting when the session starts reading.
        remote.write_all(&frame).await.unwrap();
        remote.flush().await.unwrap();

        assert!(swarm.register_connection(id(n), transport).await);
        let mut remote = FrameReader::new(remote);
        assert!(matches!(
            next_message(&mut remote).await,
            Message::Bitfield(_)
        ));
        assert_eq!(next_message(&mut remote).await, Message::Interested);
    }

    swarm.stop().await;
}

#[tokio::test]
async fn test_register_refused_when_not_running() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;

    let (transport, _remote) = connected_pair().await;
    assert!(!swarm.register_connection(id(2), transport).await);

    swarm.start().await.unwrap();
    swarm.stop().await;

    let (transport, _remote) = connected_pair().await;
    assert!(!swarm.register_connection(id(2), transport).await);
    assert!(swarm.active_sessions().is_empty());
    assert!(swarm.inactive_sessions().is_empty());
}

#[tokio::test]
async fn test_register_rejects_duplicate_and_self() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let (_session, _remote) = register(&swarm, 2).await;

    let (transport, _other) = connected_pair().await;
    assert!(!swarm.register_connection(id(2), transport).await);

    let (transport, _other) = connected_pair().await;
    assert!(!swarm.register_connection(id(1), transport).await);

    assert_eq!(swarm.active_sessions().len(), 1);
    swarm.stop().await;
}

#[tokio::test]
async fn test_disconnect_moves_session_to_inactive() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let (session, remote) = register(&swarm, 2).await;
    session.counters().add_downloaded(64);
    drop(remote);

    assert!(wait_until(|| swarm.active_sessions().is_empty(), Duration::from_secs(5)).await);
    assert_eq!(swarm.inactive_sessions().len(), 1);
    // Peer 2 is listed after the host, so it dials us and is not re-queued.
    assert!(swarm.pending_dials().is_empty());

    // Reconnect reuses the session with its totals.
    let (again, _remote) = register(&swarm, 2).await;
    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(again.counters().downloaded_total(), 64);
    assert!(swarm.inactive_sessions().is_empty());

    swarm.stop().await;
}

#[tokio::test]
async fn test_disconnect_drops_delayed_sends() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (_session, remote) = register(&swarm, 2).await;
    swarm.limiter().delay_request(id(2), 1);
    swarm.limiter().delay_piece(id(2), 3);
    drop(remote);

    assert!(wait_until(|| swarm.active_sessions().is_empty(), Duration::from_secs(5)).await);
    assert!(!swarm.limiter().has_delayed_request(id(2)));
    assert!(!swarm.limiter().has_delayed_piece(id(2)));

    swarm.stop().await;
}

#[tokio::test]
async fn test_disconnect_requeues_known_peer() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 2, false).await;
    swarm.start().await.unwrap();
    swarm.dial_queue.lock().clear();

    let (_session, remote) = register(&swarm, 1).await;
    drop(remote);

    assert!(wait_until(|| !swarm.inactive_sessions().is_empty(), Duration::from_secs(5)).await);
    assert_eq!(swarm.pending_dials(), vec![id(1)]);

    swarm.stop().await;
}

#[tokio::test]
async fn test_file_health_over_active_sessions() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();
    swarm.host_pieces().write().mark_complete(0);
    swarm.host_pieces().write().mark_complete(1);

    let (session, _remote) = register(&swarm, 2).await;
    *session.pieces().write() = PieceSet::full(4);

    assert_eq!(swarm.file_health_percentage(), 150);
    swarm.stop().await;
}

#[tokio::test]
async fn test_piece_completed_broadcasts_have() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let (with_more, mut remote_a) = register(&swarm, 2).await;
    *with_more.pieces().write() = PieceSet::full(4);
    with_more.send_interest(true).await.unwrap();
    assert_eq!(next_message(&mut remote_a).await, Message::Interested);

    let (with_one, mut remote_b) = register(&swarm, 3).await;
    with_one.pieces().write().mark_complete(2);
    with_one.send_interest(true).await.unwrap();
    assert_eq!(next_message(&mut remote_b).await, Message::Interested);

    swarm.piece_completed(id(3), 2).await;
    assert!(swarm.host_pieces().read().has_piece(2));

    assert_eq!(next_message(&mut remote_a).await, Message::Have { piece: 2 });
    assert_eq!(next_message(&mut remote_b).await, Message::Have { piece: 2 });
    // Neighbor 3 has nothing left that the host lacks.
    assert_eq!(next_message(&mut remote_b).await, Message::NotInterested);
    assert!(with_more.previous_interest_of_host());

    // A second completion of the same piece is a no-op.
    swarm.piece_completed(id(2), 2).await;
    assert_eq!(swarm.host_pieces().read().count(), 1);

    swarm.stop().await;
}

#[tokio::test]
async fn test_piece_completed_clears_requests_to_other_neighbors() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let (slow, _remote_a) = register(&swarm, 2).await;
    let (_fast, _remote_b) = register(&swarm, 3).await;
    assert!(slow.begin_request(1));
    assert!(slow.begin_request(2));

    swarm.piece_completed(id(3), 1).await;
    assert!(!slow.is_in_flight(1));
    assert!(slow.is_in_flight(2));

    swarm.stop().await;
}

#[tokio::test]
async fn test_scheduler_tick_unchokes_interested() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (session, mut remote) = register(&swarm, 2).await;
    session.set_interested_in_host(true);

    swarm.scheduler_tick(10).await;
    assert!(session.is_unchoked_by_host());
    assert_eq!(next_message(&mut remote).await, Message::Unchoke);

    let progress = tokio::fs::read(temp.path().join("peer_1").join("shared.dat.bitfield"))
        .await
        .unwrap();
    assert_eq!(progress, PieceSet::full(4).to_wire().to_vec());

    swarm.stop().await;
}

#[tokio::test]
async fn test_pause_clears_selections_and_blocks_sends() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (session, _remote) = register(&swarm, 2).await;
    session.set_preferred_by_host(true);
    session.counters().add_downloaded(10);

    swarm.pause();
    assert!(swarm.is_paused());
    assert_eq!(swarm.limiter().download_limit(), 0);
    assert_eq!(swarm.limiter().upload_limit(), 0);

    swarm.scheduler_tick(10).await;
    assert!(!session.is_unchoked_by_host());
    assert_eq!(session.counters().downloaded_sub(), 0);

    swarm.change_download_limit(5 * 1024);
    assert_eq!(swarm.limiter().download_limit(), 0);
    assert_eq!(swarm.download_limit(), 5 * 1024);

    swarm.resume();
    assert!(!swarm.is_paused());
    assert_eq!(swarm.limiter().download_limit(), 5 * 1024);
    assert_eq!(swarm.limiter().upload_limit(), -1);

    swarm.stop().await;
}

#[tokio::test]
async fn test_delayed_piece_is_retried_once_unchoked() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.storage().write_piece(3, b"last").await.unwrap();
    swarm.start().await.unwrap();

    let (session, mut remote) = register(&swarm, 2).await;
    session
        .handle_message(&swarm, Message::Request { piece: 3 })
        .await
        .unwrap();
    assert_eq!(next_message(&mut remote).await, Message::Choke);

    swarm.retry_delayed().await;
    assert!(swarm.limiter().has_delayed_piece(id(2)));

    session.set_optimistic_by_host(true);
    swarm.retry_delayed().await;
    assert_eq!(
        next_message(&mut remote).await,
        Message::Piece {
            piece: 3,
            data: bytes::Bytes::from_static(b"last")
        }
    );
    assert!(!swarm.limiter().has_delayed_piece(id(2)));

    swarm.stop().await;
}

#[tokio::test]
async fn test_delayed_piece_dropped_when_neighbor_has_it() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (session, _remote) = register(&swarm, 2).await;
    session.pieces().write().mark_complete(0);
    swarm.limiter().delay_piece(id(2), 0);
    swarm.limiter().delay_piece(id(9), 1);

    swarm.retry_delayed().await;
    assert_eq!(swarm.limiter().delayed_piece_count(), 0);

    swarm.stop().await;
}

#[tokio::test]
async fn test_delayed_request_is_retried_after_resume() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();

    let (session, mut remote) = register(&swarm, 2).await;
    swarm.pause();
    session.send_request(&swarm, 1).await.unwrap();
    assert_eq!(session.in_flight_count(), 0);

    swarm.retry_delayed().await;
    assert!(swarm.limiter().has_delayed_request(id(2)));

    swarm.resume();
    swarm.retry_delayed().await;
    assert_eq!(next_message(&mut remote).await, Message::Request { piece: 1 });
    assert!(session.is_in_flight(1));

    swarm.stop().await;
}

#[tokio::test]
async fn test_swarm_table_and_detail() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, true).await;
    swarm.start().await.unwrap();

    let (session, _remote) = register(&swarm, 3).await;
    session.counters().add_downloaded(100);
    session.counters().add_uploaded(40);
    session.set_preferred_by_host(true);
    session.pieces().write().mark_complete(0);

    let table = swarm.swarm_table();
    assert_eq!(table.host.role, PeerRole::Host);
    assert_eq!(table.host.progress_percent, 100);
    assert_eq!(table.host.total_downloaded, 100);
    assert_eq!(table.host.total_uploaded, 40);
    assert_eq!(table.neighbors.len(), 1);
    assert_eq!(table.neighbors[0].progress_percent, 25);
    assert_eq!(table.selected_count(), 1);
    assert!(table.offline.is_empty());

    let detail = swarm.peer_detail(id(3)).unwrap();
    assert_eq!(detail.role, PeerRole::Neighbor);
    assert_eq!(detail.complete_pieces, 1);
    assert_eq!(detail.ip_address.as_deref(), Some("127.0.0.1"));

    assert_eq!(swarm.peer_detail(id(1)).unwrap().complete_pieces, 4);
    assert!(swarm.peer_detail(id(2)).is_none());

    swarm.stop().await;
}

#[tokio::test]
async fn test_all_peers_complete() {
    let temp = TempDir::new().unwrap();
    let config = test_config(vec![peer(1, 0, true), peer(2, 0, false)], 10);
    let swarm = Swarm::new(&config, id(1), -1, -1, temp.path()).await.unwrap();
    swarm.start().await.unwrap();

    assert!(!swarm.all_peers_complete());
    let (session, _remote) = register(&swarm, 2).await;
    assert!(!swarm.all_peers_complete());

    *session.pieces().write() = PieceSet::full(4);
    assert!(swarm.all_peers_complete());

    swarm.stop().await;
}

#[tokio::test]
async fn test_stop_saves_progress_and_closes() {
    let temp = TempDir::new().unwrap();
    let swarm = test_swarm(&temp, 1, false).await;
    swarm.start().await.unwrap();
    let (session, _remote) = register(&swarm, 2).await;

    swarm.host_pieces().write().mark_complete(2);
    swarm.stop().await;

    assert!(!swarm.is_running());
    assert!(!session.is_connected());
    let saved = tokio::fs::read(temp.path().join("peer_1").join("shared.dat.bitfield"))
        .await
        .unwrap();
    assert_eq!(PieceSet::from_wire(&saved, 4).count(), 1);

    // Stopping twice is harmless.
    swarm.stop().await;
}

#[tokio::test]
async fn test_two_hosts_transfer_the_file() {
    let temp = TempDir::new().unwrap();

    let seeder_config = test_config(vec![peer(1, 0, true), peer(2, 0, false)], 1);
    let seeder = Swarm::new(&seeder_config, id(1), -1, -1, temp.path())
        .await
        .unwrap();
    let contents: [&[u8]; 4] = [b"abcd", b"efgh", b"ijkl", b"mnop"];
    for (i, data) in contents.iter().enumerate() {
        seeder.storage().write_piece(i, data).await.unwrap();
    }
    let seeder_addr = seeder.start().await.unwrap();

    let leecher_config = test_config(
        vec![peer(1, seeder_addr.port(), true), peer(2, 0, false)],
        1,
    );
    let leecher = Swarm::new(&leecher_config, id(2), -1, -1, temp.path())
        .await
        .unwrap();
    leecher.start().await.unwrap();

    assert!(
        wait_until(|| leecher.all_peers_complete(), Duration::from_secs(20)).await,
        "transfer did not finish"
    );

    for (i, data) in contents.iter().enumerate() {
        assert_eq!(leecher.storage().read_piece(i).await.as_ref(), *data);
    }
    assert!(leecher.pending_dials().is_empty());
    let seeder_view = seeder.active_session(id(2)).unwrap();
    assert_eq!(seeder_view.counters().uploaded_total(), 16);

    leecher.stop().await;
    seeder.stop().await;
}
