use tether::net::{LoopbackNetwork, LoopbackService};
use tether::{
    ConnectionStatus, HOST_PEER_ID, PeerEvent, Session, SessionConfig, SessionError, SessionRole,
};

const HOST_ADDR: &str = "arena";
const HOST_PORT: u16 = 7777;

fn host_session(network: &LoopbackNetwork, max_clients: usize) -> Session<LoopbackService> {
    let mut session = Session::new(
        network.listen(HOST_ADDR, HOST_PORT),
        SessionConfig { max_clients },
    );
    session.host(HOST_PORT);
    session.update();
    session
}

fn client_session(network: &LoopbackNetwork) -> Session<LoopbackService> {
    let mut session = Session::new(network.client(), SessionConfig::default());
    session.join(HOST_ADDR, HOST_PORT);
    session
}

/// Runs one tick on the host, then on every client.
fn tick(host: &mut Session<LoopbackService>, clients: &mut [Session<LoopbackService>]) {
    host.update();
    for client in clients.iter_mut() {
        client.update();
    }
}

#[test]
fn test_client_joins_host() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 4);
    let mut clients = vec![client_session(&network)];

    assert_eq!(clients[0].role(), SessionRole::Client);
    assert_eq!(clients[0].status(), ConnectionStatus::Connecting);

    tick(&mut host, &mut clients);

    assert_eq!(clients[0].status(), ConnectionStatus::Open);
    assert_eq!(host.peers(), vec![1]);
    assert_eq!(
        host.drain_peer_events().collect::<Vec<_>>(),
        vec![PeerEvent::Joined(1)]
    );
    assert_eq!(
        clients[0].drain_peer_events().collect::<Vec<_>>(),
        vec![PeerEvent::Joined(HOST_PEER_ID)]
    );
}

#[test]
fn test_host_refuses_when_remaining_seats_are_taken() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 3);

    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);
    clients.push(client_session(&network));
    tick(&mut host, &mut clients);
    host.update();

    assert_eq!(host.connection_count(), 2);
    assert!(!host.transport().is_accepting());

    let mut late = client_session(&network);
    tick(&mut host, &mut clients);
    late.update();

    assert_eq!(late.status(), ConnectionStatus::Closed);
    assert_eq!(host.connection_count(), 2);
}

#[test]
fn test_two_seat_host_takes_a_single_peer() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 2);
    assert!(host.transport().is_accepting());

    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);
    host.update();

    assert_eq!(host.connection_count(), 1);
    assert!(!host.transport().is_accepting());
    assert_eq!(client_session(&network).status(), ConnectionStatus::Closed);
}

#[test]
fn test_seat_frees_up_after_disconnect() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 2);
    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);

    clients.clear();
    host.update();
    assert_eq!(host.connection_count(), 0);
    assert!(host.transport().is_accepting());

    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);
    assert_eq!(host.peers(), vec![1]);
    assert_eq!(
        host.drain_peer_events().collect::<Vec<_>>(),
        vec![
            PeerEvent::Joined(1),
            PeerEvent::Left(1),
            PeerEvent::Joined(1)
        ]
    );
}

#[test]
fn test_peer_ids_fill_the_smallest_gap() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 8);
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(client_session(&network));
        tick(&mut host, &mut clients);
    }
    assert_eq!(host.peers(), vec![1, 2, 3]);

    host.disconnect(2).unwrap();
    clients.push(client_session(&network));
    tick(&mut host, &mut clients);

    assert_eq!(host.peers(), vec![1, 3, 2]);
}

#[test]
fn test_join_without_host_reports_closed() {
    let network = LoopbackNetwork::new();
    let mut client = client_session(&network);

    assert_eq!(client.status(), ConnectionStatus::Closed);
    client.update();

    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert_eq!(client.drain_peer_events().count(), 0);
}

#[test]
#[should_panic(expected = "session role already set")]
fn test_join_twice_panics() {
    let network = LoopbackNetwork::new();
    let mut client = client_session(&network);
    client.join(HOST_ADDR, HOST_PORT);
}

#[test]
fn test_host_broadcasts_and_receives_round_robin() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 4);
    let mut clients = Vec::new();
    for _ in 0..2 {
        clients.push(client_session(&network));
        tick(&mut host, &mut clients);
    }

    host.send(b"welcome".to_vec());
    for client in clients.iter_mut() {
        assert_eq!(
            client.receive(),
            Some((HOST_PEER_ID, b"welcome".to_vec()))
        );
        assert!(client.receive().is_none());
    }

    clients[0].send(b"a1".to_vec());
    clients[0].send(b"a2".to_vec());
    clients[1].send(b"b1".to_vec());

    let received: Vec<_> = std::iter::from_fn(|| host.receive()).collect();
    assert_eq!(
        received,
        vec![
            (1, b"a1".to_vec()),
            (2, b"b1".to_vec()),
            (1, b"a2".to_vec())
        ]
    );
}

#[test]
fn test_addressed_send_and_receive() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 4);
    let mut clients = Vec::new();
    for _ in 0..2 {
        clients.push(client_session(&network));
        tick(&mut host, &mut clients);
    }

    host.send_to(2, b"only you".to_vec()).unwrap();
    assert!(clients[0].receive().is_none());
    assert_eq!(
        clients[1].receive_from(HOST_PEER_ID).unwrap(),
        Some(b"only you".to_vec())
    );

    clients[0].send(b"hello".to_vec());
    assert!(host.receive_from(2).unwrap().is_none());
    assert_eq!(host.receive_from(1).unwrap(), Some(b"hello".to_vec()));
    assert!(matches!(
        host.receive_from(9),
        Err(SessionError::UnknownPeer(9))
    ));
}

#[test]
fn test_client_notices_host_going_away() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 4);
    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);
    clients[0].drain_peer_events().for_each(drop);

    drop(host);
    clients[0].update();

    assert_eq!(clients[0].status(), ConnectionStatus::Closed);
    assert_eq!(clients[0].connection_count(), 0);
    assert_eq!(
        clients[0].drain_peer_events().collect::<Vec<_>>(),
        vec![PeerEvent::Left(HOST_PEER_ID)]
    );
}

#[test]
fn test_close_is_idempotent_and_reports_peers() {
    let network = LoopbackNetwork::new();
    let mut host = host_session(&network, 4);
    let mut clients = vec![client_session(&network)];
    tick(&mut host, &mut clients);
    host.drain_peer_events().for_each(drop);

    host.close();
    host.close();

    assert_eq!(host.connection_count(), 0);
    assert_eq!(
        host.drain_peer_events().collect::<Vec<_>>(),
        vec![PeerEvent::Left(1)]
    );
    clients[0].update();
    assert_eq!(clients[0].status(), ConnectionStatus::Closed);
}
