//! End-to-end exchange between a listening and a connecting `Connection`
//! over the loopback interface: handshake, reliable ordered delivery on
//! multiple channels, broadcast, large-payload splitting and graceful
//! disconnect.

use std::time::Duration;

use rudp::{
    Connection, ConnectionConfig, ConnectionError, ConnectionEvent, NetworkPacket, PEER_ID_SERVER,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_data(connection: &mut Connection) -> NetworkPacket {
    loop {
        match connection
            .receive(RECV_TIMEOUT)
            .await
            .expect("no event before timeout")
        {
            ConnectionEvent::DataReceived(packet) => return packet,
            other => {
                log::debug!("skipping event {:?}", other);
            }
        }
    }
}

#[tokio::test]
async fn handshake_exchange_split_and_disconnect() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ConnectionConfig::default();

    let mut server = Connection::listen("127.0.0.1:0".parse().unwrap(), config.clone())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client = Connection::connect(server_addr, config).await.unwrap();

    // The connect handshake's dummy packet creates our peer server-side.
    let hello = next_data(&mut server).await;
    assert_eq!(hello.opcode(), 0);
    let client_id = hello.peer_id();
    assert_eq!(client_id, 2);

    // Client -> server, reliable, with a structured body.
    let mut request = NetworkPacket::new(0x0037);
    request.write(&123_456u32);
    request.write_string("hello world").unwrap();
    request.write_wide_string("wide \u{1F600}").unwrap();
    client.send(PEER_ID_SERVER, 1, &request, true).unwrap();

    let mut received = next_data(&mut server).await;
    assert_eq!(received.opcode(), 0x0037);
    assert_eq!(received.peer_id(), client_id);
    assert_eq!(received.read::<u32>().unwrap(), 123_456);
    assert_eq!(received.read_string().unwrap(), "hello world");
    assert_eq!(received.read_wide_string().unwrap(), "wide \u{1F600}");

    // Server -> every client.
    let mut announce = NetworkPacket::new(0x0038);
    announce.write(&7u8);
    server.send_to_all(0, &announce, true).unwrap();
    let mut received = next_data(&mut client).await;
    assert_eq!(received.opcode(), 0x0038);
    assert_eq!(received.peer_id(), PEER_ID_SERVER);
    assert_eq!(received.read::<u8>().unwrap(), 7);

    // By now the SetPeerId assignment has arrived.
    assert!(client.is_connected());
    assert_eq!(client.own_peer_id(), client_id);
    assert_eq!(server.peer_ids(), vec![client_id]);

    // A payload far larger than one datagram arrives intact through the
    // split/reassembly path.
    let blob: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
    let mut big = NetworkPacket::new(0x0100);
    big.write_bytes(&blob);
    client.send(PEER_ID_SERVER, 0, &big, true).unwrap();

    let received = next_data(&mut server).await;
    assert_eq!(received.opcode(), 0x0100);
    assert_eq!(received.payload(), &blob[..]);

    // Ordering across a burst on one channel.
    for i in 0..20u16 {
        let packet = NetworkPacket::new(0x0200 + i);
        client.send(PEER_ID_SERVER, 2, &packet, true).unwrap();
    }
    for i in 0..20u16 {
        let received = next_data(&mut server).await;
        assert_eq!(received.opcode(), 0x0200 + i);
    }

    // RTT statistics accumulate once acks flow.
    assert!(client.peer_rtt(PEER_ID_SERVER).is_some());

    // Kicking the client surfaces as a connectivity event on both ends.
    server.disconnect_peer(client_id).unwrap();
    let removed = loop {
        match client.receive(RECV_TIMEOUT).await.unwrap() {
            ConnectionEvent::PeerRemoved {
                peer_id, timeout, ..
            } => break (peer_id, timeout),
            _ => continue,
        }
    };
    assert_eq!(removed, (PEER_ID_SERVER, false));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn invalid_sends_are_rejected_up_front() {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = Connection::listen("127.0.0.1:0".parse().unwrap(), ConnectionConfig::default())
        .await
        .unwrap();

    let packet = NetworkPacket::new(1);
    assert!(matches!(
        server.send(2, 3, &packet, true),
        Err(ConnectionError::InvalidChannel(3))
    ));
    assert!(matches!(
        server.disconnect_peer(9),
        Err(ConnectionError::PeerNotFound(9))
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn unreliable_traffic_flows_between_peers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ConnectionConfig::default();
    let mut server = Connection::listen("127.0.0.1:0".parse().unwrap(), config.clone())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();
    let mut client = Connection::connect(server_addr, config).await.unwrap();

    // Wait for the handshake so the server knows the client.
    let hello = next_data(&mut server).await;
    let client_id = hello.peer_id();

    // Loopback does not lose datagrams, so unreliable traffic arrives
    // without the reliability machinery.
    let mut packet = NetworkPacket::new(0x0300);
    packet.write(&9_000_000u32);
    server.send(client_id, 0, &packet, false).unwrap();

    let mut received = next_data(&mut client).await;
    assert_eq!(received.opcode(), 0x0300);
    assert_eq!(received.read::<u32>().unwrap(), 9_000_000);

    client.shutdown().await;
    server.shutdown().await;
}
