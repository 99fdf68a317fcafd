//! Minimal echo pair.
//!
//! Terminal 1: `cargo run --example echo -- server 127.0.0.1:30000`
//! Terminal 2: `cargo run --example echo -- client 127.0.0.1:30000`

use std::time::Duration;

use rudp::{Connection, ConnectionConfig, ConnectionError, ConnectionEvent, NetworkPacket, PEER_ID_SERVER};

const OPCODE_ECHO: u16 = 0x0001;

#[tokio::main]
async fn main() -> Result<(), ConnectionError> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_else(|| usage());
    let addr: std::net::SocketAddr = args
        .next()
        .unwrap_or_else(|| usage())
        .parse()
        .expect("not a socket address");

    match role.as_str() {
        "server" => server(addr).await,
        "client" => client(addr).await,
        _ => usage(),
    }
}

fn usage() -> ! {
    eprintln!("usage: echo <server|client> <addr:port>");
    std::process::exit(2);
}

async fn server(addr: std::net::SocketAddr) -> Result<(), ConnectionError> {
    let mut connection = Connection::listen(addr, ConnectionConfig::default()).await?;
    println!("serving on {}", connection.local_addr()?);

    loop {
        match connection.receive(Duration::from_secs(60)).await {
            Ok(ConnectionEvent::DataReceived(mut packet)) if packet.opcode() == OPCODE_ECHO => {
                let text = packet.read_string()?;
                println!("peer {}: {}", packet.peer_id(), text);

                let mut reply = NetworkPacket::new(OPCODE_ECHO);
                reply.write_string(&text.to_uppercase())?;
                connection.send(packet.peer_id(), 0, &reply, true)?;
            }
            Ok(ConnectionEvent::PeerAdded { peer_id, address }) => {
                println!("peer {} joined from {}", peer_id, address);
            }
            Ok(ConnectionEvent::PeerRemoved { peer_id, timeout, .. }) => {
                println!("peer {} left (timeout={})", peer_id, timeout);
            }
            Ok(_) => {}
            Err(ConnectionError::ReceiveTimeout) => {}
            Err(err) => return Err(err),
        }
    }
}

async fn client(addr: std::net::SocketAddr) -> Result<(), ConnectionError> {
    let mut connection = Connection::connect(addr, ConnectionConfig::default()).await?;

    for line in ["hello", "over", "unreliable", "datagrams"] {
        let mut packet = NetworkPacket::new(OPCODE_ECHO);
        packet.write_string(line)?;
        connection.send(PEER_ID_SERVER, 0, &packet, true)?;

        loop {
            match connection.receive(Duration::from_secs(5)).await? {
                ConnectionEvent::DataReceived(mut reply) if reply.opcode() == OPCODE_ECHO => {
                    println!("server echoed: {}", reply.read_string()?);
                    break;
                }
                _ => continue,
            }
        }
    }

    if let Some(rtt) = connection.peer_rtt(PEER_ID_SERVER) {
        println!("avg rtt: {:.1} ms", rtt.avg_rtt * 1000.0);
    }
    connection.shutdown().await;
    Ok(())
}
