//! End-to-end tests driving a TCP agent over loopback sockets.

use std::{net::SocketAddr, time::Duration};

use portagent_proto::{Packet, PacketType};
use portagent_server::{AgentConfig, AgentType, PortAgent};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(10);

fn tcp_config(name: String, instaddr: String, instport: u16) -> AgentConfig {
    AgentConfig {
        agent_type: AgentType::Tcp,
        port: 0,
        command_port: 0,
        sniff_port: Some(0),
        instrument_addr: Some(instaddr),
        instrument_port: Some(instport),
        digi_port: None,
        rx_port: None,
        tx_port: None,
        files: Vec::new(),
        name: Some(name),
        refdes: None,
        ttl: 60,
    }
}

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

/// Read framed packets from a driver socket until one matches `wanted`.
async fn read_until_packet(stream: &mut TcpStream, wanted: PacketType) -> Packet {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        loop {
            let (packet, rest) = Packet::from_buffer(&buffer);
            let rest = rest.to_vec();
            buffer = rest;
            match packet {
                Some(packet) if packet.header.packet_type() == wanted => return packet,
                Some(_) => {},
                None => break,
            }
        }
        let n = timeout(WAIT, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for a packet")
            .expect("driver read");
        assert_ne!(n, 0, "agent closed the driver connection");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::test]
async fn instrument_bytes_fan_out_framed_and_driver_bytes_funnel_raw() {
    let dir = tempfile::tempdir().expect("temp dir");
    let name = dir.path().join("agent").to_string_lossy().into_owned();

    let instrument_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind instrument");
    let instrument_addr = instrument_listener.local_addr().expect("instrument addr");

    let agent = PortAgent::start(tcp_config(name.clone(), "127.0.0.1".into(), instrument_addr.port()))
        .await
        .expect("agent starts");

    let (mut instrument, _) = timeout(WAIT, instrument_listener.accept())
        .await
        .expect("timed out waiting for the agent to dial")
        .expect("accept instrument");

    let mut driver = TcpStream::connect(loopback(agent.data_addr())).await.expect("driver connects");

    // Lets the driver registration and the CONNECTED transition land first.
    tokio::time::sleep(Duration::from_millis(200)).await;

    instrument.write_all(b"ping").await.expect("instrument write");
    let packet = read_until_packet(&mut driver, PacketType::FromInstrument).await;
    assert_eq!(packet.payload.as_ref(), b"ping");
    assert!(packet.valid());
    assert!(packet.header.time() > 0.0);

    driver.write_all(b"cmd1").await.expect("driver write");
    let mut received = vec![0u8; 4];
    timeout(WAIT, instrument.read_exact(&mut received))
        .await
        .expect("timed out waiting for driver bytes")
        .expect("instrument read");
    assert_eq!(received, b"cmd1");

    // Both daily sinks exist and the datalog has seen framed traffic.
    let datalog = std::fs::metadata(format!("{name}.datalog")).expect("datalog exists");
    assert!(datalog.len() > 0);
    assert!(std::fs::metadata(format!("{name}.log")).is_ok());

    agent.shutdown();
}

#[tokio::test]
async fn connection_state_transitions_reach_drivers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let name = dir.path().join("agent").to_string_lossy().into_owned();

    // Reserve an instrument port but leave it unbound: the agent starts
    // disconnected and backs off, so the driver can attach before the
    // instrument appears and observe the CONNECTED transition.
    let reserved = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    let instrument_addr = reserved.local_addr().expect("instrument addr");
    drop(reserved);

    let agent = PortAgent::start(tcp_config(name, "127.0.0.1".into(), instrument_addr.port()))
        .await
        .expect("agent starts");

    let mut driver = TcpStream::connect(loopback(agent.data_addr())).await.expect("driver connects");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let instrument_listener = TcpListener::bind(instrument_addr).await.expect("bind instrument");
    let (instrument, _) = timeout(WAIT, instrument_listener.accept())
        .await
        .expect("timed out waiting for the agent to redial")
        .expect("accept instrument");

    let status = read_until_packet(&mut driver, PacketType::PaStatus).await;
    assert_eq!(status.payload.as_ref(), b"CONNECTED");

    drop(instrument);
    let status = read_until_packet(&mut driver, PacketType::PaStatus).await;
    assert_eq!(status.payload.as_ref(), b"DISCONNECTED");

    agent.shutdown();
}

#[tokio::test]
async fn command_port_answers_state_and_version() {
    let dir = tempfile::tempdir().expect("temp dir");
    let name = dir.path().join("agent").to_string_lossy().into_owned();

    // Nothing listens at the instrument address: the agent stays
    // disconnected and keeps retrying in the background.
    let unused = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    let instrument_addr = unused.local_addr().expect("addr");
    drop(unused);

    let agent = PortAgent::start(tcp_config(name, "127.0.0.1".into(), instrument_addr.port()))
        .await
        .expect("agent starts");

    let mut operator =
        TcpStream::connect(loopback(agent.command_addr())).await.expect("operator connects");
    tokio::time::sleep(Duration::from_millis(100)).await;

    operator.write_all(b"get_state\n").await.expect("send get_state");
    let mut reply = vec![0u8; b"DISCONNECTED".len()];
    timeout(WAIT, operator.read_exact(&mut reply))
        .await
        .expect("timed out waiting for the state reply")
        .expect("read state reply");
    assert_eq!(reply, b"DISCONNECTED");

    operator.write_all(b"get_version\n").await.expect("send get_version");
    let mut version = vec![0u8; env!("CARGO_PKG_VERSION").len()];
    timeout(WAIT, operator.read_exact(&mut version))
        .await
        .expect("timed out waiting for the version reply")
        .expect("read version reply");
    assert_eq!(version, env!("CARGO_PKG_VERSION").as_bytes());

    agent.shutdown();
}

#[tokio::test]
async fn unknown_commands_fault_to_drivers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let name = dir.path().join("agent").to_string_lossy().into_owned();

    let unused = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    let instrument_addr = unused.local_addr().expect("addr");
    drop(unused);

    let agent = PortAgent::start(tcp_config(name, "127.0.0.1".into(), instrument_addr.port()))
        .await
        .expect("agent starts");

    let mut driver = TcpStream::connect(loopback(agent.data_addr())).await.expect("driver connects");
    let mut operator =
        TcpStream::connect(loopback(agent.command_addr())).await.expect("operator connects");
    tokio::time::sleep(Duration::from_millis(100)).await;

    operator.write_all(b"frobnicate now\n").await.expect("send bad command");

    let fault = read_until_packet(&mut driver, PacketType::PaFault).await;
    assert!(fault.payload.starts_with(b"Received bad command"));

    agent.shutdown();
}

#[tokio::test]
async fn sniffer_mirrors_traffic_as_text() {
    let dir = tempfile::tempdir().expect("temp dir");
    let name = dir.path().join("agent").to_string_lossy().into_owned();

    let instrument_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind instrument");
    let instrument_addr = instrument_listener.local_addr().expect("instrument addr");

    let agent = PortAgent::start(tcp_config(name, "127.0.0.1".into(), instrument_addr.port()))
        .await
        .expect("agent starts");
    let sniff_addr = agent.sniff_addr().expect("sniffer configured");

    let (mut instrument, _) = timeout(WAIT, instrument_listener.accept())
        .await
        .expect("timed out waiting for the agent to dial")
        .expect("accept instrument");

    let mut sniffer = TcpStream::connect(loopback(sniff_addr)).await.expect("sniffer connects");
    tokio::time::sleep(Duration::from_millis(200)).await;

    instrument.write_all(b"sample").await.expect("instrument write");

    let mut seen = String::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        let n = timeout(WAIT, sniffer.read(&mut chunk))
            .await
            .expect("timed out waiting for sniffer output")
            .expect("sniffer read");
        assert_ne!(n, 0, "agent closed the sniffer connection");
        seen.push_str(&String::from_utf8_lossy(&chunk[..n]));
        if seen.contains("sample") {
            break;
        }
    }
    assert!(seen.contains("FROM_INSTRUMENT"));
    assert!(seen.contains("CRC OK"));

    agent.shutdown();
}
