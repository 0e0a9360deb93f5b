//! Traffic generator integration tests over loopback sockets

use fireload_core::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::timeout;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn udp_sink() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

/// A port nothing listens on
async fn closed_tcp_port() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Drain everything that arrives within `window`
async fn drain(socket: &UdpSocket, window: Duration) -> Vec<Vec<u8>> {
    let mut received = Vec::new();
    let mut buf = vec![0u8; 4096];
    while let Ok(Ok((len, _))) = timeout(window, socket.recv_from(&mut buf)).await {
        received.push(buf[..len].to_vec());
    }
    received
}

fn generator(endpoints: ProtocolEndpointSet) -> TrafficGenerator {
    TrafficGenerator::new(
        ConnectionIdentity::new(3, 2),
        LOCALHOST,
        Arc::new(endpoints),
        UtNetworkSpecs::default(),
        TrafficTimeouts {
            udp_send: Duration::from_millis(100),
            tcp_connect: Duration::from_millis(500),
        },
    )
    .with_rng(StdRng::seed_from_u64(42))
}

#[tokio::test]
async fn test_query_hits_two_distinct_ordinary_ports() {
    let (first, first_port) = udp_sink().await;
    let (second, second_port) = udp_sink().await;
    let endpoints = ProtocolEndpointSet {
        ordinary: vec![first_port, second_port],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    generator.run(Activity::Query, &mut stats).await.unwrap();

    let a = drain(&first, Duration::from_millis(200)).await;
    let b = drain(&second, Duration::from_millis(200)).await;
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0], b"\\status\\\\info\\Player3-2");
    assert_eq!(stats.counters().udp_packets_sent, 2);
    assert_eq!(stats.counters().udp_responses_counted, 2);
}

#[tokio::test]
async fn test_gameplay_burst_is_sized_and_counted() {
    let (sink, port) = udp_sink().await;
    let (other, other_port) = udp_sink().await;
    let endpoints = ProtocolEndpointSet {
        ordinary: vec![port, other_port],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    generator.run(Activity::Gameplay, &mut stats).await.unwrap();

    let mut packets = drain(&sink, Duration::from_millis(200)).await;
    packets.extend(drain(&other, Duration::from_millis(50)).await);
    let specs = UtNetworkSpecs::default();
    assert!((5..=15).contains(&packets.len()), "burst of {}", packets.len());
    assert_eq!(stats.counters().udp_packets_sent, packets.len() as u64);
    for packet in &packets {
        assert!(packet.len() >= specs.default_payload_size());
        assert!(packet.starts_with(b"\\"));
    }
    let total: usize = packets.iter().map(Vec::len).sum();
    assert_eq!(stats.counters().bytes_sent, total as u64);
}

#[tokio::test]
async fn test_heartbeat_targets_bot_query_port() {
    let (sink, port) = udp_sink().await;
    let endpoints = ProtocolEndpointSet {
        bot_query: vec![port],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    generator.run(Activity::Heartbeat, &mut stats).await.unwrap();

    let packets = drain(&sink, Duration::from_millis(200)).await;
    assert_eq!(packets.len(), 1);
    assert!(packets[0].starts_with(b"\\heartbeat\\player3-2\\time"));
}

#[tokio::test]
async fn test_tcp_probe_against_open_port() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut line = String::new();
        stream.read_to_string(&mut line).await.unwrap();
        line
    });
    let endpoints = ProtocolEndpointSet {
        tcp: vec![port],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    generator.run(Activity::TcpProbe, &mut stats).await.unwrap();
    drop(generator);

    let line = accept.await.unwrap();
    assert_eq!(line, format!("Player3-2 TCP test to port {}", port));
    assert_eq!(stats.counters().tcp_connections_succeeded, 1);
    assert_eq!(stats.counters().tcp_connections_failed, 0);
    assert_eq!(stats.counters().bytes_sent, line.len() as u64);
    assert_eq!(stats.counters().bytes_received, line.len() as u64);
}

#[tokio::test]
async fn test_tcp_probe_against_closed_port_records_failure() {
    let port = closed_tcp_port().await;
    let endpoints = ProtocolEndpointSet {
        tcp: vec![port],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    generator.run(Activity::TcpProbe, &mut stats).await.unwrap();

    assert_eq!(stats.counters().tcp_connections_succeeded, 0);
    assert_eq!(stats.counters().tcp_connections_failed, 1);
    assert_eq!(stats.errors().len(), 1);
    assert!(stats.errors()[0].starts_with(&format!("TCP {}:", port)));
}

#[tokio::test]
async fn test_tcp_attempts_always_balance() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let open = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    let closed = closed_tcp_port().await;
    let endpoints = ProtocolEndpointSet {
        tcp: vec![open, closed],
        ..ProtocolEndpointSet::default()
    };
    let mut generator = generator(endpoints);
    let mut stats = TrafficStats::new(ConnectionIdentity::new(3, 2));

    let attempts = 20;
    for _ in 0..attempts {
        generator.run(Activity::TcpProbe, &mut stats).await.unwrap();
    }

    let counters = stats.counters();
    assert_eq!(counters.tcp_attempts(), attempts);
    assert!(counters.tcp_connections_succeeded > 0);
    assert!(counters.tcp_connections_failed > 0);
}

#[tokio::test]
async fn test_listener_and_probe_over_loopback() {
    // a minimal echo server standing in for the game server
    let (echo, port) = udp_sink().await;
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((len, from)) = echo.recv_from(&mut buf).await {
            let _ = echo.send_to(&buf[..len], from).await;
        }
    });

    let probe = UdpServerProbe::new(
        ConnectionIdentity::new(1, 1),
        LOCALHOST,
        vec![port],
        vec![port],
        Duration::from_millis(300),
        Duration::from_millis(300),
    );
    assert!(probe.is_available().await);
    assert!(probe.measure_latency().await.is_some());

    let state = RunState::new();
    state.start();
    let listener = ShutdownListener::bind(
        ConnectionIdentity::new(1, 1),
        &ShutdownListenerConfig {
            bind_addr: (Ipv4Addr::LOCALHOST, 0).into(),
            token: "SERVER_SHUTDOWN".to_string(),
            poll_interval: Duration::from_millis(50),
        },
        state.clone(),
    )
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = listener.spawn();

    let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    sender.send_to(b"SERVER_SHUTDOWN", addr).await.unwrap();

    assert_eq!(handle.await.unwrap(), ListenerExit::TokenReceived);
    assert!(state.shutdown_requested());
}
