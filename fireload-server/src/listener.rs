//! Per-port listeners
//!
//! One [`PortListener`] serves one (protocol, port) pair. UDP listeners
//! acknowledge every datagram so that client liveness and latency probes
//! get an answer; TCP listeners greet and close every connection. Both poll
//! with a timeout so they notice a stop request promptly.

use fireload_core::LoadError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Socket, Type};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Transport protocol of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// Addresses of every client that has sent a datagram to any UDP listener
pub type ClientSet = Arc<RwLock<HashSet<IpAddr>>>;

/// Live counters of one listener
#[derive(Debug, Default)]
pub struct ListenerStats {
    connections: AtomicU64,
    packets: AtomicU64,
    bytes_received: AtomicU64,
}

impl ListenerStats {
    /// TCP connections accepted
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// UDP datagrams received
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// UDP payload bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    fn record_connection(&self) -> u64 {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_packet(&self, len: usize) -> u64 {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed) + 1
    }
}

enum BoundSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// A bound listener, ready to run
pub struct PortListener {
    port: u16,
    socket: BoundSocket,
    poll_interval: Duration,
    stats: Arc<ListenerStats>,
    clients: ClientSet,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for PortListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortListener")
            .field("protocol", &self.protocol())
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl PortListener {
    /// Bind `protocol` on `ip:port`.
    ///
    /// Port 0 binds an ephemeral port; [`PortListener::port`] reports the
    /// one actually chosen.
    pub async fn bind(
        protocol: Protocol,
        ip: IpAddr,
        port: u16,
        poll_interval: Duration,
        clients: ClientSet,
        running: Arc<AtomicBool>,
    ) -> Result<Self, LoadError> {
        let addr = SocketAddr::new(ip, port);
        let socket = match protocol {
            Protocol::Tcp => BoundSocket::Tcp(bind_tcp(addr)?),
            Protocol::Udp => BoundSocket::Udp(UdpSocket::bind(addr).await.map_err(|e| {
                LoadError::ServerStartFailed {
                    address: addr,
                    source: e.into(),
                }
            })?),
        };
        let local = match &socket {
            BoundSocket::Tcp(l) => l.local_addr(),
            BoundSocket::Udp(s) => s.local_addr(),
        }
        .map_err(|e| LoadError::ServerStartFailed {
            address: addr,
            source: e.into(),
        })?;

        Ok(Self {
            port: local.port(),
            socket,
            poll_interval,
            stats: Arc::new(ListenerStats::default()),
            clients,
            running,
        })
    }

    /// Port this listener is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Protocol this listener serves
    pub fn protocol(&self) -> Protocol {
        match self.socket {
            BoundSocket::Tcp(_) => Protocol::Tcp,
            BoundSocket::Udp(_) => Protocol::Udp,
        }
    }

    /// Shared handle on this listener's counters
    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Serve until the shared running flag is cleared
    pub async fn run(self) {
        let protocol = self.protocol();
        info!(%protocol, port = self.port, "Listener started");
        match &self.socket {
            BoundSocket::Tcp(listener) => self.serve_tcp(listener).await,
            BoundSocket::Udp(socket) => self.serve_udp(socket).await,
        }
        info!(
            %protocol,
            port = self.port,
            connections = self.stats.connections(),
            packets = self.stats.packets(),
            "Listener stopped"
        );
    }

    async fn serve_tcp(&self, listener: &TcpListener) {
        while self.running.load(Ordering::Acquire) {
            match timeout(self.poll_interval, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, peer))) => {
                    let n = self.stats.record_connection();
                    debug!(port = self.port, %peer, connection = n, "TCP connection");
                    self.greet(stream, peer).await;
                }
                Ok(Err(e)) => {
                    warn!(port = self.port, error = %e, "TCP accept failed");
                }
            }
        }
    }

    async fn greet(&self, mut stream: TcpStream, peer: SocketAddr) {
        let hello = format!("Hello from fireload test server port {}\n", self.port);
        match timeout(self.poll_interval, stream.write_all(hello.as_bytes())).await {
            Ok(Ok(())) => {
                let _ = stream.shutdown().await;
            }
            Ok(Err(e)) => debug!(port = self.port, %peer, error = %e, "TCP greeting failed"),
            Err(_) => debug!(port = self.port, %peer, "TCP greeting timed out"),
        }
    }

    async fn serve_udp(&self, socket: &UdpSocket) {
        let reply = format!("ACK from port {}", self.port);
        let mut buf = [0u8; 2048];
        while self.running.load(Ordering::Acquire) {
            match timeout(self.poll_interval, socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok((len, peer))) => {
                    let n = self.stats.record_packet(len);
                    let first_seen = self.clients.write().insert(peer.ip());
                    if first_seen {
                        info!(client = %peer.ip(), "Tracking client for shutdown notification");
                    }
                    let preview: String = String::from_utf8_lossy(&buf[..len]).chars().take(50).collect();
                    debug!(port = self.port, %peer, packet = n, %preview, "UDP packet");
                    if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                        debug!(port = self.port, %peer, error = %e, "UDP reply failed");
                    }
                }
                Ok(Err(e)) => {
                    // ICMP errors from earlier replies surface here; keep serving
                    debug!(port = self.port, error = %e, "UDP receive failed");
                }
            }
        }
    }
}

fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, LoadError> {
    let start_failed = |e: std::io::Error| LoadError::ServerStartFailed {
        address: addr,
        source: e.into(),
    };
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(start_failed)?;
    socket.set_reuse_address(true).map_err(start_failed)?;
    socket.set_nonblocking(true).map_err(start_failed)?;
    socket.bind(&addr.into()).map_err(start_failed)?;
    socket.listen(128).map_err(start_failed)?;
    TcpListener::from_std(socket.into()).map_err(start_failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncReadExt;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn listener(protocol: Protocol) -> (PortListener, ClientSet, Arc<AtomicBool>) {
        let clients = ClientSet::default();
        let running = Arc::new(AtomicBool::new(true));
        let listener = PortListener::bind(
            protocol,
            LOCALHOST,
            0,
            Duration::from_millis(50),
            clients.clone(),
            running.clone(),
        )
        .await
        .unwrap();
        (listener, clients, running)
    }

    #[tokio::test]
    async fn test_udp_listener_acknowledges_and_tracks() {
        let (listener, clients, running) = listener(Protocol::Udp).await;
        let port = listener.port();
        let stats = listener.stats();
        let task = tokio::spawn(listener.run());

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        client.send_to(b"alive-check-1-1", (LOCALHOST, port)).await.unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(&buf[..len], format!("ACK from port {}", port).as_bytes());
        assert_eq!(stats.packets(), 1);
        assert_eq!(stats.bytes_received(), 15);
        assert!(clients.read().contains(&LOCALHOST));

        running.store(false, Ordering::Release);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_listener_greets_and_closes() {
        let (listener, _, running) = listener(Protocol::Tcp).await;
        let port = listener.port();
        let stats = listener.stats();
        let task = tokio::spawn(listener.run());

        let mut stream = TcpStream::connect((LOCALHOST, port)).await.unwrap();
        let mut greeting = String::new();
        stream.read_to_string(&mut greeting).await.unwrap();

        assert_eq!(greeting, format!("Hello from fireload test server port {}\n", port));
        assert_eq!(stats.connections(), 1);

        running.store(false, Ordering::Release);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_start_failure() {
        let (first, clients, running) = listener(Protocol::Udp).await;
        let err = PortListener::bind(
            Protocol::Udp,
            LOCALHOST,
            first.port(),
            Duration::from_millis(50),
            clients,
            running,
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), "SERVER_START_FAILED");
    }
}
