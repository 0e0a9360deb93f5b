//! Shutdown token broadcast
//!
//! On stop the server tells every client it knows about to end gracefully
//! by sending the shutdown token to each port of the clients' shutdown port
//! range. Delivery is best effort; undeliverable targets are logged once.

use fireload_core::{resolve_target, ShutdownConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Hosts the token was addressed to
    pub targets: usize,
    /// Datagrams handed to the kernel
    pub sent: u64,
    /// Datagrams that could not be sent
    pub failed: u64,
}

/// Sends the shutdown token to client shutdown ports
#[derive(Debug, Clone)]
pub struct ShutdownBroadcaster {
    config: ShutdownConfig,
}

impl ShutdownBroadcaster {
    /// Broadcaster for the given shutdown channel
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Ports the token is sent to on each target, one per client connection
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.config.ports()
    }

    /// Send the token to every shutdown port of every target
    pub async fn broadcast(&self, targets: &[IpAddr]) -> BroadcastSummary {
        let mut summary = BroadcastSummary {
            targets: targets.len(),
            ..BroadcastSummary::default()
        };
        if targets.is_empty() {
            warn!("No shutdown targets known, clients will stop on failed liveness checks");
            return summary;
        }

        let socket = match UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "Could not open broadcast socket");
                summary.failed = (targets.len() * self.ports().count()) as u64;
                return summary;
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            warn!(error = %e, "Could not enable broadcast on shutdown socket");
        }

        for target in targets {
            let mut reported = false;
            for port in self.ports() {
                match socket.send_to(self.config.token.as_bytes(), (*target, port)).await {
                    Ok(_) => summary.sent += 1,
                    Err(e) => {
                        summary.failed += 1;
                        if !reported {
                            warn!(%target, port, error = %e, "Failed to notify client");
                            reported = true;
                        }
                    }
                }
            }
        }

        info!(
            targets = summary.targets,
            sent = summary.sent,
            failed = summary.failed,
            "Shutdown notification broadcast complete"
        );
        summary
    }
}

/// Resolve configured extra targets, skipping names that do not resolve
pub async fn resolve_targets(hosts: &[String]) -> Vec<IpAddr> {
    let mut resolved = Vec::with_capacity(hosts.len());
    for host in hosts {
        match resolve_target(host).await {
            Ok(ip) => resolved.push(ip),
            Err(e) => warn!(%host, error = %e, "Skipping unresolvable shutdown target"),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_ports_cover_span() {
        let broadcaster = ShutdownBroadcaster::new(&ShutdownConfig::default());
        let ports: Vec<u16> = broadcaster.ports().collect();
        assert_eq!(ports, (7778..7878).collect::<Vec<_>>());
    }

    #[test]
    fn test_ports_cover_every_connection_of_a_fleet() {
        let fleet = fireload_core::SimulationConfig::default();
        let broadcaster = ShutdownBroadcaster::new(&fleet.shutdown);
        let ports: Vec<u16> = broadcaster.ports().collect();
        for player in 1..=fleet.num_players {
            for sub in 1..=fleet.connections_per_player {
                let port = fireload_core::ConnectionIdentity::new(player, sub)
                    .shutdown_port(fleet.shutdown.base_port, fleet.connections_per_player)
                    .unwrap();
                assert!(ports.contains(&port), "port {} not notified", port);
            }
        }
    }

    #[tokio::test]
    async fn test_token_reaches_listening_client() {
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = client.local_addr().unwrap().port();
        let broadcaster = ShutdownBroadcaster::new(&ShutdownConfig {
            base_port: port,
            port_span: 1,
            ..ShutdownConfig::default()
        });

        let summary = broadcaster
            .broadcast(&[IpAddr::V4(Ipv4Addr::LOCALHOST)])
            .await;

        let mut buf = [0u8; 64];
        let (len, _) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"SERVER_SHUTDOWN");
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_no_targets_sends_nothing() {
        let broadcaster = ShutdownBroadcaster::new(&ShutdownConfig::default());
        let summary = broadcaster.broadcast(&[]).await;
        assert_eq!(summary, BroadcastSummary::default());
    }

    #[tokio::test]
    async fn test_unresolvable_targets_are_skipped() {
        let resolved = resolve_targets(&[
            "127.0.0.1".to_string(),
            "no-such-host.invalid".to_string(),
        ])
        .await;
        assert_eq!(resolved, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }
}
