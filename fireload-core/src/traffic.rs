//! Traffic generation
//!
//! One call produces one [`Activity`]: a discovery query, a join attempt, a
//! tick-paced gameplay burst, a heartbeat, or a TCP probe. Every socket
//! lives only for the duration of a single send or connect and every
//! operation is bounded by a short timeout. Nothing here waits for a reply;
//! round trips are the business of [`crate::probe`].

use crate::config::{SimulationConfig, UtNetworkSpecs};
use crate::endpoints::ProtocolEndpointSet;
use crate::error::LoadError;
use crate::identity::ConnectionIdentity;
use crate::packet;
use crate::stats::TrafficStats;
use async_trait::async_trait;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tracing::trace;

/// One discrete unit of simulated traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// Status queries to two ordinary servers
    Query,
    /// Connect request to an ordinary or private server
    Join,
    /// Burst of tick-paced gameplay packets
    Gameplay,
    /// Keepalive to a bot query port
    Heartbeat,
    /// TCP connect plus identification line
    TcpProbe,
}

impl Activity {
    /// Every activity, in selection table order
    pub const ALL: [Activity; 5] = [
        Activity::Query,
        Activity::Join,
        Activity::Gameplay,
        Activity::Heartbeat,
        Activity::TcpProbe,
    ];

    /// Relative selection weight; gameplay dominates like real UT traffic
    pub fn weight(&self) -> u32 {
        match self {
            Activity::Query => 5,
            Activity::Join => 2,
            Activity::Gameplay => 85,
            Activity::Heartbeat => 5,
            Activity::TcpProbe => 3,
        }
    }

    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Activity::Query => "query",
            Activity::Join => "join",
            Activity::Gameplay => "gameplay",
            Activity::Heartbeat => "heartbeat",
            Activity::TcpProbe => "tcp_test",
        }
    }

    /// Weighted random selection
    pub fn choose<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match WeightedIndex::new(Self::ALL.iter().map(Activity::weight)) {
            Ok(dist) => Self::ALL[dist.sample(rng)],
            Err(_) => Activity::Gameplay,
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that can carry out traffic activities for a connection
#[async_trait]
pub trait ActivityRunner: Send {
    /// Perform one activity, recording its effects into `stats`.
    ///
    /// Socket failures inside the activity are recorded and swallowed;
    /// an `Err` means the activity could not be carried out at all.
    async fn run(&mut self, activity: Activity, stats: &mut TrafficStats) -> Result<(), LoadError>;
}

/// Socket timeouts used by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficTimeouts {
    /// Bound on one UDP send
    pub udp_send: Duration,
    /// Bound on one TCP connect, and on the write that follows it
    pub tcp_connect: Duration,
}

/// UDP/TCP traffic generator for a single connection
#[derive(Debug)]
pub struct TrafficGenerator {
    identity: ConnectionIdentity,
    target: IpAddr,
    endpoints: Arc<ProtocolEndpointSet>,
    ut: UtNetworkSpecs,
    timeouts: TrafficTimeouts,
    rng: StdRng,
}

impl TrafficGenerator {
    /// Create a generator aimed at `target`
    pub fn new(
        identity: ConnectionIdentity,
        target: IpAddr,
        endpoints: Arc<ProtocolEndpointSet>,
        ut: UtNetworkSpecs,
        timeouts: TrafficTimeouts,
    ) -> Self {
        Self {
            identity,
            target,
            endpoints,
            ut,
            timeouts,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a generator from the session configuration
    pub fn from_config(
        identity: ConnectionIdentity,
        target: IpAddr,
        endpoints: Arc<ProtocolEndpointSet>,
        config: &SimulationConfig,
    ) -> Self {
        Self::new(
            identity,
            target,
            endpoints,
            config.ut,
            TrafficTimeouts {
                udp_send: config.tuning.udp_send_timeout,
                tcp_connect: config.tuning.tcp_connect_timeout,
            },
        )
    }

    /// Use a deterministic random source
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    async fn send_server_query(&mut self, stats: &mut TrafficStats) -> Result<(), LoadError> {
        let ports: Vec<u16> = self
            .endpoints
            .ordinary
            .choose_multiple(&mut self.rng, 2)
            .copied()
            .collect();
        let payload = packet::status_query(self.identity);
        for port in ports {
            self.send_udp(port, &payload, stats).await?;
        }
        Ok(())
    }

    async fn attempt_server_join(&mut self, stats: &mut TrafficStats) -> Result<(), LoadError> {
        let candidates = self.endpoints.joinable_ports();
        let port = pick_port(&mut self.rng, &candidates, "joinable")?;
        let payload = packet::join_request(self.identity);
        self.send_udp(port, &payload, stats).await
    }

    async fn send_gameplay_burst(&mut self, stats: &mut TrafficStats) -> Result<(), LoadError> {
        let port = pick_port(&mut self.rng, &self.endpoints.ordinary, "ordinary")?;
        let burst = self.rng.gen_range(5..=15);
        let tick = self.ut.tick_interval();

        for _ in 0..burst {
            let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
            let gameplay =
                packet::gameplay_packet(&mut self.rng, self.identity, &self.ut, timestamp_ms);
            trace!(
                connection = %self.identity,
                kind = ?gameplay.kind,
                size = gameplay.payload.len(),
                "Gameplay packet"
            );
            self.send_udp(port, &gameplay.payload, stats).await?;
            sleep(tick).await;
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self, stats: &mut TrafficStats) -> Result<(), LoadError> {
        let port = pick_port(&mut self.rng, &self.endpoints.bot_query, "bot_query")?;
        let unix_secs = chrono::Utc::now().timestamp().max(0) as u64;
        let payload = packet::heartbeat(self.identity, unix_secs);
        self.send_udp(port, &payload, stats).await
    }

    async fn probe_tcp_port(&mut self, stats: &mut TrafficStats) -> Result<(), LoadError> {
        let port = pick_port(&mut self.rng, &self.endpoints.tcp, "tcp")?;
        let limit = self.timeouts.tcp_connect;

        let mut stream = match timeout(limit, TcpStream::connect((self.target, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                stats.record_tcp_failure();
                stats.record_error(format!("TCP {}: {}", port, e));
                return Ok(());
            }
            Err(_) => {
                stats.record_tcp_failure();
                stats.record_error(format!("TCP {}: connect timed out after {:?}", port, limit));
                return Ok(());
            }
        };
        stats.record_tcp_success();

        // no read: the reply is assumed, not awaited
        let hello = packet::tcp_hello(self.identity, port);
        match timeout(limit, stream.write_all(&hello)).await {
            Ok(Ok(())) => {
                stats.record_bytes_sent(hello.len());
                stats.record_bytes_received(hello.len());
            }
            Ok(Err(e)) => stats.record_error(format!("TCP {}: {}", port, e)),
            Err(_) => stats.record_error(format!("TCP {}: write timed out after {:?}", port, limit)),
        }
        Ok(())
    }

    /// Send one datagram from a fresh socket and count it as answered
    async fn send_udp(
        &self,
        port: u16,
        payload: &[u8],
        stats: &mut TrafficStats,
    ) -> Result<(), LoadError> {
        let socket = UdpSocket::bind(unspecified_for(self.target))
            .await
            .map_err(|e| LoadError::udp(port, e))?;
        let limit = self.timeouts.udp_send;

        match timeout(limit, socket.send_to(payload, (self.target, port))).await {
            Ok(Ok(sent)) => stats.record_optimistic_udp_send(sent),
            Ok(Err(e)) => stats.record_error(format!("UDP {}: {}", port, e)),
            Err(_) => {
                stats.record_udp_timeout();
                stats.record_error(format!("UDP {}: send timed out after {:?}", port, limit));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityRunner for TrafficGenerator {
    async fn run(&mut self, activity: Activity, stats: &mut TrafficStats) -> Result<(), LoadError> {
        match activity {
            Activity::Query => self.send_server_query(stats).await,
            Activity::Join => self.attempt_server_join(stats).await,
            Activity::Gameplay => self.send_gameplay_burst(stats).await,
            Activity::Heartbeat => self.send_heartbeat(stats).await,
            Activity::TcpProbe => self.probe_tcp_port(stats).await,
        }
    }
}

/// Wildcard local address of the same family as `target`
pub(crate) fn unspecified_for(target: IpAddr) -> SocketAddr {
    match target {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

fn pick_port<R: Rng + ?Sized>(rng: &mut R, ports: &[u16], role: &str) -> Result<u16, LoadError> {
    ports.choose(rng).copied().ok_or_else(|| LoadError::Internal {
        reason: format!("no {} ports configured", role),
    })
}
