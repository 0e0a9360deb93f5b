//! Liveness and latency probes against the server under test

use crate::config::SimulationConfig;
use crate::error::LoadError;
use crate::identity::ConnectionIdentity;
use crate::traffic::unspecified_for;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::trace;

/// Answers the two questions the connection loop asks about the server
#[async_trait]
pub trait ServerProbe: Send + Sync {
    /// Whether any availability port answered within its timeout
    async fn is_available(&self) -> bool;

    /// Round-trip time in milliseconds to the first ping port that
    /// answered, or `None` if none did
    async fn measure_latency(&self) -> Option<f64>;
}

/// UDP request/response probe.
///
/// Any reply from the probed port counts; the content is never inspected.
#[derive(Debug, Clone)]
pub struct UdpServerProbe {
    identity: ConnectionIdentity,
    target: IpAddr,
    availability_ports: Vec<u16>,
    ping_ports: Vec<u16>,
    availability_timeout: Duration,
    ping_timeout: Duration,
}

impl UdpServerProbe {
    /// Create a probe with explicit ports and timeouts
    pub fn new(
        identity: ConnectionIdentity,
        target: IpAddr,
        availability_ports: Vec<u16>,
        ping_ports: Vec<u16>,
        availability_timeout: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            target,
            availability_ports,
            ping_ports,
            availability_timeout,
            ping_timeout,
        }
    }

    /// Create a probe from the session configuration
    pub fn from_config(identity: ConnectionIdentity, target: IpAddr, config: &SimulationConfig) -> Self {
        Self::new(
            identity,
            target,
            config.endpoints.availability_ports.clone(),
            config.endpoints.ping_ports.clone(),
            config.tuning.availability_timeout,
            config.tuning.ping_timeout,
        )
    }

    /// Send `payload` to `port` and wait up to `wait` for any reply
    async fn round_trip(&self, port: u16, payload: &[u8], wait: Duration) -> Result<Duration, LoadError> {
        let socket = UdpSocket::bind(unspecified_for(self.target))
            .await
            .map_err(|e| LoadError::udp(port, e))?;
        // connected, so only datagrams from the probed port are accepted
        socket
            .connect((self.target, port))
            .await
            .map_err(|e| LoadError::udp(port, e))?;

        let started = Instant::now();
        let exchange = async {
            socket.send(payload).await?;
            let mut buf = [0u8; 1024];
            socket.recv(&mut buf).await
        };
        match timeout(wait, exchange).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(LoadError::udp(port, e)),
            Err(_) => Err(LoadError::Timeout {
                operation: format!("probe udp/{}", port),
                duration: wait,
            }),
        }
    }
}

#[async_trait]
impl ServerProbe for UdpServerProbe {
    async fn is_available(&self) -> bool {
        let payload = format!("alive-check-{}", self.identity);
        for &port in &self.availability_ports {
            match self.round_trip(port, payload.as_bytes(), self.availability_timeout).await {
                Ok(_) => return true,
                Err(e) => trace!(connection = %self.identity, port, error = %e, "Availability port silent"),
            }
        }
        false
    }

    async fn measure_latency(&self) -> Option<f64> {
        for &port in &self.ping_ports {
            let sent_at = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
            let payload = format!("ping-{}-{}", self.identity, sent_at);
            match self.round_trip(port, payload.as_bytes(), self.ping_timeout).await {
                Ok(rtt) => return Some(rtt.as_secs_f64() * 1000.0),
                Err(e) => trace!(connection = %self.identity, port, error = %e, "Ping port silent"),
            }
        }
        None
    }
}
