//! Out-of-band shutdown signalling
//!
//! Each connection owns a [`RunState`] shared between its driver and its
//! [`ShutdownListener`]. The listener flips `shutdown_received` when the
//! shutdown token arrives; the driver flips `running` off when it stops,
//! which in turn ends the listener at its next poll.

use crate::config::{ShutdownConfig, SimulationConfig};
use crate::error::LoadError;
use crate::identity::ConnectionIdentity;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Flags shared between a connection driver and its shutdown listener
#[derive(Debug, Default)]
pub struct RunState {
    running: AtomicBool,
    shutdown_received: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl RunState {
    /// Fresh state: not running, no shutdown, no failures
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether the owning driver is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the driver as running
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Mark the driver as stopped
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Ask the driver to end gracefully
    pub fn request_shutdown(&self) {
        self.shutdown_received.store(true, Ordering::Release);
    }

    /// Whether a graceful shutdown was requested
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_received.load(Ordering::Acquire)
    }

    /// Current run of failed liveness probes
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Record a liveness probe outcome and return the updated failure run.
    ///
    /// A success resets the run to zero.
    pub fn record_probe(&self, available: bool) -> u32 {
        if available {
            self.consecutive_failures.store(0, Ordering::Release);
            0
        } else {
            self.consecutive_failures
                .fetch_add(1, Ordering::AcqRel)
                .saturating_add(1)
        }
    }
}

/// How a shutdown listener ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// The shutdown token arrived
    TokenReceived,
    /// The driver stopped running first
    Stopped,
}

/// Where and what a shutdown listener listens for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownListenerConfig {
    /// Local address to bind
    pub bind_addr: SocketAddr,
    /// Exact datagram payload that requests shutdown
    pub token: String,
    /// Receive timeout of one poll
    pub poll_interval: Duration,
}

impl ShutdownListenerConfig {
    /// Listener on the wildcard address at the connection's own shutdown
    /// port. Fails when the port falls outside the configured range.
    pub fn for_identity(
        identity: ConnectionIdentity,
        config: &SimulationConfig,
    ) -> Result<Self, LoadError> {
        let ShutdownConfig {
            token,
            base_port,
            port_span,
            poll_interval,
        } = &config.shutdown;
        let port = identity
            .shutdown_port(*base_port, config.connections_per_player)
            .filter(|&port| u32::from(port - base_port) < u32::from(*port_span))
            .ok_or_else(|| LoadError::InvalidConfiguration {
                field: "shutdown.port_span".to_string(),
                reason: format!(
                    "connection {} has no shutdown port in {} ports from {}",
                    identity, port_span, base_port
                ),
            })?;
        Ok(Self {
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
            token: token.clone(),
            poll_interval: *poll_interval,
        })
    }
}

/// What one listener poll produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    Idle,
    Token,
    Noise,
    Failed,
}

/// UDP listener waiting for the shutdown token
#[derive(Debug)]
pub struct ShutdownListener {
    identity: ConnectionIdentity,
    socket: UdpSocket,
    token: String,
    poll_interval: Duration,
    state: Arc<RunState>,
}

impl ShutdownListener {
    /// Bind the listener socket
    pub async fn bind(
        identity: ConnectionIdentity,
        config: &ShutdownListenerConfig,
        state: Arc<RunState>,
    ) -> Result<Self, LoadError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| LoadError::udp(config.bind_addr.port(), e))?;
        Ok(Self {
            identity,
            socket,
            token: config.token.clone(),
            poll_interval: config.poll_interval,
            state,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, LoadError> {
        self.socket
            .local_addr()
            .map_err(|e| LoadError::udp(0, e))
    }

    /// Run the listener on its own task
    pub fn spawn(self) -> JoinHandle<ListenerExit> {
        tokio::spawn(self.run())
    }

    /// Poll for the token until it arrives or the driver stops.
    ///
    /// The socket is closed when this returns.
    pub async fn run(self) -> ListenerExit {
        let port = self.socket.local_addr().map(|a| a.port()).unwrap_or_default();
        info!(connection = %self.identity, port, "Shutdown listener started");

        let mut buf = [0u8; 1024];
        while self.state.is_running() {
            match self.poll_once(&mut buf).await {
                Poll::Idle | Poll::Noise => {}
                Poll::Token => {
                    self.state.request_shutdown();
                    return ListenerExit::TokenReceived;
                }
                // a failing socket must not spin the task
                Poll::Failed => sleep(self.poll_interval).await,
            }
        }

        debug!(connection = %self.identity, port, "Shutdown listener stopped");
        ListenerExit::Stopped
    }

    async fn poll_once(&self, buf: &mut [u8]) -> Poll {
        let received = match timeout(self.poll_interval, self.socket.recv_from(buf)).await {
            Err(_) => return Poll::Idle,
            Ok(received) => received,
        };
        self.classify(received.map(|(len, from)| (&buf[..len], from)))
    }

    fn classify(&self, received: std::io::Result<(&[u8], SocketAddr)>) -> Poll {
        match received {
            Err(e) => {
                debug!(connection = %self.identity, error = %e, "Shutdown listener receive failed");
                Poll::Failed
            }
            Ok((payload, from)) if payload == self.token.as_bytes() => {
                info!(connection = %self.identity, %from, "Shutdown token received");
                Poll::Token
            }
            Ok((payload, from)) => {
                warn!(
                    connection = %self.identity,
                    %from,
                    len = payload.len(),
                    "Ignoring unexpected datagram on shutdown port"
                );
                Poll::Noise
            }
        }
    }
}
