//! Companion test server
//!
//! Listens on the ports the firewall under test is supposed to let through,
//! answers client traffic, keeps per-port counters, and notifies every
//! client it has seen when it stops.

use crate::broadcast::{resolve_targets, ShutdownBroadcaster};
use crate::config::ServerConfig;
use crate::listener::{ClientSet, ListenerStats, PortListener, Protocol};
use crate::report::{PortReport, ServerReport};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fireload_core::LoadError;
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Counters of every running listener, keyed by (protocol, port)
pub type PortStatsMap = Arc<DashMap<(Protocol, u16), Arc<ListenerStats>>>;

/// Test server coordinating all port listeners
#[derive(Debug)]
pub struct TestServer {
    config: ServerConfig,
    stats: PortStatsMap,
    clients: ClientSet,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    started: Option<(DateTime<Utc>, Instant)>,
}

impl TestServer {
    /// Create a server; nothing is bound until [`TestServer::start`]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            stats: Arc::new(DashMap::new()),
            clients: ClientSet::default(),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
            started: None,
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start every configured listener.
    ///
    /// Ports that cannot be bound are logged and skipped; starting fails only
    /// when no listener at all could be bound. Returns the number of running
    /// listeners.
    pub async fn start(&mut self) -> Result<usize, LoadError> {
        self.config.validate()?;
        self.running.store(true, Ordering::Release);
        info!(bind = %self.config.bind_ip, "Server starting, initializing port listeners");

        let wanted: Vec<(Protocol, u16)> = self
            .config
            .tcp_ports
            .iter()
            .map(|&port| (Protocol::Tcp, port))
            .chain(self.config.udp_ports.iter().map(|&port| (Protocol::Udp, port)))
            .collect();

        let mut last_error = None;
        for (protocol, port) in wanted {
            let bound = PortListener::bind(
                protocol,
                self.config.bind_ip,
                port,
                self.config.poll_interval,
                self.clients.clone(),
                self.running.clone(),
            )
            .await;
            match bound {
                Ok(listener) => {
                    self.stats
                        .insert((protocol, listener.port()), listener.stats());
                    self.tasks.push(tokio::spawn(listener.run()));
                }
                Err(e) => {
                    warn!(%protocol, port, error = %e, "Failed to start listener");
                    last_error = Some(e);
                }
            }
        }

        if self.tasks.is_empty() {
            self.running.store(false, Ordering::Release);
            return Err(last_error.unwrap_or_else(|| LoadError::MissingConfiguration {
                field: "tcp_ports/udp_ports".to_string(),
            }));
        }

        self.started = Some((Utc::now(), Instant::now()));
        info!(listeners = self.tasks.len(), "Server started");
        Ok(self.tasks.len())
    }

    /// Whether listeners are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ports actually bound for `protocol`, in ascending order
    pub fn bound_ports(&self, protocol: Protocol) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .stats
            .iter()
            .filter(|entry| entry.key().0 == protocol)
            .map(|entry| entry.key().1)
            .collect();
        ports.sort_unstable();
        ports
    }

    /// Current per-port totals
    pub fn port_reports(&self) -> Vec<PortReport> {
        let mut reports: Vec<PortReport> = self
            .stats
            .iter()
            .map(|entry| {
                let (protocol, port) = *entry.key();
                let stats = entry.value();
                PortReport {
                    protocol,
                    port,
                    connections: stats.connections(),
                    packets: stats.packets(),
                    bytes_received: stats.bytes_received(),
                }
            })
            .collect();
        reports.sort_by_key(|r| (r.protocol, r.port));
        reports
    }

    /// Client addresses seen so far
    pub fn tracked_clients(&self) -> Vec<IpAddr> {
        let mut clients: Vec<IpAddr> = self.clients.read().iter().copied().collect();
        clients.sort();
        clients
    }

    /// Remember a client address for shutdown notification
    pub fn track_client(&self, ip: IpAddr) {
        self.clients.write().insert(ip);
    }

    /// Log one status line
    pub fn log_status(&self) {
        let reports = self.port_reports();
        let tcp: u64 = reports.iter().map(|r| r.connections).sum();
        let udp: u64 = reports.iter().map(|r| r.packets).sum();
        info!(
            tcp_connections = tcp,
            udp_packets = udp,
            clients = self.clients.read().len(),
            "Server status"
        );
    }

    /// Keep serving for `duration`, logging status periodically
    pub async fn run_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut ticker = interval(self.config.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => self.log_status(),
            }
        }
    }

    /// Notify clients, stop every listener and report what was seen
    pub async fn stop(&mut self) -> ServerReport {
        info!("Server stopping, notifying clients");

        let mut targets = self.tracked_clients();
        for ip in resolve_targets(&self.config.extra_targets).await {
            if !targets.contains(&ip) {
                targets.push(ip);
            }
        }
        let summary = ShutdownBroadcaster::new(&self.config.shutdown)
            .broadcast(&targets)
            .await;

        self.running.store(false, Ordering::Release);
        for result in join_all(self.tasks.drain(..)).await {
            if let Err(e) = result {
                warn!(error = %e, "Listener task failed");
            }
        }

        let (started_at, started) = self
            .started
            .take()
            .unwrap_or_else(|| (Utc::now(), Instant::now()));
        let ports = self.port_reports();
        let report = ServerReport {
            started_at,
            stopped_at: Utc::now(),
            uptime_secs: started.elapsed().as_secs_f64(),
            total_tcp_connections: ports.iter().map(|p| p.connections).sum(),
            total_udp_packets: ports.iter().map(|p| p.packets).sum(),
            ports,
            tracked_clients: self.tracked_clients(),
            shutdown_notifications_sent: summary.sent,
        };
        info!(
            tcp_connections = report.total_tcp_connections,
            udp_packets = report.total_udp_packets,
            uptime_secs = report.uptime_secs,
            "Server stopped"
        );
        report
    }
}
