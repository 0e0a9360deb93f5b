//! Fleet coordination
//!
//! Starts one [`ConnectionDriver`] per (player, connection) pair with a
//! short random stagger between starts, waits for every one of them to
//! finish, and hands back their outcomes in start order. A driver task that
//! dies without reporting still shows up, as a crashed connection with no
//! traffic.

use crate::config::SimulationConfig;
use crate::driver::{ConnectionDriver, ConnectionOutcome, DriverSettings};
use crate::error::LoadError;
use crate::identity::ConnectionIdentity;
use crate::probe::{ServerProbe, UdpServerProbe};
use crate::shutdown::{RunState, ShutdownListenerConfig};
use crate::traffic::{ActivityRunner, TrafficGenerator};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{info, warn};

/// Everything the fleet produced
#[derive(Debug, Clone)]
pub struct FleetOutcome {
    /// Wall-clock time the first connection was started
    pub started_at: DateTime<Utc>,
    /// Time from the first start until the last connection finished
    pub session_duration: Duration,
    /// One outcome per connection, in start order
    pub connections: Vec<ConnectionOutcome>,
}

/// Resolve a host name or literal address to an IP address
pub async fn resolve_target(host: &str) -> Result<IpAddr, LoadError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| LoadError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| LoadError::Resolve {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })
}

/// Runs every connection of a session
#[derive(Debug, Clone)]
pub struct Fleet {
    config: Arc<SimulationConfig>,
}

impl Fleet {
    /// Create a fleet for a validated configuration
    pub fn new(config: SimulationConfig) -> Result<Self, LoadError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Session configuration
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Resolve the target and run every connection against it with real
    /// UDP/TCP traffic
    pub async fn run(&self) -> Result<FleetOutcome, LoadError> {
        let target = resolve_target(&self.config.target_server).await?;
        info!(
            target = %target,
            host = %self.config.target_server,
            players = self.config.num_players,
            connections_per_player = self.config.connections_per_player,
            "Resolved target server"
        );

        let config = self.config.clone();
        let endpoints = Arc::new(config.endpoints.clone());
        let settings = DriverSettings::from_config(&config);

        Ok(self
            .run_with(move |identity| {
                let probe = UdpServerProbe::from_config(identity, target, &config);
                let runner =
                    TrafficGenerator::from_config(identity, target, endpoints.clone(), &config);
                let driver = ConnectionDriver::new(identity, settings.clone(), probe, runner);
                match ShutdownListenerConfig::for_identity(identity, &config) {
                    Ok(listener) => driver.with_shutdown_listener(listener),
                    Err(e) => {
                        warn!(connection = %identity, error = %e, "No shutdown port for connection");
                        driver
                    }
                }
            })
            .await)
    }

    /// Run every connection with drivers built by `factory`
    pub async fn run_with<F, P, A>(&self, mut factory: F) -> FleetOutcome
    where
        F: FnMut(ConnectionIdentity) -> ConnectionDriver<P, A>,
        P: ServerProbe + 'static,
        A: ActivityRunner + 'static,
    {
        let total = self.config.total_connections() as usize;
        let tuning = &self.config.tuning;
        let mut rng = StdRng::from_entropy();

        let started_at = Utc::now();
        let started = Instant::now();
        let mut tasks: Vec<(ConnectionIdentity, JoinHandle<ConnectionOutcome>)> =
            Vec::with_capacity(total);
        let mut states: Vec<Arc<RunState>> = Vec::with_capacity(total);

        info!(connections = total, "Starting connection fleet");
        for player in 1..=self.config.num_players {
            for sub in 1..=self.config.connections_per_player {
                let identity = ConnectionIdentity::new(player, sub);
                let driver = factory(identity);
                states.push(driver.run_state());
                tasks.push((identity, tokio::spawn(driver.run())));

                let stagger = if tuning.stagger_max > tuning.stagger_min {
                    rng.gen_range(tuning.stagger_min..=tuning.stagger_max)
                } else {
                    tuning.stagger_min
                };
                sleep(stagger).await;
            }
        }
        info!(connections = tasks.len(), "All connections started");

        let deadline = self.config.session_deadline.map(|limit| {
            let states = states.clone();
            tokio::spawn(async move {
                sleep_until(started + limit).await;
                warn!(
                    deadline_secs = limit.as_secs_f64(),
                    "Session deadline reached, stopping all connections"
                );
                for state in states {
                    state.request_shutdown();
                }
            })
        });

        let connections = join_all(tasks.into_iter().map(|(identity, handle)| async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(connection = %identity, error = %e, "Connection task lost");
                    ConnectionOutcome::lost(identity, format!("Task failed: {}", e))
                }
            }
        }))
        .await;

        if let Some(watcher) = deadline {
            watcher.abort();
        }

        let session_duration = started.elapsed();
        info!(
            connections = connections.len(),
            session_secs = session_duration.as_secs_f64(),
            "All connections finished"
        );

        FleetOutcome {
            started_at,
            session_duration,
            connections,
        }
    }
}
