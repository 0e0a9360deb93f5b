//! Static port layout of the firewalled game server

use serde::{Deserialize, Serialize};

/// Logical role a UDP port plays on the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRole {
    /// Ordinary public game servers
    Ordinary,
    /// Private (password protected) servers
    Private,
    /// Tournament servers
    Tournament,
    /// Special purpose servers, including bot query ports
    Special,
}

/// Fixed mapping from server role to UDP ports, plus TCP ports and the
/// ports used for probing.
///
/// Built once and shared read-only by every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEndpointSet {
    /// Ordinary game server UDP ports
    pub ordinary: Vec<u16>,
    /// Private server UDP ports
    pub private: Vec<u16>,
    /// Tournament server UDP ports
    pub tournament: Vec<u16>,
    /// Special server UDP ports
    pub special: Vec<u16>,
    /// Bot query ports used for heartbeats
    pub bot_query: Vec<u16>,
    /// TCP ports exercised by the TCP probe activity
    pub tcp: Vec<u16>,
    /// Ordered UDP ports tried by the liveness probe
    pub availability_ports: Vec<u16>,
    /// Ordered UDP ports tried by the latency probe
    pub ping_ports: Vec<u16>,
}

impl ProtocolEndpointSet {
    /// UDP ports for the given role
    pub fn udp_ports(&self, role: ServerRole) -> &[u16] {
        match role {
            ServerRole::Ordinary => &self.ordinary,
            ServerRole::Private => &self.private,
            ServerRole::Tournament => &self.tournament,
            ServerRole::Special => &self.special,
        }
    }

    /// Ports a join attempt may target: ordinary servers followed by private ones
    pub fn joinable_ports(&self) -> Vec<u16> {
        self.ordinary
            .iter()
            .chain(self.private.iter())
            .copied()
            .collect()
    }
}

impl Default for ProtocolEndpointSet {
    fn default() -> Self {
        Self {
            ordinary: vec![6962, 6963, 9696, 9697, 7787, 7797],
            private: vec![9090, 9091, 5555, 5556, 7766, 7767],
            tournament: vec![5858, 5859, 4848, 4849],
            special: vec![
                6669, 6670, 6979, 6996, 6997, 8888, 8889, 9669, 9670, 19999, 19998,
            ],
            bot_query: vec![19999, 19998],
            tcp: vec![21, 1194, 6567, 19999],
            availability_ports: vec![6962, 9696, 6963],
            ping_ports: vec![9696, 6962, 6963],
        }
    }
}
