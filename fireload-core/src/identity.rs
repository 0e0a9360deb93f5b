//! Connection identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one simulated connection: which logical player owns it and
/// which of that player's concurrent connections it is.
///
/// Both indices are 1-based, matching how players are numbered in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    /// Logical player number (1-based)
    pub player: u32,
    /// Connection index within the player (1-based)
    pub sub: u32,
}

impl ConnectionIdentity {
    /// Create an identity for the given player and sub-connection
    pub fn new(player: u32, sub: u32) -> Self {
        Self { player, sub }
    }

    /// Zero-based position of this connection in a fleet laid out player by
    /// player with `connections_per_player` connections each.
    pub fn ordinal(&self, connections_per_player: u32) -> u32 {
        let player = self.player.saturating_sub(1);
        let sub = self.sub.saturating_sub(1);
        player
            .saturating_mul(connections_per_player)
            .saturating_add(sub)
    }

    /// Port on which this connection listens for the shutdown token.
    ///
    /// Every connection of a fleet gets its own port, `base_port + ordinal`.
    /// Returns `None` when that port does not fit in a `u16`.
    pub fn shutdown_port(&self, base_port: u16, connections_per_player: u32) -> Option<u16> {
        let offset = u16::try_from(self.ordinal(connections_per_player)).ok()?;
        base_port.checked_add(offset)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.player, self.sub)
    }
}
