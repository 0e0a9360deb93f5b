//! UT-shaped payload construction
//!
//! Payloads mimic the backslash-delimited key/value format of Unreal
//! Tournament's query and game protocol closely enough that packet sizes
//! and content look realistic to the firewall under test. The shapes are a
//! fixed policy, not a configurable model.

use crate::config::UtNetworkSpecs;
use crate::identity::ConnectionIdentity;
use bytes::Bytes;
use rand::distributions::WeightedIndex;
use rand::prelude::*;

const WEAPONS: [&str; 9] = [
    "enforcer",
    "biorifle",
    "shockrifle",
    "pulsegun",
    "ripper",
    "minigun",
    "flak",
    "rocket",
    "sniper",
];
const TEAMS: [&str; 4] = ["red", "blue", "green", "gold"];
const SKINS: [&str; 4] = ["male1", "male2", "female1", "female2"];
const CLASSES: [&str; 3] = ["soldier", "heavy", "scout"];

/// Kinds of gameplay packets a client emits during a burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameplayPacketKind {
    /// Position, orientation and velocity
    Move,
    /// Weapon fire with target and hit result
    Fire,
    /// Health, armor, score and loadout
    StateUpdate,
    /// Weapon change
    WeaponSwitch,
    /// Player name, skin, team and class
    PlayerUpdate,
}

impl GameplayPacketKind {
    /// Every kind, in declaration order
    pub const ALL: [GameplayPacketKind; 5] = [
        GameplayPacketKind::Move,
        GameplayPacketKind::Fire,
        GameplayPacketKind::StateUpdate,
        GameplayPacketKind::WeaponSwitch,
        GameplayPacketKind::PlayerUpdate,
    ];

    /// Pick a kind uniformly at random
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Netspeed a simulated client is running with for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetspeedChoice {
    /// The configured default netspeed
    Default,
    /// The configured maximum netspeed
    Max,
    /// A uniformly drawn value between default and maximum
    Variable(u32),
}

impl NetspeedChoice {
    /// Draw a netspeed: default 60%, max 30%, something in between 10%
    pub fn pick<R: Rng + ?Sized>(rng: &mut R, specs: &UtNetworkSpecs) -> Self {
        const WEIGHTS: [u32; 3] = [60, 30, 10];
        let index = match WeightedIndex::new(WEIGHTS) {
            Ok(dist) => dist.sample(rng),
            Err(_) => 0,
        };
        match index {
            0 => NetspeedChoice::Default,
            1 => NetspeedChoice::Max,
            _ => {
                let low = specs.default_netspeed.min(specs.max_netspeed);
                let high = specs.default_netspeed.max(specs.max_netspeed);
                NetspeedChoice::Variable(rng.gen_range(low..=high))
            }
        }
    }

    /// Bytes per second this choice stands for
    pub fn bytes_per_sec(&self, specs: &UtNetworkSpecs) -> u32 {
        match self {
            NetspeedChoice::Default => specs.default_netspeed,
            NetspeedChoice::Max => specs.max_netspeed,
            NetspeedChoice::Variable(v) => *v,
        }
    }
}

/// Server browser status query
pub fn status_query(identity: ConnectionIdentity) -> Bytes {
    Bytes::from(format!("\\status\\\\info\\Player{}", identity))
}

/// Request to join a server
pub fn join_request(identity: ConnectionIdentity) -> Bytes {
    Bytes::from(format!(
        "\\connect\\\\name\\Player{}\\team\\red\\skin\\default",
        identity
    ))
}

/// Keepalive sent to a bot query port
pub fn heartbeat(identity: ConnectionIdentity, unix_secs: u64) -> Bytes {
    Bytes::from(format!("\\heartbeat\\player{}\\time{}", identity, unix_secs))
}

/// Identification line written after a successful TCP connect
pub fn tcp_hello(identity: ConnectionIdentity, port: u16) -> Bytes {
    Bytes::from(format!("Player{} TCP test to port {}", identity, port))
}

/// Unpadded body of a gameplay packet
pub fn gameplay_body<R: Rng + ?Sized>(
    rng: &mut R,
    kind: GameplayPacketKind,
    identity: ConnectionIdentity,
    timestamp_ms: u64,
) -> String {
    let head = |tag: &str| format!("\\{}\\id{}\\time{}", tag, identity, timestamp_ms);
    match kind {
        GameplayPacketKind::Move => format!(
            "{}\\x{}\\y{}\\z{}\\pitch{}\\yaw{}\\roll{}\\vel_x{}\\vel_y{}\\vel_z{}",
            head("move"),
            rng.gen_range(0..=4096),
            rng.gen_range(0..=4096),
            rng.gen_range(0..=1024),
            rng.gen_range(-90..=90),
            rng.gen_range(0..=360),
            rng.gen_range(-180..=180),
            rng.gen_range(-500..=500),
            rng.gen_range(-500..=500),
            rng.gen_range(-200..=200),
        ),
        GameplayPacketKind::Fire => format!(
            "{}\\weapon{}\\target_x{}\\target_y{}\\target_z{}\\hit{}\\damage{}",
            head("fire"),
            pick(rng, &WEAPONS),
            rng.gen_range(0..=4096),
            rng.gen_range(0..=4096),
            rng.gen_range(0..=1024),
            rng.gen_range(0..=1),
            rng.gen_range(20..=100),
        ),
        GameplayPacketKind::StateUpdate => format!(
            "{}\\health{}\\armor{}\\score{}\\deaths{}\\team{}\\weapon{}\\ammo{}",
            head("state"),
            rng.gen_range(1..=199),
            rng.gen_range(0..=150),
            rng.gen_range(0..=50),
            rng.gen_range(0..=20),
            pick(rng, &TEAMS),
            rng.gen_range(0..=9),
            rng.gen_range(0..=999),
        ),
        GameplayPacketKind::WeaponSwitch => format!(
            "{}\\old{}\\new{}\\ammo{}",
            head("weapon"),
            rng.gen_range(0..=9),
            rng.gen_range(0..=9),
            rng.gen_range(0..=999),
        ),
        GameplayPacketKind::PlayerUpdate => format!(
            "{}\\name\\Player{}\\skin\\{}\\team{}\\class\\{}",
            head("player"),
            identity,
            pick(rng, &SKINS),
            pick(rng, &TEAMS[..2]),
            pick(rng, &CLASSES),
        ),
    }
}

/// Append synthetic game state until `payload` is exactly `target` bytes.
///
/// Payloads already at or above `target` are left untouched.
pub fn pad_with_game_state<R: Rng + ?Sized>(rng: &mut R, payload: &mut String, target: usize) {
    if payload.len() >= target {
        return;
    }
    let needed = target - payload.len();
    let mut filler = String::with_capacity(needed + 32);
    filler.push_str("\\gamestate\\");
    let mut player = 0u32;
    while filler.len() < needed {
        if player > 0 {
            filler.push('\\');
        }
        filler.push_str(&format!(
            "player{}\\{}\\{}\\{}",
            player,
            rng.gen_range(100..=999),
            rng.gen_range(100..=999),
            rng.gen_range(0..=360),
        ));
        player += 1;
    }
    // filler is pure ASCII, so any byte index is a char boundary
    filler.truncate(needed);
    payload.push_str(&filler);
}

/// One fully sized gameplay packet
#[derive(Debug, Clone)]
pub struct GameplayPacket {
    /// Kind of packet
    pub kind: GameplayPacketKind,
    /// Netspeed used to size it
    pub netspeed: NetspeedChoice,
    /// Payload size the netspeed model asked for
    pub target_size: usize,
    /// Encoded payload
    pub payload: Bytes,
}

/// Build a gameplay packet sized by the netspeed/tickrate model
pub fn gameplay_packet<R: Rng + ?Sized>(
    rng: &mut R,
    identity: ConnectionIdentity,
    specs: &UtNetworkSpecs,
    timestamp_ms: u64,
) -> GameplayPacket {
    let netspeed = NetspeedChoice::pick(rng, specs);
    let target_size = specs.payload_size(netspeed.bytes_per_sec(specs));
    let kind = GameplayPacketKind::random(rng);
    let mut body = gameplay_body(rng, kind, identity, timestamp_ms);
    pad_with_game_state(rng, &mut body, target_size);
    GameplayPacket {
        kind,
        netspeed,
        target_size,
        payload: Bytes::from(body),
    }
}

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}
