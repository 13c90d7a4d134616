//! Wire payloads exchanged by the game processes and the helpers that build
//! their routing keys and queue names.
//!
//! Keys are dot-delimited: publishers use a fully qualified key such as
//! `army_moves.washington`, subscribers bind with a wildcard such as
//! `army_moves.*`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pause/resume signal broadcast on the direct exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Kind of a unit. Decides who wins a war.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: u32,
    pub rank: UnitRank,
    pub location: String,
}

/// A player and the units it currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub username: String,
    pub units: Vec<Unit>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: Vec::new(),
        }
    }
}

/// Units moved by a player, broadcast on the topic exchange as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: String,
}

/// Raised by the player whose units met an attacker's move. Consumed from the
/// shared `war` queue by whichever client is the defender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

/// A line of game history, published with the binary codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

impl GameLog {
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}

/// `{prefix}.{identity}`, used for both publish keys and per-player queue names.
pub fn qualified(prefix: &str, identity: &str) -> String {
    format!("{prefix}.{identity}")
}

/// Binding key matching every single-segment suffix of `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}
