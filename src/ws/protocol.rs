//! WebSocket protocol message definitions
//! These are the wire types between the host and UI clients

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::player::PlayerId;
use crate::game::report::{MatchReport, VictoryType};
use crate::game::session::MatchPhase;
use crate::game::settings::GameConfig;

/// Messages sent from client to host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Key down / pedal stroke
    Pedal { player: PlayerId },
    /// Key up
    StopPedaling { player: PlayerId },
    StartGame,
    ResetGame,
    /// Reset and immediately start
    NewGame,
    /// Probe the energy source now
    RetryConnection,
    SetAutoReconnect { enabled: bool },
    /// Latency probe
    Ping { t: u64 },
}

/// Messages sent from host to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once on connect
    Welcome { connection_id: Uuid, server_time: u64 },
    /// Periodic full state
    Snapshot(SessionSnapshot),
    /// Domain event, pushed as it happens
    Event(GameEvent),
    Pong { t: u64 },
    Error { code: String, message: String },
}

/// What started a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    /// Start button / API call
    Command,
    /// Energy source reported an active game while we were waiting
    RemoteActivity,
    /// Auto-restart countdown after a win
    AutoRestart,
}

/// Domain events emitted by session mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    MatchStarted {
        trigger: StartTrigger,
    },

    /// Pedal or reconciliation changed a player's energy (decay is carried by snapshots)
    EnergyChanged {
        player: PlayerId,
        energy: f32,
        is_pedaling: bool,
    },

    WinnerDeclared {
        player: PlayerId,
        victory: VictoryType,
    },

    /// Fired once per completed match
    ReportFinalized {
        report: MatchReport,
    },

    MatchReset,

    ConnectivityChanged {
        offline: bool,
    },

    AutoReconnectChanged {
        enabled: bool,
    },

    ConfigChanged {
        config: GameConfig,
    },
}

/// Read-only player view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub energy: f32,
    pub score: f32,
    pub is_pedaling: bool,
    /// Local plus source-reported pedals this match
    pub pedals: u32,
}

/// Read-only session view shared with HTTP handlers and pushed to sockets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: MatchPhase,
    pub winner: Option<PlayerId>,
    pub players: Vec<PlayerSnapshot>,
    pub offline: bool,
    pub auto_reconnect: bool,
    pub consecutive_failures: u32,
    pub config: GameConfig,
    pub server_time: u64,
}
