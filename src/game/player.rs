//! Player records and identities

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Number of players in every match
pub const PLAYER_COUNT: usize = 4;
/// Energy needed to win
pub const MAX_ENERGY: f32 = 100.0;
/// Energy above which a pedalling player earns the consistency bonus
pub const SCORE_THRESHOLD: f32 = 60.0;

/// Player identity, 1..=4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerId(u8);

impl PlayerId {
    pub const ALL: [PlayerId; PLAYER_COUNT] = [PlayerId(1), PlayerId(2), PlayerId(3), PlayerId(4)];

    pub fn new(id: u8) -> Option<Self> {
        (1..=PLAYER_COUNT as u8).contains(&id).then_some(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot in the player table
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for PlayerId {
    type Error = InvalidPlayerId;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidPlayerId(value))
    }
}

impl From<PlayerId> for u8 {
    fn from(id: PlayerId) -> Self {
        id.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("player id must be between 1 and 4, got {0}")]
pub struct InvalidPlayerId(pub u8);

/// Keyboard code bound to a player. Owned by the UI, carried for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputBinding {
    KeyQ,
    KeyW,
    KeyE,
    KeyR,
}

impl InputBinding {
    pub fn for_player(id: PlayerId) -> Self {
        match id.get() {
            1 => Self::KeyQ,
            2 => Self::KeyW,
            3 => Self::KeyE,
            _ => Self::KeyR,
        }
    }
}

/// Mutable per-player state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub binding: InputBinding,
    pub energy: f32,
    pub score: f32,
    pub is_pedaling: bool,
    /// `is_pedaling` came from local input rather than the energy source
    pub pedaling_from_input: bool,
    pub last_input_at: Option<Instant>,
    /// Locally accepted pedals this match
    pub pedal_count: u32,
    /// Last pedal counter reported by the energy source
    pub remote_pedal_count: u32,
}

impl Player {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            binding: InputBinding::for_player(id),
            energy: 0.0,
            score: 0.0,
            is_pedaling: false,
            pedaling_from_input: false,
            last_input_at: None,
            pedal_count: 0,
            remote_pedal_count: 0,
        }
    }

    /// Back to the start-of-match values
    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }

    /// Store energy, keeping it inside [0, MAX_ENERGY]
    pub fn set_energy(&mut self, energy: f32) {
        self.energy = clamp_energy(energy);
    }

    pub fn has_max_energy(&self) -> bool {
        self.energy >= MAX_ENERGY
    }

    pub fn total_pedals(&self) -> u32 {
        self.pedal_count + self.remote_pedal_count
    }
}

/// Clamp an energy reading into the valid domain. NaN reads as empty.
pub fn clamp_energy(energy: f32) -> f32 {
    if energy.is_nan() {
        return 0.0;
    }
    energy.clamp(0.0, MAX_ENERGY)
}

/// The four players of a match, ordered by id
pub fn roster() -> [Player; PLAYER_COUNT] {
    PlayerId::ALL.map(Player::new)
}
