//! Game core: players, simulation, win detection, connectivity and lifecycle

pub mod connectivity;
pub mod player;
pub mod report;
pub mod runner;
pub mod session;
pub mod settings;
pub mod simulation;
pub mod snapshot;
pub mod win;

pub use player::PlayerId;
pub use runner::{SessionClosed, SessionCommand, SessionHandle, SessionRunner};
pub use session::{GameSession, MatchPhase, SessionOptions};
pub use settings::{ConfigStore, GameConfig};
