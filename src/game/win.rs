//! Win detection

use super::player::{Player, PlayerId};
use super::session::MatchPhase;

/// Lowest-id player at max energy, evaluated only while a match is running.
///
/// Runs once per mutation batch (a tick, a reconciled poll, a pedal), so
/// several players crossing together always resolve to the same winner.
pub fn detect_winner(players: &[Player], phase: MatchPhase) -> Option<PlayerId> {
    if phase != MatchPhase::Playing {
        return None;
    }
    players
        .iter()
        .filter(|p| p.has_max_energy())
        .map(|p| p.id)
        .min()
}

/// Winner when the match clock runs out: highest score, ties to the lowest id
pub fn time_limit_winner(players: &[Player]) -> Option<PlayerId> {
    players
        .iter()
        .fold(None::<&Player>, |best, p| match best {
            Some(b) if b.score > p.score || (b.score == p.score && b.id < p.id) => Some(b),
            _ => Some(p),
        })
        .map(|p| p.id)
}
