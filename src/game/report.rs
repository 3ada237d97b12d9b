//! Match reports: an in-progress recorder and the immutable finalized form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::player::{InputBinding, Player, PlayerId, PLAYER_COUNT};
use super::settings::GameConfig;

/// How the match was won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictoryType {
    /// Reached max energy
    EnergyMax,
    /// Best score when the match clock ran out
    TimeLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerSummary {
    pub id: PlayerId,
    pub score: f32,
    pub energy: f32,
    pub victory: VictoryType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub id: PlayerId,
    pub binding: InputBinding,
    pub final_energy: f32,
    pub final_score: f32,
    pub total_pedals: u32,
    pub max_energy_reached: f32,
    /// Mean energy sampled at each pedal
    pub average_energy: f32,
}

/// Finalized match record. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub winner: WinnerSummary,
    pub players: Vec<PlayerReport>,
    pub config: GameConfig,
    pub total_pedals: u32,
    pub max_energy_reached: f32,
    pub average_energy: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlayerTally {
    max_energy: f32,
    energy_sum: f32,
    samples: u32,
}

/// Collects statistics while a match is running
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: GameConfig,
    tallies: [PlayerTally; PLAYER_COUNT],
}

impl ReportBuilder {
    pub fn open(config: GameConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
            tallies: [PlayerTally::default(); PLAYER_COUNT],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Sample a player's energy at an accepted pedal
    pub fn record_pedal(&mut self, player: PlayerId, energy: f32) {
        let tally = &mut self.tallies[player.index()];
        tally.energy_sum += energy;
        tally.samples += 1;
        tally.max_energy = tally.max_energy.max(energy);
    }

    /// Track peaks between pedals (remote updates, end of match)
    pub fn observe(&mut self, players: &[Player]) {
        for player in players {
            let tally = &mut self.tallies[player.id.index()];
            tally.max_energy = tally.max_energy.max(player.energy);
        }
    }

    pub fn finalize(mut self, players: &[Player], winner: PlayerId, victory: VictoryType) -> MatchReport {
        self.observe(players);
        let ended_at = Utc::now();

        let reports: Vec<PlayerReport> = players
            .iter()
            .map(|p| {
                let tally = self.tallies[p.id.index()];
                PlayerReport {
                    id: p.id,
                    binding: p.binding,
                    final_energy: p.energy,
                    final_score: p.score.floor(),
                    total_pedals: p.total_pedals(),
                    max_energy_reached: tally.max_energy,
                    average_energy: if tally.samples > 0 {
                        tally.energy_sum / tally.samples as f32
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let winner_player = &players[winner.index()];
        let total_pedals = reports.iter().map(|r| r.total_pedals).sum();
        let max_energy_reached = reports
            .iter()
            .map(|r| r.max_energy_reached)
            .fold(0.0, f32::max);
        let average_energy = if reports.is_empty() {
            0.0
        } else {
            reports.iter().map(|r| r.average_energy).sum::<f32>() / reports.len() as f32
        };

        MatchReport {
            id: self.id,
            started_at: self.started_at,
            ended_at,
            duration_ms: (ended_at - self.started_at).num_milliseconds(),
            winner: WinnerSummary {
                id: winner,
                score: winner_player.score.floor(),
                energy: winner_player.energy,
                victory,
            },
            players: reports,
            config: self.config,
            total_pedals,
            max_energy_reached,
            average_energy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::roster;

    #[test]
    fn finalize_aggregates_pedal_statistics() {
        let mut players = roster();
        let mut builder = ReportBuilder::open(GameConfig::default());

        builder.record_pedal(PlayerId::ALL[0], 20.0);
        builder.record_pedal(PlayerId::ALL[0], 40.0);
        players[0].pedal_count = 2;
        players[0].energy = 100.0;
        players[0].score = 7.8;
        players[2].remote_pedal_count = 5;
        players[2].energy = 30.0;

        let report = builder.finalize(&players, PlayerId::ALL[0], VictoryType::EnergyMax);

        assert_eq!(report.winner.id, PlayerId::ALL[0]);
        assert_eq!(report.winner.score, 7.0);
        assert_eq!(report.winner.victory, VictoryType::EnergyMax);
        assert_eq!(report.total_pedals, 7);
        assert_eq!(report.max_energy_reached, 100.0);
        assert_eq!(report.players[0].average_energy, 30.0);
        assert_eq!(report.players[2].max_energy_reached, 30.0);
        assert_eq!(report.players[1].average_energy, 0.0);
        assert!(report.duration_ms >= 0);
    }

    #[test]
    fn report_serializes_victory_in_snake_case() {
        let players = roster();
        let report = ReportBuilder::open(GameConfig::default()).finalize(
            &players,
            PlayerId::ALL[1],
            VictoryType::TimeLimit,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["winner"]["victory"], "time_limit");
        assert_eq!(json["players"].as_array().map(Vec::len), Some(4));
    }
}
