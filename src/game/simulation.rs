//! Local simulation: per-tick decay and score accrual, and pedal input

use std::time::{Duration, Instant};

use crate::util::time::SIMULATION_TPS;

use super::player::{Player, SCORE_THRESHOLD};
use super::settings::GameConfig;

/// Minimum spacing between two accepted inputs from one player
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
/// A locally pedalling player with no input for this long stops pedalling
pub const PEDAL_IDLE_TIMEOUT: Duration = Duration::from_secs(2);
/// Consistency bonus per tick while pedalling above the score threshold
pub const TICK_SCORE_BONUS: f32 = 0.05;
/// Residue left by f32 decay steps is treated as empty
const DECAY_SNAP: f32 = 1e-3;

/// Energy after one tick of decay
pub fn decay_step(energy: f32, decay_rate: f32) -> f32 {
    let next = energy - decay_rate / SIMULATION_TPS as f32;
    if next <= DECAY_SNAP {
        0.0
    } else {
        next
    }
}

/// Advance every player by one tick.
///
/// Callers run the win detector once after this returns, never per player.
pub fn simulate_tick(players: &mut [Player], config: &GameConfig, now: Instant) {
    for player in players.iter_mut() {
        if player.is_pedaling
            && player.pedaling_from_input
            && player
                .last_input_at
                .is_some_and(|at| now.saturating_duration_since(at) >= PEDAL_IDLE_TIMEOUT)
        {
            player.is_pedaling = false;
            player.pedaling_from_input = false;
        }

        if !player.is_pedaling && player.energy > 0.0 {
            player.set_energy(decay_step(player.energy, config.energy_decay_rate));
        }

        if player.is_pedaling && player.energy > SCORE_THRESHOLD {
            player.score += TICK_SCORE_BONUS;
        }
    }
}

/// Debounce gate. A rejected input is rate limiting, not an error.
pub fn accept_input(player: &Player, now: Instant, debounce: Duration) -> bool {
    match player.last_input_at {
        Some(last) => now.saturating_duration_since(last) >= debounce,
        None => true,
    }
}

/// Score for one pedal at the given (post-gain) energy
pub fn pedal_score(energy: f32) -> f32 {
    0.5 + (energy / 20.0).floor()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PedalOutcome {
    pub energy: f32,
    pub score_gained: f32,
    pub reached_max: bool,
}

/// Apply an accepted pedal to a player
pub fn apply_pedal(player: &mut Player, config: &GameConfig, now: Instant) -> PedalOutcome {
    stamp_input(player, now);
    let energy = player.energy + config.energy_gain_rate;
    apply_gain(player, energy)
}

/// Mark an accepted input without touching energy (the energy source applies it)
pub fn stamp_input(player: &mut Player, now: Instant) {
    player.is_pedaling = true;
    player.pedaling_from_input = true;
    player.last_input_at = Some(now);
    player.pedal_count += 1;
}

/// Set the post-pedal energy and credit the pedal score
pub fn apply_gain(player: &mut Player, energy: f32) -> PedalOutcome {
    player.set_energy(energy);
    let score_gained = pedal_score(player.energy);
    player.score += score_gained;

    PedalOutcome {
        energy: player.energy,
        score_gained,
        reached_max: player.has_max_energy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{roster, PlayerId, MAX_ENERGY};

    fn config(gain: f32, decay: f32) -> GameConfig {
        GameConfig {
            energy_gain_rate: gain,
            energy_decay_rate: decay,
            ..GameConfig::default()
        }
    }

    #[test]
    fn pedal_clamps_at_max() {
        let mut player = Player::new(PlayerId::ALL[0]);
        player.energy = 95.0;
        let outcome = apply_pedal(&mut player, &config(10.0, 6.0), Instant::now());
        assert_eq!(outcome.energy, MAX_ENERGY);
        assert!(outcome.reached_max);
        assert!(player.is_pedaling);
        assert_eq!(player.pedal_count, 1);
    }

    #[test]
    fn pedal_score_grows_with_energy() {
        assert_eq!(pedal_score(5.0), 0.5);
        assert_eq!(pedal_score(20.0), 1.5);
        assert_eq!(pedal_score(99.0), 4.5);
    }

    #[test]
    fn decay_from_sixty_takes_exactly_ten_seconds() {
        let mut players = roster();
        players[0].energy = 60.0;
        let cfg = config(5.0, 6.0);
        let now = Instant::now();

        for _ in 0..599 {
            simulate_tick(&mut players, &cfg, now);
            assert!(players[0].energy >= 0.0);
        }
        assert!(players[0].energy > 0.0);

        simulate_tick(&mut players, &cfg, now);
        assert_eq!(players[0].energy, 0.0);

        simulate_tick(&mut players, &cfg, now);
        assert_eq!(players[0].energy, 0.0);
    }

    #[test]
    fn pedalling_players_do_not_decay_and_earn_bonus() {
        let mut players = roster();
        let now = Instant::now();
        players[1].energy = 70.0;
        players[1].is_pedaling = true;
        players[1].last_input_at = Some(now);
        players[2].energy = 50.0;
        players[2].is_pedaling = true;
        players[2].last_input_at = Some(now);

        simulate_tick(&mut players, &config(5.0, 15.0), now);

        assert_eq!(players[1].energy, 70.0);
        assert!((players[1].score - TICK_SCORE_BONUS).abs() < f32::EPSILON);
        // Below the threshold: no bonus, still no decay
        assert_eq!(players[2].energy, 50.0);
        assert_eq!(players[2].score, 0.0);
    }

    #[test]
    fn zero_decay_leaves_energy_alone() {
        let mut players = roster();
        players[0].energy = 33.0;
        simulate_tick(&mut players, &config(5.0, 0.0), Instant::now());
        assert_eq!(players[0].energy, 33.0);
    }

    #[test]
    fn stale_local_pedalling_expires() {
        let mut players = roster();
        let start = Instant::now();
        players[0].energy = 40.0;
        players[0].is_pedaling = true;
        players[0].pedaling_from_input = true;
        players[0].last_input_at = Some(start);

        simulate_tick(&mut players, &config(5.0, 6.0), start + Duration::from_secs(1));
        assert!(players[0].is_pedaling);

        simulate_tick(&mut players, &config(5.0, 6.0), start + PEDAL_IDLE_TIMEOUT);
        assert!(!players[0].is_pedaling);
        assert!(players[0].energy < 40.0);
    }

    #[test]
    fn source_reported_pedalling_never_expires_locally() {
        let mut players = roster();
        let start = Instant::now();
        players[0].energy = 40.0;
        players[0].is_pedaling = true;
        players[0].last_input_at = Some(start);

        simulate_tick(&mut players, &config(5.0, 6.0), start + Duration::from_secs(10));
        assert!(players[0].is_pedaling);
        assert_eq!(players[0].energy, 40.0);
    }

    #[test]
    fn debounce_window_rejects_rapid_input() {
        let mut player = Player::new(PlayerId::ALL[3]);
        let t0 = Instant::now();
        assert!(accept_input(&player, t0, DEFAULT_DEBOUNCE));

        apply_pedal(&mut player, &GameConfig::default(), t0);
        assert!(!accept_input(&player, t0 + Duration::from_millis(49), DEFAULT_DEBOUNCE));
        assert!(accept_input(&player, t0 + Duration::from_millis(50), DEFAULT_DEBOUNCE));
    }
}
