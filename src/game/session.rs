//! Game lifecycle controller
//!
//! `GameSession` owns the match state, tuning and connectivity state. It is
//! a plain struct with no I/O: every mutation takes the current instant and
//! returns the domain events it produced, so the runner can publish them and
//! perform the matching side effects (notifications, report persistence).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::store::source::RemoteSnapshot;
use crate::util::time::unix_millis;
use crate::ws::protocol::{GameEvent, PlayerSnapshot, SessionSnapshot, StartTrigger};

use super::connectivity::{ConnectivityManager, FailureKind, ReconnectPolicy};
use super::player::{clamp_energy, roster, Player, PlayerId, PLAYER_COUNT};
use super::report::{ReportBuilder, VictoryType};
use super::settings::GameConfig;
use super::simulation::{self, DEFAULT_DEBOUNCE};
use super::win::{detect_winner, time_limit_winner};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Idle between matches
    Waiting,
    /// Match in progress
    Playing,
    /// Winner declared, players frozen
    Finished,
}

/// Optional capabilities and timings of a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub debounce: Duration,
    /// Finished matches restart on their own after this delay
    pub auto_restart_delay: Option<Duration>,
    pub match_time_limit: Option<Duration>,
    /// Forward pedals to the energy source while online
    pub remote_pedal: bool,
    /// Start a waiting match when the source reports an active game
    pub remote_auto_start: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            auto_restart_delay: Some(Duration::from_secs(10)),
            match_time_limit: None,
            remote_pedal: false,
            remote_auto_start: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.debounce,
            auto_restart_delay: config.auto_restart_delay,
            match_time_limit: config.match_time_limit,
            remote_pedal: config.remote_pedal,
            remote_auto_start: config.remote_auto_start,
            reconnect: ReconnectPolicy {
                probe_interval: config.reconnect_interval,
                max_attempts: config.max_reconnect_attempts,
            },
        }
    }
}

/// What happened to a pedal input
#[derive(Debug, Clone, PartialEq)]
pub enum PedalResult {
    /// No match running
    Ignored,
    /// Inside the debounce window
    Debounced,
    /// Applied locally
    Applied(Vec<GameEvent>),
    /// Accepted; the energy source must register it (`POST /api/pedal`)
    Forward,
}

pub struct GameSession {
    phase: MatchPhase,
    players: [Player; PLAYER_COUNT],
    winner: Option<PlayerId>,
    config: GameConfig,
    connectivity: ConnectivityManager,
    options: SessionOptions,
    report: Option<ReportBuilder>,
    started_at: Option<Instant>,
    /// Single auto-restart deadline; cancelled by overwriting with None
    restart_at: Option<Instant>,
}

impl GameSession {
    pub fn new(config: GameConfig, options: SessionOptions) -> Self {
        Self {
            phase: MatchPhase::Waiting,
            players: roster(),
            winner: None,
            config: config.clamped(),
            connectivity: ConnectivityManager::new(options.reconnect),
            options,
            report: None,
            started_at: None,
            restart_at: None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> &Player {
        &self.players[id.index()]
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityManager {
        &self.connectivity
    }

    pub fn restart_at(&self) -> Option<Instant> {
        self.restart_at
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Waiting → Playing. Any other phase is a silent no-op.
    pub fn start(&mut self, trigger: StartTrigger, now: Instant) -> Vec<GameEvent> {
        if self.phase != MatchPhase::Waiting {
            debug!(phase = ?self.phase, "Start ignored, match not waiting");
            return Vec::new();
        }

        self.reset_players();
        self.phase = MatchPhase::Playing;
        self.winner = None;
        self.started_at = Some(now);
        self.restart_at = None;

        let report = ReportBuilder::open(self.config);
        info!(report_id = %report.id(), ?trigger, "Match started");
        self.report = Some(report);

        vec![GameEvent::MatchStarted { trigger }]
    }

    /// Playing|Finished → Waiting. Connectivity is left alone.
    pub fn reset(&mut self) -> Vec<GameEvent> {
        if self.phase == MatchPhase::Waiting {
            return Vec::new();
        }

        self.reset_players();
        self.phase = MatchPhase::Waiting;
        self.winner = None;
        self.report = None;
        self.started_at = None;
        self.restart_at = None;

        info!("Match reset");
        vec![GameEvent::MatchReset]
    }

    /// Reset (if needed) and start straight away
    pub fn new_game(&mut self, trigger: StartTrigger, now: Instant) -> Vec<GameEvent> {
        let mut events = self.reset();
        events.extend(self.start(trigger, now));
        events
    }

    fn reset_players(&mut self) {
        for player in self.players.iter_mut() {
            player.reset();
        }
    }

    /// Playing → Finished. First writer wins; later calls find the phase changed.
    fn finish(&mut self, winner: PlayerId, victory: VictoryType, now: Instant) -> Vec<GameEvent> {
        if self.phase != MatchPhase::Playing {
            return Vec::new();
        }

        self.phase = MatchPhase::Finished;
        self.winner = Some(winner);
        for player in self.players.iter_mut() {
            player.is_pedaling = false;
            player.pedaling_from_input = false;
        }
        self.restart_at = self.options.auto_restart_delay.map(|delay| now + delay);

        let player = &self.players[winner.index()];
        info!(
            winner = %winner,
            score = player.score,
            energy = player.energy,
            ?victory,
            "Winner declared"
        );

        let mut events = vec![GameEvent::WinnerDeclared {
            player: winner,
            victory,
        }];
        let report = self
            .report
            .take()
            .unwrap_or_else(|| ReportBuilder::open(self.config));
        events.push(GameEvent::ReportFinalized {
            report: report.finalize(&self.players, winner, victory),
        });
        events
    }

    /// Run the win detector once over the current batch
    fn evaluate_win(&mut self, now: Instant) -> Vec<GameEvent> {
        match detect_winner(&self.players, self.phase) {
            Some(winner) => self.finish(winner, VictoryType::EnergyMax, now),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------

    /// One simulation tick, plus the timers that hang off it
    pub fn tick(&mut self, now: Instant) -> Vec<GameEvent> {
        match self.phase {
            MatchPhase::Playing => {
                simulation::simulate_tick(&mut self.players, &self.config, now);
                let mut events = self.evaluate_win(now);
                events.extend(self.check_time_limit(now));
                events
            }
            MatchPhase::Finished => self.check_auto_restart(now),
            MatchPhase::Waiting => Vec::new(),
        }
    }

    fn check_time_limit(&mut self, now: Instant) -> Vec<GameEvent> {
        let (Some(limit), Some(started)) = (self.options.match_time_limit, self.started_at) else {
            return Vec::new();
        };
        if self.phase != MatchPhase::Playing || now.saturating_duration_since(started) < limit {
            return Vec::new();
        }
        match time_limit_winner(&self.players) {
            Some(winner) => self.finish(winner, VictoryType::TimeLimit, now),
            None => Vec::new(),
        }
    }

    fn check_auto_restart(&mut self, now: Instant) -> Vec<GameEvent> {
        match self.restart_at {
            Some(at) if at <= now => {
                info!("Auto-restarting match");
                self.new_game(StartTrigger::AutoRestart, now)
            }
            _ => Vec::new(),
        }
    }

    /// Local pedal input
    pub fn pedal(&mut self, id: PlayerId, now: Instant) -> PedalResult {
        if self.phase != MatchPhase::Playing {
            return PedalResult::Ignored;
        }

        let forward = self.forwards_pedals();
        let player = &mut self.players[id.index()];
        if !simulation::accept_input(player, now, self.options.debounce) {
            return PedalResult::Debounced;
        }

        if forward {
            simulation::stamp_input(player, now);
            return PedalResult::Forward;
        }

        let outcome = simulation::apply_pedal(player, &self.config, now);
        let is_pedaling = player.is_pedaling;
        if let Some(report) = self.report.as_mut() {
            report.record_pedal(id, outcome.energy);
        }

        let mut events = vec![GameEvent::EnergyChanged {
            player: id,
            energy: outcome.energy,
            is_pedaling,
        }];
        if outcome.reached_max {
            events.extend(self.evaluate_win(now));
        }
        PedalResult::Applied(events)
    }

    /// Energy reported back by the source for a forwarded pedal
    pub fn apply_pedal_ack(&mut self, id: PlayerId, energy: f32, now: Instant) -> Vec<GameEvent> {
        if self.phase != MatchPhase::Playing {
            return Vec::new();
        }
        let player = &mut self.players[id.index()];
        let outcome = simulation::apply_gain(player, energy);
        let is_pedaling = player.is_pedaling;
        if let Some(report) = self.report.as_mut() {
            report.record_pedal(id, outcome.energy);
        }

        let mut events = vec![GameEvent::EnergyChanged {
            player: id,
            energy: outcome.energy,
            is_pedaling,
        }];
        events.extend(self.evaluate_win(now));
        events
    }

    /// A forwarded pedal was not registered by the source: apply the gain locally
    pub fn pedal_forward_failed(&mut self, id: PlayerId, now: Instant) -> Vec<GameEvent> {
        let energy = self.players[id.index()].energy + self.config.energy_gain_rate;
        self.apply_pedal_ack(id, energy, now)
    }

    pub fn stop_pedaling(&mut self, id: PlayerId) -> Vec<GameEvent> {
        let player = &mut self.players[id.index()];
        if !player.is_pedaling {
            return Vec::new();
        }
        player.is_pedaling = false;
        player.pedaling_from_input = false;
        vec![GameEvent::EnergyChanged {
            player: id,
            energy: player.energy,
            is_pedaling: false,
        }]
    }

    fn forwards_pedals(&self) -> bool {
        self.options.remote_pedal && !self.connectivity.is_offline()
    }

    // ------------------------------------------------------------------
    // Remote reconciliation
    // ------------------------------------------------------------------

    /// The source answered, but its snapshot predates the current match
    pub fn stale_poll_succeeded(&mut self, now: Instant) -> Vec<GameEvent> {
        self.connectivity.record_success(now)
    }

    /// Successful fetch of the source's state
    pub fn poll_succeeded(&mut self, snapshot: &RemoteSnapshot, now: Instant) -> Vec<GameEvent> {
        let mut events = self.connectivity.record_success(now);
        events.extend(self.apply_remote(snapshot, now));
        events
    }

    /// Failed fetch. Player state is untouched.
    pub fn poll_failed(&mut self, kind: FailureKind, now: Instant) -> Vec<GameEvent> {
        self.connectivity.record_failure(kind, now)
    }

    /// Merge a remote snapshot into player state.
    ///
    /// Compare-and-skip per player, so applying the same snapshot twice is a
    /// no-op the second time. The win detector runs once for the batch.
    pub fn apply_remote(&mut self, snapshot: &RemoteSnapshot, now: Instant) -> Vec<GameEvent> {
        let mut events = Vec::new();

        if self.phase == MatchPhase::Waiting {
            if !(snapshot.game_active && self.options.remote_auto_start) {
                return events;
            }
            info!("Energy source reports an active game, starting match");
            events.extend(self.start(StartTrigger::RemoteActivity, now));
        }
        if self.phase != MatchPhase::Playing {
            return events;
        }

        for id in PlayerId::ALL {
            let player = &mut self.players[id.index()];

            if let Some(count) = snapshot.pedal_count(id) {
                player.remote_pedal_count = count;
            }

            let Some(remote) = snapshot.energy(id) else {
                continue;
            };
            let remote = clamp_energy(remote);
            if remote == player.energy {
                continue;
            }

            player.energy = remote;
            if let Some(flag) = snapshot.is_pedaling(id) {
                player.is_pedaling = flag;
                player.pedaling_from_input = false;
            }
            events.push(GameEvent::EnergyChanged {
                player: id,
                energy: remote,
                is_pedaling: player.is_pedaling,
            });
        }

        if let Some(report) = self.report.as_mut() {
            report.observe(&self.players);
        }
        events.extend(self.evaluate_win(now));
        events
    }

    // ------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------

    pub fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }

    pub fn probe_due(&self, now: Instant) -> bool {
        self.connectivity.probe_due(now)
    }

    pub fn begin_probe(&mut self) {
        self.connectivity.begin_probe();
    }

    pub fn retry_connection(&mut self, now: Instant) -> bool {
        self.connectivity.request_retry(now)
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool, now: Instant) -> Vec<GameEvent> {
        self.connectivity.set_auto_reconnect(enabled, now)
    }

    // ------------------------------------------------------------------
    // Tuning
    // ------------------------------------------------------------------

    /// Adopt new tuning from the next tick on. Current energy is untouched.
    pub fn apply_config(&mut self, config: GameConfig) -> Vec<GameEvent> {
        let config = config.clamped();
        if config == self.config {
            return Vec::new();
        }
        self.config = config;
        info!(?config, "Game config applied");
        vec![GameEvent::ConfigChanged { config }]
    }

    /// Read-only view for UI collaborators
    pub fn snapshot(&self) -> SessionSnapshot {
        let conn = self.connectivity.state();
        SessionSnapshot {
            phase: self.phase,
            winner: self.winner,
            players: self
                .players
                .iter()
                .map(|p| PlayerSnapshot {
                    id: p.id,
                    energy: p.energy,
                    score: p.score,
                    is_pedaling: p.is_pedaling,
                    pedals: p.total_pedals(),
                })
                .collect(),
            offline: conn.is_offline,
            auto_reconnect: conn.auto_reconnect_enabled,
            consecutive_failures: conn.consecutive_failures,
            config: self.config,
            server_time: unix_millis(),
        }
    }
}
