//! Session task: the single owner of `GameSession`
//!
//! One `tokio::select!` loop interleaves the simulation tick, the remote
//! poll, results of spawned energy-source requests and commands from the
//! HTTP/WebSocket handlers. Each branch runs to completion before the next,
//! so every batch is atomic with respect to the win detector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::game::player::PlayerId;
use crate::game::settings::GameConfig;
use crate::store::reports::ReportLog;
use crate::store::source::{EnergySourceClient, RemoteSnapshot, SourceError};
use crate::util::time::tick_duration;
use crate::ws::protocol::{GameEvent, ServerMsg, SessionSnapshot, StartTrigger};

use super::session::{GameSession, PedalResult};
use super::snapshot::SnapshotBuilder;

/// Control commands accepted by the session task
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start,
    Reset,
    NewGame,
    Pedal(PlayerId),
    StopPedaling(PlayerId),
    RetryConnection,
    SetAutoReconnect(bool),
    ApplyConfig(GameConfig),
}

struct Envelope {
    command: SessionCommand,
    reply: Option<oneshot::Sender<SessionSnapshot>>,
}

/// Outcome of a spawned energy-source request
enum SourceResult {
    Poll {
        seq: u64,
        result: Result<RemoteSnapshot, SourceError>,
    },
    PedalAck {
        player: PlayerId,
        result: Result<f32, SourceError>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("game session is not running")]
pub struct SessionClosed;

/// Handle to the running session
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Envelope>,
    events_tx: broadcast::Sender<ServerMsg>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
}

impl SessionHandle {
    /// Queue a command without waiting for it
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.cmd_tx
            .send(Envelope {
                command,
                reply: None,
            })
            .await
            .map_err(|_| SessionClosed)
    }

    /// Run a command and return the state right after it
    pub async fn request(&self, command: SessionCommand) -> Result<SessionSnapshot, SessionClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Envelope {
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| SessionClosed)?;
        reply_rx.await.map_err(|_| SessionClosed)
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }
}

pub struct SessionRunner {
    session: GameSession,
    source: EnergySourceClient,
    reports: ReportLog,
    cmd_rx: mpsc::Receiver<Envelope>,
    events_tx: broadcast::Sender<ServerMsg>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    snapshot_builder: SnapshotBuilder,
    results_tx: mpsc::Sender<SourceResult>,
    results_rx: mpsc::Receiver<SourceResult>,
    poll_interval: Duration,
    /// Sequence number of the newest poll; older results are stale
    poll_seq: u64,
    poll_in_flight: bool,
}

impl SessionRunner {
    pub fn new(
        session: GameSession,
        source: EnergySourceClient,
        reports: ReportLog,
        poll_interval: Duration,
    ) -> (Self, SessionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let (results_tx, results_rx) = mpsc::channel(64);
        let snapshot = Arc::new(RwLock::new(session.snapshot()));

        let handle = SessionHandle {
            cmd_tx,
            events_tx: events_tx.clone(),
            snapshot: snapshot.clone(),
        };

        let runner = Self {
            session,
            source,
            reports,
            cmd_rx,
            events_tx,
            snapshot,
            snapshot_builder: SnapshotBuilder::default(),
            results_tx,
            results_rx,
            poll_interval,
            poll_seq: 0,
            poll_in_flight: false,
        };

        (runner, handle)
    }

    /// Drive the session until every handle is dropped
    pub async fn run(mut self) {
        info!(
            source = self.source.base_url(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Game session running"
        );

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll_interval = interval(self.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => self.on_tick(Instant::now()),
                _ = poll_interval.tick() => {
                    if !self.session.is_offline() && !self.poll_in_flight {
                        self.spawn_poll();
                    }
                }
                Some(result) = self.results_rx.recv() => self.on_source_result(result),
                envelope = self.cmd_rx.recv() => match envelope {
                    Some(envelope) => self.on_command(envelope),
                    None => break,
                },
            }
        }

        info!("Game session stopped");
    }

    fn on_tick(&mut self, now: Instant) {
        let events = self.session.tick(now);
        self.publish(events);

        if self.session.probe_due(now) && !self.poll_in_flight {
            debug!("Probing energy source");
            self.session.begin_probe();
            self.spawn_poll();
        }

        if self.snapshot_builder.should_send() {
            let snapshot = self.snapshot_builder.build(&self.session);
            *self.snapshot.write() = snapshot.clone();
            let _ = self.events_tx.send(ServerMsg::Snapshot(snapshot));
        }
    }

    fn on_command(&mut self, envelope: Envelope) {
        let now = Instant::now();
        let events = match envelope.command {
            SessionCommand::Start => self.session.start(StartTrigger::Command, now),
            SessionCommand::Reset => self.session.reset(),
            SessionCommand::NewGame => self.session.new_game(StartTrigger::Command, now),
            SessionCommand::Pedal(player) => match self.session.pedal(player, now) {
                PedalResult::Applied(events) => events,
                PedalResult::Forward => {
                    self.spawn_pedal(player);
                    Vec::new()
                }
                PedalResult::Debounced | PedalResult::Ignored => {
                    trace!(player = %player, "Pedal dropped");
                    Vec::new()
                }
            },
            SessionCommand::StopPedaling(player) => self.session.stop_pedaling(player),
            SessionCommand::RetryConnection => {
                if !self.session.retry_connection(now) {
                    debug!("Retry requested while online, ignoring");
                }
                Vec::new()
            }
            SessionCommand::SetAutoReconnect(enabled) => {
                self.session.set_auto_reconnect(enabled, now)
            }
            SessionCommand::ApplyConfig(config) => self.session.apply_config(config),
        };
        self.publish(events);

        let snapshot = self.session.snapshot();
        *self.snapshot.write() = snapshot.clone();
        if let Some(reply) = envelope.reply {
            let _ = reply.send(snapshot);
        }
    }

    fn on_source_result(&mut self, result: SourceResult) {
        let now = Instant::now();
        let events = match result {
            SourceResult::Poll { seq, result } => {
                self.poll_in_flight = false;
                let stale = seq != self.poll_seq;
                match result {
                    // Still proves the source is reachable
                    Ok(_) if stale => {
                        debug!(seq, current = self.poll_seq, "Discarding stale poll snapshot");
                        self.session.stale_poll_succeeded(now)
                    }
                    Ok(remote) => self.session.poll_succeeded(&remote, now),
                    Err(e) => {
                        debug!(error = %e, "State poll failed");
                        self.session.poll_failed(e.classify(), now)
                    }
                }
            }
            SourceResult::PedalAck { player, result } => match result {
                Ok(energy) => self.session.apply_pedal_ack(player, energy, now),
                Err(e) => {
                    warn!(player = %player, error = %e, "Pedal not registered remotely, applying locally");
                    self.session.pedal_forward_failed(player, now)
                }
            },
        };
        self.publish(events);
    }

    /// Broadcast events and run their side effects
    fn publish(&mut self, events: Vec<GameEvent>) {
        if events.is_empty() {
            return;
        }

        for event in events {
            match &event {
                GameEvent::MatchStarted { trigger } => {
                    // Bump so polls issued before the transition are discarded
                    self.poll_seq += 1;
                    self.snapshot_builder.force_next();
                    if *trigger != StartTrigger::RemoteActivity {
                        self.spawn_notify_start();
                    }
                }
                GameEvent::MatchReset => {
                    self.poll_seq += 1;
                    self.snapshot_builder.force_next();
                    self.spawn_notify_reset();
                }
                GameEvent::ReportFinalized { report } => {
                    match self.reports.append(report.clone()) {
                        Ok(()) => info!(report_id = %report.id, "Match report saved"),
                        Err(e) => warn!(error = %e, "Match report kept in memory only"),
                    }
                }
                GameEvent::WinnerDeclared { .. }
                | GameEvent::ConnectivityChanged { .. }
                | GameEvent::AutoReconnectChanged { .. }
                | GameEvent::ConfigChanged { .. } => self.snapshot_builder.force_next(),
                GameEvent::EnergyChanged { .. } => {}
            }
            let _ = self.events_tx.send(ServerMsg::Event(event));
        }

        *self.snapshot.write() = self.session.snapshot();
    }

    fn spawn_poll(&mut self) {
        self.poll_seq += 1;
        self.poll_in_flight = true;
        let seq = self.poll_seq;
        let source = self.source.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_state().await;
            let _ = results.send(SourceResult::Poll { seq, result }).await;
        });
    }

    fn spawn_pedal(&self, player: PlayerId) {
        let source = self.source.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = source.register_pedal(player).await;
            let _ = results.send(SourceResult::PedalAck { player, result }).await;
        });
    }

    fn spawn_notify_start(&self) {
        let source = self.source.clone();
        tokio::spawn(async move {
            if let Err(e) = source.notify_start().await {
                warn!(error = %e, "Start notification failed");
            }
        });
    }

    fn spawn_notify_reset(&self) {
        let source = self.source.clone();
        tokio::spawn(async move {
            if let Err(e) = source.notify_reset().await {
                warn!(error = %e, "Reset notification failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{routing::get, Json, Router};
    use tokio::net::TcpListener;

    use crate::game::session::{MatchPhase, SessionOptions};
    use crate::store::local::MemoryStore;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn spawn_runner(base_url: &str, config: GameConfig, options: SessionOptions) -> (SessionHandle, ReportLog) {
        let source = EnergySourceClient::new(base_url, Duration::from_millis(300)).unwrap();
        let reports = ReportLog::load(Arc::new(MemoryStore::new()));
        let (runner, handle) = SessionRunner::new(
            GameSession::new(config, options),
            source,
            reports.clone(),
            Duration::from_millis(20),
        );
        tokio::spawn(runner.run());
        (handle, reports)
    }

    /// Poll the shared snapshot until it satisfies the predicate
    async fn wait_for(handle: &SessionHandle, what: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = handle.snapshot();
                if what(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    #[tokio::test]
    async fn active_source_auto_starts_and_reconciles() {
        let router = Router::new().route(
            "/api/state",
            get(|| async {
                Json(serde_json::json!({
                    "player2_energy": 40.0,
                    "is_pedaling": [false, true, false, false],
                    "pedal_count": [0, 8, 0, 0],
                    "game_active": true
                }))
            }),
        );
        let base = serve(router).await;
        let (handle, _) = spawn_runner(&base, GameConfig::default(), SessionOptions::default());

        let snapshot = wait_for(&handle, |s| s.phase == MatchPhase::Playing && s.players[1].energy == 40.0).await;
        assert!(!snapshot.offline);
        assert_eq!(snapshot.players[1].pedals, 8);
    }

    #[tokio::test]
    async fn start_command_notifies_source() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let router = Router::new()
            .route("/api/state", get(|| async { Json(serde_json::json!({})) }))
            .route(
                "/api/start-game",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            );
        let base = serve(router).await;
        let (handle, _) = spawn_runner(&base, GameConfig::default(), SessionOptions::default());

        let snapshot = handle.request(SessionCommand::Start).await.unwrap();
        assert_eq!(snapshot.phase, MatchPhase::Playing);

        // A second start is a no-op and sends nothing
        handle.request(SessionCommand::Start).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while starts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_source_goes_offline_and_plays_locally() {
        let base = unreachable_url().await;
        let config = GameConfig {
            energy_gain_rate: 15.0,
            energy_decay_rate: 0.0,
            ..GameConfig::default()
        };
        let options = SessionOptions {
            debounce: Duration::ZERO,
            auto_restart_delay: None,
            ..SessionOptions::default()
        };
        let (handle, reports) = spawn_runner(&base, config, options);
        let mut events = handle.subscribe();

        wait_for(&handle, |s| s.offline).await;

        handle.request(SessionCommand::Start).await.unwrap();
        let mut snapshot = handle.snapshot();
        for _ in 0..7 {
            snapshot = handle.request(SessionCommand::Pedal(PlayerId::ALL[3])).await.unwrap();
        }
        assert_eq!(snapshot.phase, MatchPhase::Finished);
        assert_eq!(snapshot.winner, Some(PlayerId::ALL[3]));
        assert_eq!(reports.len(), 1);

        let mut saw_winner = false;
        while let Ok(msg) = events.try_recv() {
            if let ServerMsg::Event(GameEvent::WinnerDeclared { player, .. }) = msg {
                assert_eq!(player, PlayerId::ALL[3]);
                saw_winner = true;
            }
        }
        assert!(saw_winner);
    }

    #[tokio::test]
    async fn poll_issued_before_start_is_discarded() {
        let base = unreachable_url().await;
        let source = EnergySourceClient::new(&base, Duration::from_millis(100)).unwrap();
        let reports = ReportLog::load(Arc::new(MemoryStore::new()));
        let (mut runner, _handle) = SessionRunner::new(
            GameSession::new(GameConfig::default(), SessionOptions::default()),
            source,
            reports,
            Duration::from_millis(20),
        );

        let stale_seq = runner.poll_seq;
        runner.poll_in_flight = true;
        runner.on_command(Envelope {
            command: SessionCommand::Start,
            reply: None,
        });
        assert_eq!(runner.session.phase(), MatchPhase::Playing);

        let remote = RemoteSnapshot {
            player1_energy: Some(70.0),
            ..RemoteSnapshot::default()
        };
        runner.on_source_result(SourceResult::Poll {
            seq: stale_seq,
            result: Ok(remote.clone()),
        });
        assert!(!runner.poll_in_flight);
        assert_eq!(runner.session.player(PlayerId::ALL[0]).energy, 0.0);

        runner.on_source_result(SourceResult::Poll {
            seq: runner.poll_seq,
            result: Ok(remote),
        });
        assert_eq!(runner.session.player(PlayerId::ALL[0]).energy, 70.0);
    }

    fn offline_runner(source: EnergySourceClient) -> SessionRunner {
        let reports = ReportLog::load(Arc::new(MemoryStore::new()));
        let (runner, _handle) = SessionRunner::new(
            GameSession::new(GameConfig::default(), SessionOptions::default()),
            source,
            reports,
            Duration::from_millis(20),
        );
        runner
    }

    /// Mirror `on_tick` sending a reconnection probe, without spawning it
    fn issue_probe(runner: &mut SessionRunner) -> u64 {
        runner.session.begin_probe();
        runner.poll_seq += 1;
        runner.poll_in_flight = true;
        runner.poll_seq
    }

    #[tokio::test]
    async fn failed_probe_overtaken_by_start_schedules_next_probe() {
        let base = unreachable_url().await;
        let source = EnergySourceClient::new(&base, Duration::from_millis(100)).unwrap();
        let mut runner = offline_runner(source.clone());

        let seq = runner.poll_seq;
        let result = Err(source.fetch_state().await.unwrap_err());
        runner.on_source_result(SourceResult::Poll { seq, result });
        assert!(runner.session.is_offline());

        let probe_seq = issue_probe(&mut runner);
        runner.on_command(Envelope {
            command: SessionCommand::Start,
            reply: None,
        });
        assert_ne!(probe_seq, runner.poll_seq);

        let result = Err(source.fetch_state().await.unwrap_err());
        runner.on_source_result(SourceResult::Poll { seq: probe_seq, result });

        let state = runner.session.connectivity().state();
        assert!(state.is_offline);
        assert_eq!(state.consecutive_failures, 2);
        assert!(runner.session.probe_due(Instant::now() + Duration::from_secs(11)));
    }

    #[tokio::test]
    async fn successful_probe_overtaken_by_start_restores_online() {
        let base = unreachable_url().await;
        let source = EnergySourceClient::new(&base, Duration::from_millis(100)).unwrap();
        let mut runner = offline_runner(source.clone());

        let seq = runner.poll_seq;
        let result = Err(source.fetch_state().await.unwrap_err());
        runner.on_source_result(SourceResult::Poll { seq, result });
        assert!(runner.session.is_offline());

        let probe_seq = issue_probe(&mut runner);
        runner.on_command(Envelope {
            command: SessionCommand::Start,
            reply: None,
        });

        let remote = RemoteSnapshot {
            player1_energy: Some(80.0),
            ..RemoteSnapshot::default()
        };
        runner.on_source_result(SourceResult::Poll {
            seq: probe_seq,
            result: Ok(remote),
        });

        assert!(!runner.session.is_offline());
        assert_eq!(runner.session.connectivity().state().consecutive_failures, 0);
        // The snapshot itself predates the match
        assert_eq!(runner.session.player(PlayerId::ALL[0]).energy, 0.0);
    }

    #[tokio::test]
    async fn commands_fail_cleanly_once_runner_is_gone() {
        let base = unreachable_url().await;
        let source = EnergySourceClient::new(&base, Duration::from_millis(100)).unwrap();
        let reports = ReportLog::load(Arc::new(MemoryStore::new()));
        let (runner, handle) = SessionRunner::new(
            GameSession::new(GameConfig::default(), SessionOptions::default()),
            source,
            reports,
            Duration::from_millis(20),
        );
        drop(runner);

        assert!(handle.request(SessionCommand::Start).await.is_err());
        tokio_test::assert_err!(handle.send(SessionCommand::Reset).await);
    }
}
