//! Energy source connectivity tracking
//!
//! Online → Offline on the first request that never got an answer.
//! Offline → Online after one successful fetch. While offline the regular
//! poll is suspended and a reconnection probe is scheduled instead; after
//! too many consecutive failures the automatic probes stop until a manual
//! retry (or re-enabling) happens.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::ws::protocol::GameEvent;

/// How a failed request is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Request never completed (refused, reset, timed out)
    Connectivity,
    /// Reachable server answered with an error status or a bad body
    Application,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub probe_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectivityState {
    pub is_offline: bool,
    pub consecutive_failures: u32,
    pub auto_reconnect_enabled: bool,
    /// Deadline of the next reconnection probe; one at most
    pub next_probe_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    /// Auto-reconnect switched itself off after too many failures
    gave_up: bool,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            is_offline: false,
            consecutive_failures: 0,
            auto_reconnect_enabled: true,
            next_probe_at: None,
            last_success_at: None,
            gave_up: false,
        }
    }
}

pub struct ConnectivityManager {
    state: ConnectivityState,
    policy: ReconnectPolicy,
}

impl ConnectivityManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectivityState::default(),
            policy,
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn is_offline(&self) -> bool {
        self.state.is_offline
    }

    /// Any successful fetch: reset the counter, come back online
    pub fn record_success(&mut self, now: Instant) -> Vec<GameEvent> {
        let mut events = Vec::new();
        self.state.consecutive_failures = 0;
        self.state.last_success_at = Some(now);
        self.state.next_probe_at = None;

        if self.state.is_offline {
            self.state.is_offline = false;
            info!("Energy source reachable again, back online");
            events.push(GameEvent::ConnectivityChanged { offline: false });
        }

        if self.state.gave_up {
            self.state.gave_up = false;
            self.state.auto_reconnect_enabled = true;
            events.push(GameEvent::AutoReconnectChanged { enabled: true });
        }

        events
    }

    pub fn record_failure(&mut self, kind: FailureKind, now: Instant) -> Vec<GameEvent> {
        if kind == FailureKind::Application {
            debug!("Energy source answered with an error, connectivity unchanged");
            // Not counted, but an offline host keeps probing
            if self.state.is_offline
                && self.state.auto_reconnect_enabled
                && self.state.next_probe_at.is_none()
            {
                self.state.next_probe_at = Some(now + self.policy.probe_interval);
            }
            return Vec::new();
        }

        let mut events = Vec::new();
        self.state.consecutive_failures += 1;

        if !self.state.is_offline {
            self.state.is_offline = true;
            warn!("Energy source unreachable, switching to offline mode");
            events.push(GameEvent::ConnectivityChanged { offline: true });
        }

        if !self.state.auto_reconnect_enabled {
            self.state.next_probe_at = None;
        } else if self.state.consecutive_failures >= self.policy.max_attempts {
            self.state.auto_reconnect_enabled = false;
            self.state.gave_up = true;
            self.state.next_probe_at = None;
            warn!(
                failures = self.state.consecutive_failures,
                "Auto-reconnect disabled, manual retry required"
            );
            events.push(GameEvent::AutoReconnectChanged { enabled: false });
        } else {
            self.state.next_probe_at = Some(now + self.policy.probe_interval);
            debug!(
                failures = self.state.consecutive_failures,
                retry_in_secs = self.policy.probe_interval.as_secs(),
                "Reconnection probe scheduled"
            );
        }

        events
    }

    /// Offline with an elapsed probe deadline
    pub fn probe_due(&self, now: Instant) -> bool {
        self.state.is_offline && self.state.next_probe_at.is_some_and(|at| at <= now)
    }

    /// A probe is going out; clear the deadline until its result arrives
    pub fn begin_probe(&mut self) {
        self.state.next_probe_at = None;
    }

    /// Manual retry: probe immediately. No-op while online.
    pub fn request_retry(&mut self, now: Instant) -> bool {
        if !self.state.is_offline {
            return false;
        }
        self.state.next_probe_at = Some(now);
        info!("Manual reconnection requested");
        true
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool, now: Instant) -> Vec<GameEvent> {
        if enabled == self.state.auto_reconnect_enabled {
            return Vec::new();
        }

        self.state.auto_reconnect_enabled = enabled;
        self.state.gave_up = false;
        if enabled {
            self.state.consecutive_failures = 0;
            if self.state.is_offline {
                self.state.next_probe_at = Some(now);
            }
        } else {
            self.state.next_probe_at = None;
        }

        info!(enabled, "Auto-reconnect toggled");
        vec![GameEvent::AutoReconnectChanged { enabled }]
    }
}

impl Default for ConnectivityManager {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_failures_do_not_go_offline() {
        let mut conn = ConnectivityManager::default();
        let now = Instant::now();
        assert!(conn.record_failure(FailureKind::Application, now).is_empty());
        assert!(!conn.is_offline());
        assert_eq!(conn.state().consecutive_failures, 0);
    }

    #[test]
    fn first_connectivity_failure_goes_offline_and_schedules_probe() {
        let mut conn = ConnectivityManager::default();
        let now = Instant::now();

        let events = conn.record_failure(FailureKind::Connectivity, now);
        assert_eq!(events, vec![GameEvent::ConnectivityChanged { offline: true }]);
        assert!(conn.is_offline());
        assert_eq!(conn.state().consecutive_failures, 1);

        assert!(!conn.probe_due(now + Duration::from_secs(9)));
        assert!(conn.probe_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn gives_up_after_max_attempts_and_manual_retry_recovers() {
        let mut conn = ConnectivityManager::default();
        let mut now = Instant::now();

        for _ in 0..4 {
            conn.record_failure(FailureKind::Connectivity, now);
            assert!(conn.state().auto_reconnect_enabled);
            now += Duration::from_secs(10);
            assert!(conn.probe_due(now));
            conn.begin_probe();
        }

        let events = conn.record_failure(FailureKind::Connectivity, now);
        assert_eq!(events, vec![GameEvent::AutoReconnectChanged { enabled: false }]);
        assert_eq!(conn.state().consecutive_failures, 5);
        assert!(!conn.state().auto_reconnect_enabled);
        assert!(!conn.probe_due(now + Duration::from_secs(3600)));

        assert!(conn.request_retry(now));
        assert!(conn.probe_due(now));
        conn.begin_probe();

        let events = conn.record_success(now);
        assert!(events.contains(&GameEvent::ConnectivityChanged { offline: false }));
        assert!(events.contains(&GameEvent::AutoReconnectChanged { enabled: true }));
        assert!(!conn.is_offline());
        assert_eq!(conn.state().consecutive_failures, 0);
        assert!(conn.state().auto_reconnect_enabled);
    }

    #[test]
    fn application_failure_while_offline_keeps_probing() {
        let mut conn = ConnectivityManager::default();
        let now = Instant::now();
        conn.record_failure(FailureKind::Connectivity, now);

        let probe_at = now + Duration::from_secs(10);
        assert!(conn.probe_due(probe_at));
        conn.begin_probe();

        assert!(conn.record_failure(FailureKind::Application, probe_at).is_empty());
        assert!(conn.is_offline());
        assert_eq!(conn.state().consecutive_failures, 1);
        assert!(!conn.probe_due(probe_at + Duration::from_secs(9)));
        assert!(conn.probe_due(probe_at + Duration::from_secs(10)));
    }

    #[test]
    fn success_while_online_only_resets_counter() {
        let mut conn = ConnectivityManager::default();
        let now = Instant::now();
        conn.record_failure(FailureKind::Application, now);
        assert!(conn.record_success(now).is_empty());
        assert_eq!(conn.state().last_success_at, Some(now));
    }

    #[test]
    fn retry_while_online_is_ignored() {
        let mut conn = ConnectivityManager::default();
        assert!(!conn.request_retry(Instant::now()));
    }

    #[test]
    fn disabling_auto_reconnect_cancels_pending_probe() {
        let mut conn = ConnectivityManager::default();
        let now = Instant::now();
        conn.record_failure(FailureKind::Connectivity, now);

        let events = conn.set_auto_reconnect(false, now);
        assert_eq!(events, vec![GameEvent::AutoReconnectChanged { enabled: false }]);
        assert!(!conn.probe_due(now + Duration::from_secs(60)));

        // Failures while disabled never schedule probes
        conn.record_failure(FailureKind::Connectivity, now);
        assert!(conn.state().next_probe_at.is_none());

        let events = conn.set_auto_reconnect(true, now);
        assert_eq!(events, vec![GameEvent::AutoReconnectChanged { enabled: true }]);
        assert_eq!(conn.state().consecutive_failures, 0);
        assert!(conn.probe_due(now));
    }
}
