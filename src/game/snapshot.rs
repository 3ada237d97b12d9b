//! Snapshot pacing for connected UIs

use crate::util::time::SIMULATION_TPS;
use crate::ws::protocol::SessionSnapshot;

use super::session::GameSession;

/// Full snapshots pushed to sockets per second
pub const SNAPSHOT_TPS: u32 = 20;

/// Decides on which ticks a full snapshot goes out.
///
/// Decay is never sent as individual events, so this is how clients see
/// energy drain between pedals.
pub struct SnapshotBuilder {
    /// Ticks since the last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Send on the next check (phase changes, connectivity flips)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn build(&self, session: &GameSession) -> SessionSnapshot {
        session.snapshot()
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(SIMULATION_TPS / SNAPSHOT_TPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_every_interval() {
        let mut builder = SnapshotBuilder::default();
        let sent = (0..SIMULATION_TPS).filter(|_| builder.should_send()).count();
        assert_eq!(sent as u32, SNAPSHOT_TPS);
    }

    #[test]
    fn force_next_sends_immediately() {
        let mut builder = SnapshotBuilder::new(3);
        assert!(!builder.should_send());
        builder.force_next();
        assert!(builder.should_send());
        assert!(!builder.should_send());
    }
}
