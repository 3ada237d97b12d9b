//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Host start time for uptime tracking
static HOST_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize host start time (call once at startup)
pub fn init_host_time() {
    HOST_START.get_or_init(Instant::now);
}

/// Get host uptime in seconds
pub fn uptime_secs() -> u64 {
    HOST_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Local simulation rate
pub const SIMULATION_TPS: u32 = 60;
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Fraction of a second covered by one simulation tick
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Duration of one simulation tick
pub fn tick_duration() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_ticks_cover_one_second() {
        let total: f32 = (0..SIMULATION_TPS).map(|_| tick_delta()).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(tick_duration(), Duration::from_micros(16_666));
    }

    #[test]
    fn uptime_is_small_right_after_init() {
        init_host_time();
        assert!(uptime_secs() < 5);
    }
}
