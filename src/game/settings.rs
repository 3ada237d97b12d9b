//! Game tuning and its persistence
//!
//! `GameConfig` carries the physics knobs exposed in the settings menu.
//! `ConfigStore` loads it (energy source → local storage → defaults) and
//! persists changes (energy source, with local storage as the fallback).
//! Out-of-range input is clamped, never rejected.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::local::{load_json, save_json, SharedStore};
use crate::store::source::EnergySourceClient;
use crate::util::time::unix_millis;

/// Local storage key for the last applied tuning
pub const CONFIG_STORAGE_KEY: &str = "bikejj_config";

pub const GAIN_RANGE: RangeInclusive<f32> = 0.1..=15.0;
pub const DECAY_RANGE: RangeInclusive<f32> = 0.0..=20.0;
pub const STROBE_RANGE: RangeInclusive<u32> = 50..=2000;

/// Tunable physics parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Energy added per accepted pedal
    pub energy_gain_rate: f32,
    /// Energy lost per second while not pedalling
    pub energy_decay_rate: f32,
    /// Winner LED strobe period in milliseconds (cosmetic)
    pub led_strobe_rate: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            energy_gain_rate: 5.0,
            energy_decay_rate: 15.0,
            led_strobe_rate: 200,
        }
    }
}

impl GameConfig {
    /// Pull every field into its declared range. NaN takes the default.
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            energy_gain_rate: clamp_rate(self.energy_gain_rate, &GAIN_RANGE, defaults.energy_gain_rate),
            energy_decay_rate: clamp_rate(
                self.energy_decay_rate,
                &DECAY_RANGE,
                defaults.energy_decay_rate,
            ),
            led_strobe_rate: self
                .led_strobe_rate
                .clamp(*STROBE_RANGE.start(), *STROBE_RANGE.end()),
        }
    }

    pub fn is_within_ranges(&self) -> bool {
        GAIN_RANGE.contains(&self.energy_gain_rate)
            && DECAY_RANGE.contains(&self.energy_decay_rate)
            && STROBE_RANGE.contains(&self.led_strobe_rate)
    }
}

fn clamp_rate(value: f32, range: &RangeInclusive<f32>, default: f32) -> f32 {
    if value.is_nan() {
        return default;
    }
    value.clamp(*range.start(), *range.end())
}

/// Local storage form, stamped with when it was saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(flatten)]
    pub config: GameConfig,
    pub saved_at: u64,
}

/// Where a persisted config ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persisted {
    /// Stored on the energy source (and cached locally)
    Remote,
    /// Energy source refused or unreachable; local storage only
    LocalOnly,
    /// Neither store accepted it; the value lives in memory only
    Nowhere,
}

/// Loads and persists `GameConfig`
#[derive(Clone)]
pub struct ConfigStore {
    source: EnergySourceClient,
    storage: SharedStore,
}

impl ConfigStore {
    pub fn new(source: EnergySourceClient, storage: SharedStore) -> Self {
        Self { source, storage }
    }

    /// Energy source first, then local storage, then defaults. Never fails.
    pub async fn load(&self) -> GameConfig {
        match self.source.fetch_config().await {
            Ok(config) => {
                let config = config.clamped();
                info!(?config, "Loaded game config from energy source");
                return config;
            }
            Err(e) => {
                warn!(error = %e, "Energy source config unavailable, trying local storage");
            }
        }

        if let Some(config) = self.load_local() {
            info!(?config, "Loaded game config from local storage");
            return config;
        }

        info!("Using default game config");
        GameConfig::default()
    }

    /// Last locally stored config, if any and readable
    pub fn load_local(&self) -> Option<GameConfig> {
        match load_json::<StoredConfig>(self.storage.as_ref(), CONFIG_STORAGE_KEY) {
            Ok(Some(stored)) => Some(stored.config.clamped()),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Stored game config unreadable, ignoring it");
                None
            }
        }
    }

    /// Clamp and persist a candidate config; returns what was applied
    pub async fn apply(&self, candidate: GameConfig) -> (GameConfig, Persisted) {
        let config = candidate.clamped();
        if config != candidate {
            debug!(?candidate, ?config, "Clamped game config into range");
        }
        let persisted = self.persist(&config).await;
        (config, persisted)
    }

    /// Restore and persist the defaults
    pub async fn reset(&self) -> (GameConfig, Persisted) {
        let config = GameConfig::default();
        let persisted = self.persist(&config).await;
        (config, persisted)
    }

    async fn persist(&self, config: &GameConfig) -> Persisted {
        let remote = self.source.save_config(config).await;
        let local = save_json(
            self.storage.as_ref(),
            CONFIG_STORAGE_KEY,
            &StoredConfig {
                config: *config,
                saved_at: unix_millis(),
            },
        );

        match (remote, local) {
            (Ok(()), Ok(())) => Persisted::Remote,
            (Ok(()), Err(e)) => {
                debug!(error = %e, "Local config cache not written");
                Persisted::Remote
            }
            (Err(e), Ok(())) => {
                warn!(error = %e, "Energy source did not take the config, kept locally");
                Persisted::LocalOnly
            }
            (Err(remote_err), Err(local_err)) => {
                warn!(
                    remote_error = %remote_err,
                    local_error = %local_err,
                    "Game config could not be persisted anywhere"
                );
                Persisted::Nowhere
            }
        }
    }
}
