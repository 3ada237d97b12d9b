//! HTTP client for the external energy source (sensor bridge server)

use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::game::connectivity::FailureKind;
use crate::game::player::PlayerId;
use crate::game::settings::GameConfig;

/// Client for the energy source's REST API
#[derive(Clone)]
pub struct EnergySourceClient {
    client: Client,
    base_url: String,
}

impl EnergySourceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Request)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the API URL for a path
    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// GET and decode a JSON body
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let response = self
            .client
            .get(self.api_url(path))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(SourceError::Request)?;

        let response = check_status(response).await?;
        response.json().await.map_err(SourceError::Parse)
    }

    /// POST a JSON body and return the successful response
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, SourceError> {
        let response = self
            .client
            .post(self.api_url(path))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(SourceError::Request)?;

        check_status(response).await
    }

    /// Fetch the authoritative energy snapshot
    pub async fn fetch_state(&self) -> Result<RemoteSnapshot, SourceError> {
        self.get_json("state").await
    }

    /// Tell the source a match has begun (body ignored)
    pub async fn notify_start(&self) -> Result<(), SourceError> {
        self.get_ignoring_body("start-game").await
    }

    /// Tell the source the game was reset (body ignored)
    pub async fn notify_reset(&self) -> Result<(), SourceError> {
        self.get_ignoring_body("reset-game").await
    }

    async fn get_ignoring_body(&self, path: &str) -> Result<(), SourceError> {
        let response = self
            .client
            .get(self.api_url(path))
            .send()
            .await
            .map_err(SourceError::Request)?;
        check_status(response).await.map(drop)
    }

    /// Register a pedal on the source; returns the player's new energy
    pub async fn register_pedal(&self, player: PlayerId) -> Result<f32, SourceError> {
        let response = self.post("pedal", &PedalRequest { player }).await?;
        let ack: PedalAck = response.json().await.map_err(SourceError::Parse)?;
        Ok(ack.energy)
    }

    /// Fetch the tuning stored on the source
    pub async fn fetch_config(&self) -> Result<GameConfig, SourceError> {
        self.get_json("config").await
    }

    /// Store tuning on the source
    pub async fn save_config(&self, config: &GameConfig) -> Result<(), SourceError> {
        self.post("config/save", config).await.map(drop)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Api { status: status.as_u16(), body });
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct PedalRequest {
    player: PlayerId,
}

#[derive(Debug, Deserialize)]
struct PedalAck {
    energy: f32,
}

/// `is_pedaling` arrives either per player or as one flag for the single-bike rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PedalingFlags {
    PerPlayer(Vec<bool>),
    Single(bool),
}

/// `pedal_count` has the same two shapes as `is_pedaling`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PedalCounts {
    PerPlayer(Vec<u32>),
    Single(u32),
}

/// `GET /api/state` body. Missing fields mean the source does not drive that value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub player1_energy: Option<f32>,
    #[serde(default)]
    pub player2_energy: Option<f32>,
    #[serde(default)]
    pub player3_energy: Option<f32>,
    #[serde(default)]
    pub player4_energy: Option<f32>,
    #[serde(default)]
    pub is_pedaling: Option<PedalingFlags>,
    #[serde(default)]
    pub pedal_count: Option<PedalCounts>,
    #[serde(default)]
    pub game_active: bool,
}

impl RemoteSnapshot {
    pub fn energy(&self, id: PlayerId) -> Option<f32> {
        match id.get() {
            1 => self.player1_energy,
            2 => self.player2_energy,
            3 => self.player3_energy,
            _ => self.player4_energy,
        }
    }

    /// A scalar flag only describes player 1
    pub fn is_pedaling(&self, id: PlayerId) -> Option<bool> {
        match self.is_pedaling.as_ref()? {
            PedalingFlags::PerPlayer(flags) => flags.get(id.index()).copied(),
            PedalingFlags::Single(flag) => (id.get() == 1).then_some(*flag),
        }
    }

    /// A scalar counter only describes player 1
    pub fn pedal_count(&self, id: PlayerId) -> Option<u32> {
        match self.pedal_count.as_ref()? {
            PedalCounts::PerPlayer(counts) => counts.get(id.index()).copied(),
            PedalCounts::Single(count) => (id.get() == 1).then_some(*count),
        }
    }
}

/// Energy source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),
}

impl SourceError {
    /// A request that never got an answer is a connectivity problem; a
    /// reachable server answering badly is an application problem.
    pub fn classify(&self) -> FailureKind {
        match self {
            SourceError::Request(_) => FailureKind::Connectivity,
            SourceError::Api { .. } | SourceError::Parse(_) => FailureKind::Application,
        }
    }
}
