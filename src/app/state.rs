//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{ConfigStore, GameSession, SessionHandle, SessionOptions, SessionRunner};
use crate::store::{EnergySourceClient, ReportLog, SharedStore, SourceError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub config_store: ConfigStore,
    pub reports: ReportLog,
}

impl AppState {
    /// Wire the services together. The returned runner must be spawned.
    pub async fn new(config: Config, storage: SharedStore) -> Result<(Self, SessionRunner), SourceError> {
        let config = Arc::new(config);

        // Energy source client shared by the poller and the config store
        let source = EnergySourceClient::new(&config.energy_source_url, config.request_timeout)?;

        let config_store = ConfigStore::new(source.clone(), storage.clone());
        let game_config = config_store.load().await;

        let reports = ReportLog::load(storage);

        let session = GameSession::new(game_config, SessionOptions::from_config(&config));
        let (runner, session) =
            SessionRunner::new(session, source, reports.clone(), config.poll_interval);

        Ok((
            Self {
                config,
                session,
                config_store,
                reports,
            },
            runner,
        ))
    }
}
