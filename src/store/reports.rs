//! Append-only match report log

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::game::report::MatchReport;

use super::local::{load_json, save_json, SharedStore, StorageError};

/// Local storage key for the report list
pub const REPORTS_STORAGE_KEY: &str = "bikejj_game_reports";

/// Report log kept in memory and mirrored to local storage.
///
/// Storage failures never lose a report for the lifetime of the process;
/// the in-memory list is the source of truth and the whole list is
/// rewritten on every append.
#[derive(Clone)]
pub struct ReportLog {
    storage: SharedStore,
    reports: Arc<Mutex<Vec<MatchReport>>>,
}

impl ReportLog {
    /// Load the stored list. Unreadable data starts an empty log.
    pub fn load(storage: SharedStore) -> Self {
        let reports = match load_json::<Vec<MatchReport>>(storage.as_ref(), REPORTS_STORAGE_KEY) {
            Ok(Some(reports)) => {
                debug!(count = reports.len(), "Loaded match reports");
                reports
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Stored match reports unreadable, starting empty");
                Vec::new()
            }
        };

        Self {
            storage,
            reports: Arc::new(Mutex::new(reports)),
        }
    }

    pub fn append(&self, report: MatchReport) -> Result<(), StorageError> {
        let mut reports = self.reports.lock();
        reports.push(report);
        save_json(self.storage.as_ref(), REPORTS_STORAGE_KEY, &*reports)
    }

    /// Every report, oldest first
    pub fn all(&self) -> Vec<MatchReport> {
        self.reports.lock().clone()
    }

    pub fn latest(&self) -> Option<MatchReport> {
        self.reports.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{roster, PlayerId};
    use crate::game::report::{ReportBuilder, VictoryType};
    use crate::game::settings::GameConfig;
    use crate::store::local::{KeyValueStore, MemoryStore};

    fn sample_report(winner: usize) -> MatchReport {
        ReportBuilder::open(GameConfig::default()).finalize(
            &roster(),
            PlayerId::ALL[winner],
            VictoryType::EnergyMax,
        )
    }

    #[test]
    fn appended_reports_survive_reload() {
        let storage = Arc::new(MemoryStore::new());
        let log = ReportLog::load(storage.clone());
        assert!(log.is_empty());

        log.append(sample_report(0)).unwrap();
        log.append(sample_report(2)).unwrap();

        let reloaded = ReportLog::load(storage);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.latest().map(|r| r.winner.id), Some(PlayerId::ALL[2]));
        assert_eq!(reloaded.all()[0].winner.id, PlayerId::ALL[0]);
    }

    #[test]
    fn malformed_storage_starts_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(REPORTS_STORAGE_KEY, "[{\"half\":").unwrap();
        assert!(ReportLog::load(storage).is_empty());
    }

    #[test]
    fn storage_failure_keeps_report_in_memory() {
        let storage = Arc::new(MemoryStore::new());
        let log = ReportLog::load(storage.clone());
        storage.set_unavailable(true);

        assert!(matches!(log.append(sample_report(1)), Err(StorageError::Unavailable)));
        assert_eq!(log.len(), 1);
    }
}
