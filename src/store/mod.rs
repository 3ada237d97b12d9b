//! Persistence: local key-value storage, the report log and the energy source client

pub mod local;
pub mod reports;
pub mod source;

pub use local::{FileStore, MemoryStore, SharedStore};
pub use reports::ReportLog;
pub use source::{EnergySourceClient, SourceError};
