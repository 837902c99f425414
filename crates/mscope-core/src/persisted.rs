use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::Location;
use crate::{SelectionState, DEFAULT_DURATION_MINUTES};

pub const SELECTION_KEY: &str = "Metrics_SelectState";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("selection store unavailable: {0}")]
    Unavailable(String),
}

/// Durable copy of a selection.
///
/// Values are stored as written and only validated when the record is replayed as a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSelection {
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub meter_name: Option<String>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
}

fn default_duration_minutes() -> u32 {
    DEFAULT_DURATION_MINUTES
}

impl PersistedSelection {
    pub fn to_location(&self) -> Location {
        Location {
            application_id: self.application_id.clone(),
            meter_name: self.meter_name.clone(),
            instrument_name: self.instrument_name.clone(),
            duration_minutes: (self.duration_minutes != DEFAULT_DURATION_MINUTES)
                .then_some(self.duration_minutes),
        }
    }
}

impl From<&SelectionState> for PersistedSelection {
    fn from(selection: &SelectionState) -> Self {
        Self {
            application_id: selection.application_id().map(str::to_string),
            meter_name: selection.meter_name().map(str::to_string),
            instrument_name: selection.instrument_name().map(str::to_string),
            duration_minutes: selection.duration().minutes(),
        }
    }
}

/// Key/value transport for persisted selections.
pub trait SelectionPersistence: Send {
    fn load(&self, key: &str) -> Result<Option<PersistedSelection>, PersistError>;

    fn save(&self, key: &str, selection: &PersistedSelection) -> Result<(), PersistError>;
}
