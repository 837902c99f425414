use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::DurationPreset;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),
    #[error("telemetry store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InstrumentKind {
    #[default]
    Counter,
    UpDownCounter,
    Gauge,
    Histogram,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::UpDownCounter => "up-down-counter",
            InstrumentKind::Gauge => "gauge",
            InstrumentKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub kind: InstrumentKind,
    pub meter: MeterSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDetail {
    pub summary: InstrumentSummary,
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

impl InstrumentDetail {
    /// Points no older than `duration` relative to `now`.
    pub fn points_within(&self, duration: DurationPreset, now: DateTime<Utc>) -> Vec<&MetricPoint> {
        let start = now - duration.as_chrono();
        self.points
            .iter()
            .filter(|point| point.timestamp >= start && point.timestamp <= now)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRequest {
    pub application_id: String,
    pub meter_name: String,
    pub instrument_name: String,
}

/// Instruments of one meter, in the order the store reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterGroup {
    pub meter: MeterSummary,
    pub instruments: Vec<InstrumentSummary>,
}

pub fn group_by_meter(instruments: &[InstrumentSummary]) -> Vec<MeterGroup> {
    let mut groups: Vec<MeterGroup> = Vec::new();
    for instrument in instruments {
        match groups
            .iter_mut()
            .find(|group| group.meter.name == instrument.meter.name)
        {
            Some(group) => group.instruments.push(instrument.clone()),
            None => groups.push(MeterGroup {
                meter: instrument.meter.clone(),
                instruments: vec![instrument.clone()],
            }),
        }
    }
    groups
}

pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Registration with a telemetry store change feed. Dropping the handle cancels it.
pub struct Subscription {
    application_id: Option<String>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(application_id: Option<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            application_id,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn detached(application_id: Option<String>) -> Self {
        Self {
            application_id,
            cancel: None,
        }
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("application_id", &self.application_id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Read side of the telemetry store as seen by a metrics browsing session.
///
/// Callbacks may fire on any thread; implementations must not hold internal locks while
/// invoking them.
pub trait TelemetryStore: Send + Sync {
    fn applications(&self) -> Result<Vec<ApplicationSummary>, StoreError>;

    fn instrument_summaries(
        &self,
        application_id: &str,
    ) -> Result<Vec<InstrumentSummary>, StoreError>;

    fn instrument(
        &self,
        request: &InstrumentRequest,
    ) -> Result<Option<InstrumentDetail>, StoreError>;

    fn on_new_applications(&self, callback: ChangeCallback) -> Subscription;

    fn on_new_metrics(&self, application_id: &str, callback: ChangeCallback) -> Subscription;
}

impl<T: TelemetryStore + ?Sized> TelemetryStore for Arc<T> {
    fn applications(&self) -> Result<Vec<ApplicationSummary>, StoreError> {
        (**self).applications()
    }

    fn instrument_summaries(
        &self,
        application_id: &str,
    ) -> Result<Vec<InstrumentSummary>, StoreError> {
        (**self).instrument_summaries(application_id)
    }

    fn instrument(
        &self,
        request: &InstrumentRequest,
    ) -> Result<Option<InstrumentDetail>, StoreError> {
        (**self).instrument(request)
    }

    fn on_new_applications(&self, callback: ChangeCallback) -> Subscription {
        (**self).on_new_applications(callback)
    }

    fn on_new_metrics(&self, application_id: &str, callback: ChangeCallback) -> Subscription {
        (**self).on_new_metrics(application_id, callback)
    }
}
