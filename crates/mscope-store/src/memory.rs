use mscope_core::telemetry::{
    ApplicationSummary, ChangeCallback, InstrumentDetail, InstrumentRequest, InstrumentSummary,
    MeterSummary, MetricPoint, StoreError, Subscription, TelemetryStore,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tracing::debug;

use crate::snapshot::TelemetrySnapshot;

#[derive(Debug, Clone)]
struct ApplicationData {
    summary: ApplicationSummary,
    meters: Vec<MeterData>,
}

impl ApplicationData {
    fn new(id: &str, name: &str) -> Self {
        Self {
            summary: ApplicationSummary {
                id: id.to_string(),
                name: name.to_string(),
            },
            meters: Vec::new(),
        }
    }

    /// Instrument count and total point count, used to detect metric changes between snapshots.
    fn fingerprint(&self) -> (usize, usize) {
        self.meters
            .iter()
            .flat_map(|meter| meter.instruments.iter())
            .fold((0, 0), |(instruments, points), detail| {
                (instruments + 1, points + detail.points.len())
            })
    }

    fn find_instrument(
        &self,
        meter_name: &str,
        instrument_name: &str,
    ) -> Option<&InstrumentDetail> {
        self.meters
            .iter()
            .find(|meter| meter.meter.name == meter_name)?
            .instruments
            .iter()
            .find(|detail| detail.summary.name == instrument_name)
    }
}

#[derive(Debug, Clone)]
struct MeterData {
    meter: MeterSummary,
    instruments: Vec<InstrumentDetail>,
}

struct MetricsSubscriber {
    application_id: String,
    callback: ChangeCallback,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    applications: BTreeMap<u64, ChangeCallback>,
    metrics: BTreeMap<u64, MetricsSubscriber>,
}

impl Subscribers {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// What changed when a snapshot was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    pub applications_changed: bool,
    pub metrics_changed: Vec<String>,
}

/// Telemetry held in process memory, with change feeds for new applications and new metrics.
#[derive(Default)]
pub struct InMemoryTelemetryStore {
    data: RwLock<Vec<ApplicationData>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &TelemetrySnapshot) -> Self {
        let store = Self::new();
        store.apply_snapshot(snapshot);
        store
    }

    /// Registers an application. Returns false when the id was already known.
    pub fn add_application(&self, id: &str, name: &str) -> bool {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            if data.iter().any(|app| app.summary.id == id) {
                return false;
            }
            data.push(ApplicationData::new(id, name));
        }
        self.notify_applications();
        true
    }

    /// Appends points to an instrument, creating the application, meter and instrument as needed.
    pub fn record(
        &self,
        application_id: &str,
        summary: InstrumentSummary,
        points: Vec<MetricPoint>,
    ) {
        let created_application = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let (created, index) = match data
                .iter()
                .position(|app| app.summary.id == application_id)
            {
                Some(index) => (false, index),
                None => {
                    data.push(ApplicationData::new(application_id, application_id));
                    (true, data.len() - 1)
                }
            };
            let app = &mut data[index];
            let meter_index = match app
                .meters
                .iter()
                .position(|meter| meter.meter.name == summary.meter.name)
            {
                Some(index) => index,
                None => {
                    app.meters.push(MeterData {
                        meter: summary.meter.clone(),
                        instruments: Vec::new(),
                    });
                    app.meters.len() - 1
                }
            };
            let meter = &mut app.meters[meter_index];
            match meter
                .instruments
                .iter_mut()
                .find(|detail| detail.summary.name == summary.name)
            {
                Some(detail) => detail.points.extend(points),
                None => meter.instruments.push(InstrumentDetail { summary, points }),
            }
            created
        };

        if created_application {
            self.notify_applications();
        }
        self.notify_metrics(application_id);
    }

    /// Replaces the store contents and raises notifications for whatever changed.
    pub fn apply_snapshot(&self, snapshot: &TelemetrySnapshot) -> SnapshotDelta {
        let next = build_applications(snapshot);
        let delta = {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            let delta = diff_applications(&data, &next);
            *data = next;
            delta
        };

        if delta.applications_changed {
            self.notify_applications();
        }
        for application_id in &delta.metrics_changed {
            self.notify_metrics(application_id);
        }
        debug!(
            event = "telemetry_snapshot_applied",
            applications_changed = delta.applications_changed,
            metrics_changed = delta.metrics_changed.len()
        );
        delta
    }

    pub fn application_subscriber_count(&self) -> usize {
        self.lock_subscribers().applications.len()
    }

    pub fn metrics_subscriber_count(&self, application_id: &str) -> usize {
        self.lock_subscribers()
            .metrics
            .values()
            .filter(|subscriber| subscriber.application_id == application_id)
            .count()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_applications(&self) {
        let callbacks: Vec<ChangeCallback> =
            self.lock_subscribers().applications.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    fn notify_metrics(&self, application_id: &str) {
        let callbacks: Vec<ChangeCallback> = self
            .lock_subscribers()
            .metrics
            .values()
            .filter(|subscriber| subscriber.application_id == application_id)
            .map(|subscriber| subscriber.callback.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    fn unsubscribe_handle(&self, id: u64, application_id: Option<String>) -> Subscription {
        let registry: Weak<Mutex<Subscribers>> = Arc::downgrade(&self.subscribers);
        Subscription::new(application_id, move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut subscribers = registry.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.applications.remove(&id);
            subscribers.metrics.remove(&id);
        })
    }
}

impl TelemetryStore for InMemoryTelemetryStore {
    fn applications(&self) -> Result<Vec<ApplicationSummary>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.iter().map(|app| app.summary.clone()).collect())
    }

    fn instrument_summaries(
        &self,
        application_id: &str,
    ) -> Result<Vec<InstrumentSummary>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .iter()
            .find(|app| app.summary.id == application_id)
            .map(|app| {
                app.meters
                    .iter()
                    .flat_map(|meter| meter.instruments.iter())
                    .map(|detail| detail.summary.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn instrument(
        &self,
        request: &InstrumentRequest,
    ) -> Result<Option<InstrumentDetail>, StoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .iter()
            .find(|app| app.summary.id == request.application_id)
            .and_then(|app| app.find_instrument(&request.meter_name, &request.instrument_name))
            .cloned())
    }

    fn on_new_applications(&self, callback: ChangeCallback) -> Subscription {
        let id = {
            let mut subscribers = self.lock_subscribers();
            let id = subscribers.allocate_id();
            subscribers.applications.insert(id, callback);
            id
        };
        self.unsubscribe_handle(id, None)
    }

    fn on_new_metrics(&self, application_id: &str, callback: ChangeCallback) -> Subscription {
        let id = {
            let mut subscribers = self.lock_subscribers();
            let id = subscribers.allocate_id();
            subscribers.metrics.insert(
                id,
                MetricsSubscriber {
                    application_id: application_id.to_string(),
                    callback,
                },
            );
            id
        };
        self.unsubscribe_handle(id, Some(application_id.to_string()))
    }
}

fn build_applications(snapshot: &TelemetrySnapshot) -> Vec<ApplicationData> {
    let mut applications: Vec<ApplicationData> = Vec::new();
    for app in &snapshot.applications {
        if applications.iter().any(|known| known.summary.id == app.id) {
            continue;
        }
        let mut data = ApplicationData::new(&app.id, app.display_name());
        for meter in &app.meters {
            let summary = MeterSummary {
                name: meter.name.clone(),
                version: meter.version.clone(),
            };
            data.meters.push(MeterData {
                instruments: meter
                    .instruments
                    .iter()
                    .map(|instrument| InstrumentDetail {
                        summary: InstrumentSummary {
                            name: instrument.name.clone(),
                            description: instrument.description.clone(),
                            unit: instrument.unit.clone(),
                            kind: instrument.kind,
                            meter: summary.clone(),
                        },
                        points: instrument.points.clone(),
                    })
                    .collect(),
                meter: summary,
            });
        }
        applications.push(data);
    }
    applications
}

fn diff_applications(previous: &[ApplicationData], next: &[ApplicationData]) -> SnapshotDelta {
    let previous_ids: BTreeSet<&str> = previous.iter().map(|app| app.summary.id.as_str()).collect();
    let applications_changed = previous.len() != next.len()
        || next.iter().any(|app| {
            previous
                .iter()
                .find(|old| old.summary.id == app.summary.id)
                .map_or(true, |old| old.summary.name != app.summary.name)
        });

    let metrics_changed = next
        .iter()
        .filter(|app| {
            !previous_ids.contains(app.summary.id.as_str())
                || previous
                    .iter()
                    .find(|old| old.summary.id == app.summary.id)
                    .map_or(true, |old| old.fingerprint() != app.fingerprint())
        })
        .map(|app| app.summary.id.clone())
        .collect();

    SnapshotDelta {
        applications_changed,
        metrics_changed,
    }
}
