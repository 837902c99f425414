use mscope_core::telemetry::{InstrumentSummary, Subscription, TelemetryStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::SessionEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebind {
    Unchanged,
    Bound { application_id: String },
    Released,
}

#[derive(Debug)]
struct BoundSubscription {
    application_id: String,
    handle: Subscription,
}

/// Owns the "new metrics" subscription for the selected application and the instrument
/// summary cache it guards.
#[derive(Debug, Default)]
pub struct MetricsSubscriptionManager {
    bound: Option<BoundSubscription>,
    instruments: Option<Vec<InstrumentSummary>>,
}

impl MetricsSubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_application(&self) -> Option<&str> {
        self.bound
            .as_ref()
            .map(|bound| bound.application_id.as_str())
    }

    pub fn instruments(&self) -> Option<&[InstrumentSummary]> {
        self.instruments.as_deref()
    }

    /// Used when a resolution fetched a fresh list for a (possibly new) application.
    pub fn replace_instruments(&mut self, instruments: Option<Vec<InstrumentSummary>>) {
        self.instruments = instruments;
    }

    /// Points the subscription at `application_id`, cancelling the previous one first.
    /// No subscription is held while nothing is selected.
    pub fn rebind<S: TelemetryStore + ?Sized>(
        &mut self,
        store: &S,
        application_id: Option<&str>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Rebind {
        if self.bound_application() == application_id {
            return Rebind::Unchanged;
        }

        if let Some(previous) = self.bound.take() {
            debug!(
                event = "metrics_subscription_released",
                application_id = previous.application_id.as_str()
            );
            previous.handle.cancel();
        }

        let Some(application_id) = application_id else {
            return Rebind::Released;
        };

        let tx = events.clone();
        let notified_id = application_id.to_string();
        let handle = store.on_new_metrics(
            application_id,
            Arc::new(move || {
                // A closed channel means the session is gone.
                let _ = tx.send(SessionEvent::NewMetrics {
                    application_id: notified_id.clone(),
                });
            }),
        );
        info!(event = "metrics_subscription_bound", application_id);
        self.bound = Some(BoundSubscription {
            application_id: application_id.to_string(),
            handle,
        });
        Rebind::Bound {
            application_id: application_id.to_string(),
        }
    }

    /// Handles a "new metrics" notification. Returns true when the view needs a refresh.
    ///
    /// Only a strictly larger instrument list replaces the cache; value-only updates and
    /// same-size lists are discarded.
    pub fn on_new_metrics<S: TelemetryStore + ?Sized>(
        &mut self,
        store: &S,
        application_id: &str,
    ) -> bool {
        if self.bound_application() != Some(application_id) {
            debug!(event = "metrics_notification_stale", application_id);
            return false;
        }

        let refreshed = match store.instrument_summaries(application_id) {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!(
                    event = "instrument_refresh_failed",
                    application_id,
                    error = %err
                );
                return false;
            }
        };

        let cached = self.instruments.as_ref().map(Vec::len);
        if cached.is_some_and(|cached| refreshed.len() <= cached) {
            debug!(
                event = "instrument_refresh_skipped",
                application_id,
                cached = cached.unwrap_or_default(),
                refreshed = refreshed.len()
            );
            return false;
        }

        debug!(
            event = "instrument_cache_replaced",
            application_id,
            instruments = refreshed.len()
        );
        self.instruments = Some(refreshed);
        true
    }

    pub fn release(&mut self) {
        if let Some(previous) = self.bound.take() {
            previous.handle.cancel();
        }
        self.instruments = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mscope_core::telemetry::{
        ApplicationSummary, ChangeCallback, InstrumentDetail, InstrumentKind, InstrumentRequest,
        MeterSummary, StoreError,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingStore {
        instruments: Mutex<Vec<InstrumentSummary>>,
        callbacks: Mutex<BTreeMap<String, ChangeCallback>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CountingStore {
        fn set_instruments(&self, count: usize) {
            *self.instruments.lock().expect("instruments") = (0..count)
                .map(|i| InstrumentSummary {
                    name: format!("instrument.{i}"),
                    description: String::new(),
                    unit: String::new(),
                    kind: InstrumentKind::Gauge,
                    meter: MeterSummary {
                        name: "http".to_string(),
                        version: None,
                    },
                })
                .collect();
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().expect("log").clone()
        }

        fn fire(&self, application_id: &str) {
            let callback = self
                .callbacks
                .lock()
                .expect("callbacks")
                .get(application_id)
                .cloned();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    impl TelemetryStore for CountingStore {
        fn applications(&self) -> Result<Vec<ApplicationSummary>, StoreError> {
            Ok(Vec::new())
        }

        fn instrument_summaries(
            &self,
            _application_id: &str,
        ) -> Result<Vec<InstrumentSummary>, StoreError> {
            Ok(self.instruments.lock().expect("instruments").clone())
        }

        fn instrument(
            &self,
            _request: &InstrumentRequest,
        ) -> Result<Option<InstrumentDetail>, StoreError> {
            Ok(None)
        }

        fn on_new_applications(&self, _callback: ChangeCallback) -> Subscription {
            Subscription::detached(None)
        }

        fn on_new_metrics(&self, application_id: &str, callback: ChangeCallback) -> Subscription {
            self.log
                .lock()
                .expect("log")
                .push(format!("subscribe:{application_id}"));
            self.callbacks
                .lock()
                .expect("callbacks")
                .insert(application_id.to_string(), callback);
            let log = self.log.clone();
            let id = application_id.to_string();
            Subscription::new(Some(application_id.to_string()), move || {
                log.lock().expect("log").push(format!("cancel:{id}"));
            })
        }
    }

    #[test]
    fn switching_application_cancels_then_subscribes() {
        let store = CountingStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();

        assert_eq!(
            manager.rebind(&store, Some("svc-a"), &tx),
            Rebind::Bound {
                application_id: "svc-a".to_string()
            }
        );
        assert_eq!(manager.rebind(&store, Some("svc-a"), &tx), Rebind::Unchanged);
        manager.rebind(&store, Some("svc-b"), &tx);

        assert_eq!(
            store.log(),
            vec!["subscribe:svc-a", "cancel:svc-a", "subscribe:svc-b"]
        );
        assert_eq!(manager.bound_application(), Some("svc-b"));
    }

    #[test]
    fn none_selected_only_cancels() {
        let store = CountingStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();

        assert_eq!(manager.rebind(&store, None, &tx), Rebind::Unchanged);
        manager.rebind(&store, Some("svc-a"), &tx);
        assert_eq!(manager.rebind(&store, None, &tx), Rebind::Released);
        assert_eq!(manager.bound_application(), None);
        assert_eq!(store.log(), vec!["subscribe:svc-a", "cancel:svc-a"]);
    }

    #[test]
    fn callback_posts_into_session_queue() {
        let store = CountingStore::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();
        manager.rebind(&store, Some("svc-a"), &tx);

        store.fire("svc-a");
        assert_eq!(
            rx.try_recv().expect("queued event"),
            SessionEvent::NewMetrics {
                application_id: "svc-a".to_string()
            }
        );
    }

    #[test]
    fn callback_after_receiver_dropped_is_noop() {
        let store = CountingStore::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();
        manager.rebind(&store, Some("svc-a"), &tx);
        drop(rx);
        store.fire("svc-a");
    }

    #[test]
    fn only_growth_replaces_cache() {
        let store = CountingStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();
        manager.rebind(&store, Some("svc1"), &tx);

        store.set_instruments(3);
        manager.replace_instruments(Some(store.instrument_summaries("svc1").expect("list")));

        assert!(!manager.on_new_metrics(&store, "svc1"));
        store.set_instruments(2);
        assert!(!manager.on_new_metrics(&store, "svc1"));
        assert_eq!(manager.instruments().map(<[_]>::len), Some(3));

        store.set_instruments(5);
        assert!(manager.on_new_metrics(&store, "svc1"));
        assert_eq!(manager.instruments().map(<[_]>::len), Some(5));
    }

    #[test]
    fn empty_cache_is_always_replaced() {
        let store = CountingStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();
        manager.rebind(&store, Some("svc1"), &tx);

        assert!(manager.on_new_metrics(&store, "svc1"));
        assert_eq!(manager.instruments().map(<[_]>::len), Some(0));
    }

    #[test]
    fn stale_notification_is_ignored() {
        let store = CountingStore::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = MetricsSubscriptionManager::new();
        manager.rebind(&store, Some("svc-b"), &tx);
        store.set_instruments(4);

        assert!(!manager.on_new_metrics(&store, "svc-a"));
        assert!(manager.instruments().is_none());
    }
}
