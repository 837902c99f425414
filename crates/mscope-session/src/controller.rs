use mscope_core::location::{self, Location};
use mscope_core::persisted::{
    PersistError, PersistedSelection, SelectionPersistence, SELECTION_KEY,
};
use mscope_core::telemetry::{
    group_by_meter, InstrumentDetail, InstrumentSummary, MeterGroup, MeterSummary, Subscription,
    TelemetryStore,
};
use mscope_core::{
    application_options, ApplicationOption, DurationPreset, SelectionState, TreeSelection,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::subscription::MetricsSubscriptionManager;
use crate::{RefreshReason, SessionEvent, SessionSignal};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to persist selection: {0}")]
    Persist(#[from] PersistError),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub persistence_key: String,
    pub restore_persisted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistence_key: SELECTION_KEY.to_string(),
            restore_persisted: true,
        }
    }
}

/// One live metrics browsing session.
///
/// All state is mutated through `&mut self`: store callbacks only enqueue [`SessionEvent`]s,
/// which the host feeds back through [`MetricsSession::handle_event`]. Outbound navigation and
/// refresh requests leave through the [`SessionSignal`] channel returned by
/// [`MetricsSession::start`].
pub struct MetricsSession<S: TelemetryStore + ?Sized, P: SelectionPersistence> {
    store: Arc<S>,
    persistence: P,
    config: SessionConfig,
    applications: Vec<ApplicationOption>,
    none_selected: ApplicationOption,
    applications_revision: u64,
    applications_subscription: Option<Subscription>,
    metrics: MetricsSubscriptionManager,
    selection: Option<SelectionState>,
    selected_meter: Option<MeterSummary>,
    selected_instrument: Option<InstrumentDetail>,
    last_resolved: Option<(Location, u64)>,
    first_render_handled: bool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    closed: bool,
}

impl<S: TelemetryStore + ?Sized, P: SelectionPersistence> MetricsSession<S, P> {
    /// Loads the known applications and subscribes to new ones. The selection stays
    /// unresolved until the first location is applied.
    pub fn start(
        store: Arc<S>,
        persistence: P,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            store,
            persistence,
            config,
            applications: vec![ApplicationOption::none_selected()],
            none_selected: ApplicationOption::none_selected(),
            applications_revision: 0,
            applications_subscription: None,
            metrics: MetricsSubscriptionManager::new(),
            selection: None,
            selected_meter: None,
            selected_instrument: None,
            last_resolved: None,
            first_render_handled: false,
            events_tx,
            events_rx,
            signals,
            closed: false,
        };

        session.reload_applications();
        let tx = session.events_tx.clone();
        session.applications_subscription =
            Some(session.store.on_new_applications(Arc::new(move || {
                let _ = tx.send(SessionEvent::NewApplications);
            })));
        (session, signals_rx)
    }

    pub fn applications(&self) -> &[ApplicationOption] {
        &self.applications
    }

    /// None until a location has been applied.
    pub fn selection(&self) -> Option<&SelectionState> {
        self.selection.as_ref()
    }

    pub fn selected_application(&self) -> &ApplicationOption {
        let id = self
            .selection
            .as_ref()
            .and_then(SelectionState::application_id);
        self.applications
            .iter()
            .find(|option| option.id.as_deref() == id)
            .unwrap_or(&self.none_selected)
    }

    pub fn selected_meter(&self) -> Option<&MeterSummary> {
        self.selected_meter.as_ref()
    }

    pub fn selected_instrument(&self) -> Option<&InstrumentDetail> {
        self.selected_instrument.as_ref()
    }

    pub fn instruments(&self) -> Option<&[InstrumentSummary]> {
        self.metrics.instruments()
    }

    pub fn instrument_tree(&self) -> Vec<MeterGroup> {
        self.metrics
            .instruments()
            .map(group_by_meter)
            .unwrap_or_default()
    }

    pub fn bound_application(&self) -> Option<&str> {
        self.metrics.bound_application()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves inbound location parameters into the current selection.
    ///
    /// This is the single entry point for both genuine navigation and persisted-state replay.
    /// Returns false when the same location was already resolved against the same
    /// applications snapshot.
    pub fn apply_location(&mut self, location: &Location) -> bool {
        if self.closed {
            return false;
        }
        let key = (location.clone(), self.applications_revision);
        if self.last_resolved.as_ref() == Some(&key) {
            debug!(event = "location_unchanged", location = %location);
            return false;
        }

        let decoded = location::decode(location, &self.applications, &*self.store);
        let application_id = decoded.selection.application_id().map(str::to_string);
        self.metrics.replace_instruments(decoded.instruments);
        self.selected_meter = decoded.meter;
        self.selected_instrument = decoded.instrument;
        self.selection = Some(decoded.selection);
        self.metrics
            .rebind(&*self.store, application_id.as_deref(), &self.events_tx);
        self.last_resolved = Some(key);

        debug!(event = "location_applied", location = %location);
        self.signal(SessionSignal::Refresh(RefreshReason::Selection));
        true
    }

    /// Replays the persisted selection as a navigation, once per session.
    pub fn on_first_render(&mut self) {
        if self.closed || self.first_render_handled {
            return;
        }
        self.first_render_handled = true;
        if !self.config.restore_persisted {
            return;
        }

        match self.persistence.load(&self.config.persistence_key) {
            Ok(Some(record)) => {
                let location = record.to_location();
                info!(event = "persisted_selection_restored", location = %location);
                self.signal(SessionSignal::Navigate(location));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(event = "persisted_selection_unreadable", error = %err);
            }
        }
    }

    /// Applies one store notification.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.closed {
            return;
        }
        match event {
            SessionEvent::NewApplications => {
                self.reload_applications();
                self.signal(SessionSignal::Refresh(RefreshReason::Applications));
            }
            SessionEvent::NewMetrics { application_id } => {
                if self
                    .metrics
                    .on_new_metrics(&*self.store, &application_id)
                {
                    self.signal(SessionSignal::Refresh(RefreshReason::Instruments));
                }
            }
        }
    }

    /// Waits for the next queued store notification.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        self.events_rx.recv().await
    }

    /// Applies every notification already queued. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn select_application(
        &mut self,
        application_id: Option<&str>,
    ) -> Result<Location, SessionError> {
        let duration = self.current_duration();
        let state = SelectionState::application(application_id.map(str::to_string), duration);
        self.commit(state)
    }

    pub fn select_duration(&mut self, duration: DurationPreset) -> Result<Location, SessionError> {
        let state = self.current_selection().with_duration(duration);
        self.commit(state)
    }

    pub fn select_tree_item(
        &mut self,
        selection: &TreeSelection,
    ) -> Result<Location, SessionError> {
        let state = self.current_selection().with_tree_selection(selection);
        self.commit(state)
    }

    /// Releases both store subscriptions. Later notifications are ignored.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(subscription) = self.applications_subscription.take() {
            subscription.cancel();
        }
        self.metrics.release();
        info!(event = "metrics_session_closed");
    }

    fn current_selection(&self) -> SelectionState {
        self.selection.clone().unwrap_or_default()
    }

    fn current_duration(&self) -> DurationPreset {
        self.selection
            .as_ref()
            .map(SelectionState::duration)
            .unwrap_or_default()
    }

    /// Pushes a user-driven selection out as a navigation and persists it.
    fn commit(&mut self, state: SelectionState) -> Result<Location, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let location = location::encode(&state);
        self.signal(SessionSignal::Navigate(location.clone()));
        self.persistence.save(
            &self.config.persistence_key,
            &PersistedSelection::from(&state),
        )?;
        Ok(location)
    }

    fn reload_applications(&mut self) {
        match self.store.applications() {
            Ok(applications) => {
                self.applications = application_options(&applications);
                self.applications_revision += 1;
                debug!(
                    event = "applications_reloaded",
                    applications = applications.len()
                );
            }
            Err(err) => {
                warn!(event = "applications_unavailable", error = %err);
            }
        }
    }

    fn signal(&self, signal: SessionSignal) {
        if self.signals.send(signal).is_err() {
            debug!(event = "session_signal_dropped");
        }
    }
}

impl<S: TelemetryStore + ?Sized, P: SelectionPersistence> Drop for MetricsSession<S, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
