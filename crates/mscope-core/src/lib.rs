pub mod location;
pub mod persisted;
pub mod telemetry;

use std::fmt;

pub const DEFAULT_DURATION_MINUTES: u32 = 5;
pub const SELECT_SERVICE_LABEL: &str = "Select service...";

/// A selectable time window for metric charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DurationPreset {
    minutes: u32,
    label: &'static str,
}

pub const DURATION_PRESETS: [DurationPreset; 9] = [
    DurationPreset::new(1, "Last 1 minute"),
    DurationPreset::new(5, "Last 5 minutes"),
    DurationPreset::new(15, "Last 15 minutes"),
    DurationPreset::new(30, "Last 30 minutes"),
    DurationPreset::new(60, "Last 1 hour"),
    DurationPreset::new(180, "Last 3 hours"),
    DurationPreset::new(360, "Last 6 hours"),
    DurationPreset::new(720, "Last 12 hours"),
    DurationPreset::new(1440, "Last 24 hours"),
];

impl DurationPreset {
    pub const DEFAULT: Self = Self::new(DEFAULT_DURATION_MINUTES, "Last 5 minutes");

    const fn new(minutes: u32, label: &'static str) -> Self {
        Self { minutes, label }
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn label(self) -> &'static str {
        self.label
    }

    pub fn is_default(self) -> bool {
        self.minutes == DEFAULT_DURATION_MINUTES
    }

    pub fn as_chrono(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes))
    }

    /// Exact preset lookup; there is no rounding to a neighbouring preset.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        DURATION_PRESETS
            .iter()
            .copied()
            .find(|preset| preset.minutes == minutes)
    }

    pub fn resolve(minutes: Option<u32>) -> Self {
        minutes.and_then(Self::from_minutes).unwrap_or_default()
    }
}

impl Default for DurationPreset {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for DurationPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

/// The user's current focus in the metrics view.
///
/// Construction enforces the nesting rule: an instrument needs a meter and a meter needs an
/// application. Empty names count as absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionState {
    application_id: Option<String>,
    meter_name: Option<String>,
    instrument_name: Option<String>,
    duration: DurationPreset,
}

impl SelectionState {
    pub fn new(
        application_id: Option<String>,
        meter_name: Option<String>,
        instrument_name: Option<String>,
        duration: DurationPreset,
    ) -> Self {
        let application_id = non_empty(application_id);
        let meter_name = application_id.as_ref().and(non_empty(meter_name));
        let instrument_name = meter_name.as_ref().and(non_empty(instrument_name));
        Self {
            application_id,
            meter_name,
            instrument_name,
            duration,
        }
    }

    pub fn application(application_id: Option<String>, duration: DurationPreset) -> Self {
        Self::new(application_id, None, None, duration)
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn meter_name(&self) -> Option<&str> {
        self.meter_name.as_deref()
    }

    pub fn instrument_name(&self) -> Option<&str> {
        self.instrument_name.as_deref()
    }

    pub fn duration(&self) -> DurationPreset {
        self.duration
    }

    pub fn with_duration(&self, duration: DurationPreset) -> Self {
        Self {
            duration,
            ..self.clone()
        }
    }

    /// Maps a row picked in the instrument tree onto a new selection for the same application.
    pub fn with_tree_selection(&self, selection: &TreeSelection) -> Self {
        let (meter_name, instrument_name) = match selection {
            TreeSelection::None => (None, None),
            TreeSelection::Meter { meter_name } => (Some(meter_name.clone()), None),
            TreeSelection::Instrument {
                meter_name,
                instrument_name,
            } => (Some(meter_name.clone()), Some(instrument_name.clone())),
        };
        Self::new(
            self.application_id.clone(),
            meter_name,
            instrument_name,
            self.duration,
        )
    }
}

/// A row picked in the meter/instrument tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TreeSelection {
    #[default]
    None,
    Meter {
        meter_name: String,
    },
    Instrument {
        meter_name: String,
        instrument_name: String,
    },
}

/// One entry of the application picker. The synthetic head entry has no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationOption {
    pub id: Option<String>,
    pub name: String,
}

impl ApplicationOption {
    pub fn none_selected() -> Self {
        Self {
            id: None,
            name: SELECT_SERVICE_LABEL.to_string(),
        }
    }

    pub fn is_none_selected(&self) -> bool {
        self.id.is_none()
    }
}

pub fn application_options(
    applications: &[telemetry::ApplicationSummary],
) -> Vec<ApplicationOption> {
    let mut options = Vec::with_capacity(applications.len() + 1);
    options.push(ApplicationOption::none_selected());
    options.extend(applications.iter().map(|app| ApplicationOption {
        id: Some(app.id.clone()),
        name: app.name.clone(),
    }));
    options
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
