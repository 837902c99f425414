use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::telemetry::{
    InstrumentDetail, InstrumentRequest, InstrumentSummary, MeterSummary, TelemetryStore,
};
use crate::{ApplicationOption, DurationPreset, SelectionState};

pub const METRICS_ROOT: &str = "metrics";
pub const DURATION_PARAM: &str = "duration";

const METER_SEGMENT: &str = "meter";
const INSTRUMENT_SEGMENT: &str = "instrument";

const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("invalid location {input:?}: {reason}")]
    Invalid { input: String, reason: String },
    #[error("location {0:?} is not a metrics path")]
    NotMetrics(String),
}

/// Navigation parameters for the metrics view, as carried by a path plus query.
///
/// Values are kept verbatim; validation against live data happens in [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct Location {
    pub application_id: Option<String>,
    pub meter_name: Option<String>,
    pub instrument_name: Option<String>,
    pub duration_minutes: Option<u32>,
}

impl Location {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, LocationError> {
        let invalid = |reason: String| LocationError::Invalid {
            input: input.to_string(),
            reason,
        };
        // Segments are taken verbatim: `.`, `..` and `\` are names, not navigation.
        let trimmed = input.trim();
        let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };

        let mut segments = Vec::new();
        for raw in path.split('/').filter(|segment| !segment.is_empty()) {
            let decoded = percent_encoding::percent_decode_str(raw)
                .decode_utf8()
                .map_err(|err| invalid(err.to_string()))?;
            segments.push(decoded.into_owned());
        }

        let mut location = match segments.as_slice() {
            [root, rest @ ..] if root.eq_ignore_ascii_case(METRICS_ROOT) => match rest {
                [] => Location::root(),
                [app] => Location {
                    application_id: Some(app.clone()),
                    ..Location::default()
                },
                [app, meter_kw, meter] if meter_kw.eq_ignore_ascii_case(METER_SEGMENT) => {
                    Location {
                        application_id: Some(app.clone()),
                        meter_name: Some(meter.clone()),
                        ..Location::default()
                    }
                }
                [app, meter_kw, meter, instrument_kw, instrument]
                    if meter_kw.eq_ignore_ascii_case(METER_SEGMENT)
                        && instrument_kw.eq_ignore_ascii_case(INSTRUMENT_SEGMENT) =>
                {
                    Location {
                        application_id: Some(app.clone()),
                        meter_name: Some(meter.clone()),
                        instrument_name: Some(instrument.clone()),
                        duration_minutes: None,
                    }
                }
                _ => return Err(LocationError::NotMetrics(input.to_string())),
            },
            _ => return Err(LocationError::NotMetrics(input.to_string())),
        };

        location.duration_minutes = query.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key.eq_ignore_ascii_case(DURATION_PARAM))
                .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        });

        Ok(location)
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Location::parse(input)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{METRICS_ROOT}")?;
        if let Some(app) = self.application_id.as_deref().filter(|v| !v.is_empty()) {
            write!(f, "/{}", utf8_percent_encode(app, SEGMENT_ENCODE_SET))?;
            if let Some(meter) = self.meter_name.as_deref().filter(|v| !v.is_empty()) {
                write!(
                    f,
                    "/{METER_SEGMENT}/{}",
                    utf8_percent_encode(meter, SEGMENT_ENCODE_SET)
                )?;
                if let Some(instrument) = self.instrument_name.as_deref().filter(|v| !v.is_empty())
                {
                    write!(
                        f,
                        "/{INSTRUMENT_SEGMENT}/{}",
                        utf8_percent_encode(instrument, SEGMENT_ENCODE_SET)
                    )?;
                }
            }
        }
        if let Some(minutes) = self
            .duration_minutes
            .filter(|minutes| *minutes != crate::DEFAULT_DURATION_MINUTES)
        {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair(DURATION_PARAM, &minutes.to_string())
                .finish();
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

/// Canonical location for a selection. The default duration is never written out.
pub fn encode(selection: &SelectionState) -> Location {
    let duration = selection.duration();
    Location {
        application_id: selection.application_id().map(str::to_string),
        meter_name: selection.meter_name().map(str::to_string),
        instrument_name: selection.instrument_name().map(str::to_string),
        duration_minutes: (!duration.is_default()).then_some(duration.minutes()),
    }
}

/// Result of resolving a location against the current store contents.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSelection {
    pub selection: SelectionState,
    /// Instrument summaries fetched for the resolved application, if one was resolved.
    pub instruments: Option<Vec<InstrumentSummary>>,
    pub meter: Option<MeterSummary>,
    pub instrument: Option<InstrumentDetail>,
}

pub fn resolve_application(
    application_id: Option<&str>,
    applications: &[ApplicationOption],
) -> Option<String> {
    let requested = application_id.filter(|id| !id.is_empty())?;
    let found = applications
        .iter()
        .filter_map(|option| option.id.as_deref())
        .find(|id| *id == requested);
    if found.is_none() {
        debug!(
            event = "location_application_unknown",
            application_id = requested
        );
    }
    found.map(str::to_string)
}

pub fn resolve_meter(
    meter_name: Option<&str>,
    instruments: &[InstrumentSummary],
) -> Option<MeterSummary> {
    let requested = meter_name.filter(|name| !name.is_empty())?;
    let found = instruments
        .iter()
        .find(|instrument| instrument.meter.name == requested)
        .map(|instrument| instrument.meter.clone());
    if found.is_none() {
        debug!(event = "location_meter_unknown", meter_name = requested);
    }
    found
}

/// Resolves a location into a selection, falling back to the nearest valid ancestor.
///
/// The instrument detail is read from the store rather than the summary list. A store failure
/// keeps the instrument selected with no detail; a missing instrument drops it.
pub fn decode<S: TelemetryStore + ?Sized>(
    location: &Location,
    applications: &[ApplicationOption],
    store: &S,
) -> DecodedSelection {
    let duration = DurationPreset::resolve(location.duration_minutes);
    let Some(application_id) = resolve_application(location.application_id.as_deref(), applications)
    else {
        return DecodedSelection {
            selection: SelectionState::application(None, duration),
            instruments: None,
            meter: None,
            instrument: None,
        };
    };

    let instruments = match store.instrument_summaries(&application_id) {
        Ok(instruments) => Some(instruments),
        Err(err) => {
            debug!(
                event = "location_instruments_unavailable",
                application_id = application_id.as_str(),
                error = %err
            );
            None
        }
    };

    let meter = instruments
        .as_deref()
        .and_then(|list| resolve_meter(location.meter_name.as_deref(), list));

    let mut instrument_name = None;
    let mut instrument = None;
    if let (Some(meter), Some(requested)) = (
        meter.as_ref(),
        location
            .instrument_name
            .as_deref()
            .filter(|name| !name.is_empty()),
    ) {
        let request = InstrumentRequest {
            application_id: application_id.clone(),
            meter_name: meter.name.clone(),
            instrument_name: requested.to_string(),
        };
        match store.instrument(&request) {
            Ok(Some(detail)) => {
                instrument_name = Some(requested.to_string());
                instrument = Some(detail);
            }
            Ok(None) => {
                debug!(
                    event = "location_instrument_unknown",
                    meter_name = meter.name.as_str(),
                    instrument_name = requested
                );
            }
            Err(err) => {
                debug!(
                    event = "location_instrument_unavailable",
                    instrument_name = requested,
                    error = %err
                );
                instrument_name = Some(requested.to_string());
            }
        }
    }

    DecodedSelection {
        selection: SelectionState::new(
            Some(application_id),
            meter.as_ref().map(|meter| meter.name.clone()),
            instrument_name,
            duration,
        ),
        instruments,
        meter,
        instrument,
    }
}
