use chrono::{DateTime, Utc};
use mscope_core::location::{Location, LocationError};
use mscope_core::persisted::SelectionPersistence;
use mscope_core::telemetry::TelemetryStore;
use mscope_core::{DurationPreset, SelectionState, TreeSelection, DURATION_PRESETS};
use mscope_session::MetricsSession;
use std::fmt::Write;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  app <id> | app -            select a service, or clear it
  duration <minutes>          pick a time window
  meter <name>                select a meter of the current service
  instrument <meter> <name>   select an instrument
  clear                       clear the meter/instrument selection
  go <location>               navigate, e.g. go /metrics/svc1?duration=60
  show                        redraw the view
  help                        show this text
  quit                        exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Application(Option<String>),
    Duration(DurationPreset),
    Tree(TreeSelection),
    Go(Location),
    Show,
    Help,
    Quit,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("no {0}-minute window, choose one of: {1}")]
    Duration(String, String),
    #[error(transparent)]
    Location(#[from] LocationError),
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (keyword.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("app", ["-"]) => ConsoleCommand::Application(None),
        ("app", [id]) => ConsoleCommand::Application(Some((*id).to_string())),
        ("app", _) => return Err(CommandError::Usage("app <id> | app -")),
        ("duration", [minutes]) => ConsoleCommand::Duration(parse_duration(minutes)?),
        ("duration", _) => return Err(CommandError::Usage("duration <minutes>")),
        ("meter", [name]) => ConsoleCommand::Tree(TreeSelection::Meter {
            meter_name: (*name).to_string(),
        }),
        ("meter", _) => return Err(CommandError::Usage("meter <name>")),
        ("instrument", [meter, name]) => ConsoleCommand::Tree(TreeSelection::Instrument {
            meter_name: (*meter).to_string(),
            instrument_name: (*name).to_string(),
        }),
        ("instrument", _) => return Err(CommandError::Usage("instrument <meter> <name>")),
        ("clear", []) => ConsoleCommand::Tree(TreeSelection::None),
        ("go", [location]) => ConsoleCommand::Go(Location::parse(location)?),
        ("go", _) => return Err(CommandError::Usage("go <location>")),
        ("show", []) => ConsoleCommand::Show,
        ("help", _) | ("?", _) => ConsoleCommand::Help,
        ("quit", []) | ("exit", []) | ("q", []) => ConsoleCommand::Quit,
        _ => return Err(CommandError::Unknown(line.trim().to_string())),
    };
    Ok(Some(command))
}

fn parse_duration(raw: &str) -> Result<DurationPreset, CommandError> {
    raw.parse::<u32>()
        .ok()
        .and_then(DurationPreset::from_minutes)
        .ok_or_else(|| {
            let choices = DURATION_PRESETS
                .iter()
                .map(|preset| preset.minutes().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            CommandError::Duration(raw.to_string(), choices)
        })
}

/// Text rendering of the current session state, headed by the location bar.
pub fn render_view<S, P>(
    session: &MetricsSession<S, P>,
    location: &Location,
    now: DateTime<Utc>,
) -> String
where
    S: TelemetryStore + ?Sized,
    P: SelectionPersistence,
{
    let mut out = String::new();
    let _ = writeln!(out, "location:   {location}");

    let selected = session.selected_application();
    let _ = write!(out, "service:    {}", selected.name);
    if let Some(id) = &selected.id {
        let _ = write!(out, " ({id})");
    }
    out.push('\n');

    let known: Vec<String> = session
        .applications()
        .iter()
        .filter_map(|option| option.id.clone())
        .collect();
    if known.is_empty() {
        out.push_str("services:   none reported yet\n");
    } else {
        let _ = writeln!(out, "services:   {}", known.join(", "));
    }

    let selection = session.selection().cloned().unwrap_or_default();
    let _ = writeln!(out, "duration:   {}", selection.duration());

    render_tree(&mut out, session, &selection);

    if let Some(meter) = session.selected_meter() {
        let _ = write!(out, "meter:      {}", meter.name);
        if let Some(version) = &meter.version {
            let _ = write!(out, " {version}");
        }
        out.push('\n');
    }

    if let Some(detail) = session.selected_instrument() {
        let summary = &detail.summary;
        let window = detail.points_within(selection.duration(), now);
        let _ = writeln!(out, "instrument: {} [{}]", summary.name, summary.kind);
        if !summary.description.is_empty() {
            let _ = writeln!(out, "            {}", summary.description);
        }
        match window.last() {
            Some(latest) => {
                let _ = writeln!(
                    out,
                    "            {} points in window, latest {} {} at {}",
                    window.len(),
                    latest.value,
                    summary.unit,
                    latest.timestamp.format("%H:%M:%S")
                );
            }
            None => out.push_str("            no points in window\n"),
        }
    } else if let Some(name) = selection.instrument_name() {
        let _ = writeln!(out, "instrument: {name} (no data)");
    }

    out
}

fn render_tree<S, P>(out: &mut String, session: &MetricsSession<S, P>, selection: &SelectionState)
where
    S: TelemetryStore + ?Sized,
    P: SelectionPersistence,
{
    if selection.application_id().is_none() {
        return;
    }
    let tree = session.instrument_tree();
    if tree.is_empty() {
        out.push_str("instruments: none\n");
        return;
    }

    out.push_str("instruments:\n");
    for group in tree {
        let meter_selected = selection.meter_name() == Some(group.meter.name.as_str())
            && selection.instrument_name().is_none();
        let _ = writeln!(out, "  {} {}", marker(meter_selected), group.meter.name);
        for instrument in group.instruments {
            let selected = selection.meter_name() == Some(group.meter.name.as_str())
                && selection.instrument_name() == Some(instrument.name.as_str());
            let _ = write!(
                out,
                "    {} {} [{}]",
                marker(selected),
                instrument.name,
                instrument.kind
            );
            if !instrument.unit.is_empty() {
                let _ = write!(out, " {}", instrument.unit);
            }
            out.push('\n');
        }
    }
}

fn marker(selected: bool) -> char {
    if selected {
        '>'
    } else {
        ' '
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mscope_core::telemetry::{InstrumentKind, InstrumentSummary, MeterSummary, MetricPoint};
    use mscope_session::SessionConfig;
    use mscope_store::{InMemoryTelemetryStore, MemorySelectionStore};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn parses_selection_commands() {
        assert_eq!(
            parse("app svc1").expect("app"),
            Some(ConsoleCommand::Application(Some("svc1".to_string())))
        );
        assert_eq!(
            parse("APP -").expect("clear app"),
            Some(ConsoleCommand::Application(None))
        );
        assert_eq!(
            parse("instrument http request.count").expect("instrument"),
            Some(ConsoleCommand::Tree(TreeSelection::Instrument {
                meter_name: "http".to_string(),
                instrument_name: "request.count".to_string(),
            }))
        );
        assert_eq!(
            parse("clear").expect("clear"),
            Some(ConsoleCommand::Tree(TreeSelection::None))
        );
        assert_eq!(parse("   ").expect("blank"), None);
    }

    #[test]
    fn duration_must_be_a_preset() {
        assert_eq!(
            parse("duration 60").expect("duration"),
            Some(ConsoleCommand::Duration(DurationPreset::resolve(Some(60))))
        );
        let err = parse("duration 7").expect_err("not a preset");
        assert!(matches!(err, CommandError::Duration(_, _)));
        assert!(err.to_string().contains("1440"));
    }

    #[test]
    fn go_parses_location() {
        assert_eq!(
            parse("go /metrics/svc1?duration=15").expect("go"),
            Some(ConsoleCommand::Go(Location {
                application_id: Some("svc1".to_string()),
                duration_minutes: Some(15),
                ..Location::default()
            }))
        );
        assert!(matches!(
            parse("go /traces"),
            Err(CommandError::Location(LocationError::NotMetrics(_)))
        ));
    }

    #[test]
    fn rejects_unknown_and_malformed_commands() {
        assert!(matches!(parse("zoom 2"), Err(CommandError::Unknown(_))));
        assert!(matches!(parse("meter"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("app a b"), Err(CommandError::Usage(_))));
    }

    #[test]
    fn view_shows_selected_instrument_window() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("timestamp");
        let store = Arc::new(InMemoryTelemetryStore::new());
        store.add_application("svc1", "Service One");
        let summary = InstrumentSummary {
            name: "request.count".to_string(),
            description: "Handled requests".to_string(),
            unit: "requests".to_string(),
            kind: InstrumentKind::Counter,
            meter: MeterSummary {
                name: "http".to_string(),
                version: Some("1.2".to_string()),
            },
        };
        let points = [30, 2, 1]
            .into_iter()
            .map(|minutes_ago| MetricPoint {
                timestamp: now - chrono::Duration::minutes(minutes_ago),
                value: f64::from(100 - minutes_ago as i32),
                attributes: BTreeMap::new(),
            })
            .collect();
        store.record("svc1", summary, points);

        let (mut session, _signals) = MetricsSession::start(
            store,
            MemorySelectionStore::new(),
            SessionConfig::default(),
        );
        let location =
            Location::parse("/metrics/svc1/meter/http/instrument/request.count").expect("location");
        session.apply_location(&location);

        let view = render_view(&session, &location, now);
        assert!(view.contains("service:    Service One (svc1)"));
        assert!(view.contains("duration:   Last 5 minutes"));
        assert!(view.contains("  > request.count [counter] requests"));
        assert!(view.contains("meter:      http 1.2"));
        assert!(view.contains("2 points in window, latest 99 requests at 11:59:00"));
    }

    #[test]
    fn view_without_selection_lists_services() {
        let store = Arc::new(InMemoryTelemetryStore::new());
        let (session, _signals) = MetricsSession::start(
            store,
            MemorySelectionStore::new(),
            SessionConfig::default(),
        );
        let view = render_view(&session, &Location::root(), Utc::now());
        assert!(view.contains("service:    Select service..."));
        assert!(view.contains("services:   none reported yet"));
        assert!(!view.contains("instruments"));
    }
}
