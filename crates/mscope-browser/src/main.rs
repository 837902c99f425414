mod config;
mod console;
mod watcher;

use anyhow::Result;
use chrono::Utc;
use config::Config;
use console::{CommandError, ConsoleCommand};
use mscope_core::location::Location;
use mscope_core::persisted::SelectionPersistence;
use mscope_session::{MetricsSession, SessionConfig, SessionError, SessionSignal};
use mscope_store::{load_snapshot, FileSelectionStore, InMemoryTelemetryStore, MemorySelectionStore};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Session<P> = MetricsSession<InMemoryTelemetryStore, P>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging(config.debug);

    let store = match &config.snapshot {
        Some(path) => InMemoryTelemetryStore::from_snapshot(&load_snapshot(path)?),
        None => InMemoryTelemetryStore::new(),
    };
    let store = Arc::new(store);
    let session_config = SessionConfig {
        restore_persisted: config.restore,
        ..SessionConfig::default()
    };

    match config.state_dir.clone() {
        Some(dir) => {
            info!(event = "selection_store", path = %dir.display());
            run(store, FileSelectionStore::new(dir), session_config, &config).await
        }
        None => run(store, MemorySelectionStore::new(), session_config, &config).await,
    }
}

async fn run<P: SelectionPersistence>(
    store: Arc<InMemoryTelemetryStore>,
    persistence: P,
    session_config: SessionConfig,
    config: &Config,
) -> Result<()> {
    let (mut session, mut signals) =
        MetricsSession::start(store.clone(), persistence, session_config);
    let mut location_bar = config.location.clone();
    session.apply_location(&location_bar);

    let (_watcher, mut reloads) = match &config.snapshot {
        Some(path) => watcher::setup_watcher(path),
        None => (None, None),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut redraw = true;
    let mut rendered = false;

    loop {
        redraw |= drain_signals(&mut session, &mut signals, &mut location_bar);
        if redraw {
            let view = console::render_view(&session, &location_bar, Utc::now());
            print(&mut stdout, &view).await?;
            redraw = false;
            if !rendered {
                // The persisted selection replays only once something is on screen.
                rendered = true;
                session.on_first_render();
                continue;
            }
        }

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match console::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Some(message) = execute(&mut session, &mut location_bar, command) {
                            print(&mut stdout, &message).await?;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => print(&mut stdout, &command_error(&err)).await?,
                }
            }
            Some(event) = session.next_event() => {
                session.handle_event(event);
            }
            reload = next_reload(&mut reloads) => match reload {
                Some(()) => reload_snapshot(&store, config),
                None => reloads = None,
            },
        }
    }

    session.shutdown();
    Ok(())
}

/// Applies queued session signals. Returns true when the view should be redrawn.
fn drain_signals<P: SelectionPersistence>(
    session: &mut Session<P>,
    signals: &mut mpsc::UnboundedReceiver<SessionSignal>,
    location_bar: &mut Location,
) -> bool {
    let mut redraw = false;
    while let Ok(signal) = signals.try_recv() {
        match signal {
            SessionSignal::Navigate(location) => {
                *location_bar = location;
                session.apply_location(location_bar);
            }
            SessionSignal::Refresh(reason) => {
                debug!(event = "view_refresh", reason = ?reason);
                redraw = true;
            }
        }
    }
    redraw
}

/// Runs one console command. Returns text to print, if any.
fn execute<P: SelectionPersistence>(
    session: &mut Session<P>,
    location_bar: &mut Location,
    command: ConsoleCommand,
) -> Option<String> {
    let committed = match command {
        ConsoleCommand::Application(id) => session.select_application(id.as_deref()),
        ConsoleCommand::Duration(duration) => session.select_duration(duration),
        ConsoleCommand::Tree(selection) => session.select_tree_item(&selection),
        ConsoleCommand::Go(location) => {
            *location_bar = location;
            if !session.apply_location(location_bar) {
                return Some(console::render_view(session, location_bar, Utc::now()));
            }
            return None;
        }
        ConsoleCommand::Show => {
            return Some(console::render_view(session, location_bar, Utc::now()));
        }
        ConsoleCommand::Help => return Some(console::HELP.to_string()),
        ConsoleCommand::Quit => return None,
    };

    match committed {
        Ok(location) => {
            debug!(event = "selection_committed", location = %location);
            None
        }
        Err(SessionError::Persist(err)) => {
            warn!(event = "selection_save_failed", error = %err);
            Some(format!("selection not saved: {err}"))
        }
        Err(SessionError::Closed) => Some("session closed".to_string()),
    }
}

fn command_error(err: &CommandError) -> String {
    format!("error: {err}")
}

async fn next_reload(reloads: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match reloads {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn reload_snapshot(store: &InMemoryTelemetryStore, config: &Config) {
    let Some(path) = &config.snapshot else {
        return;
    };
    match load_snapshot(path) {
        Ok(snapshot) => {
            let delta = store.apply_snapshot(&snapshot);
            info!(
                event = "snapshot_reloaded",
                applications_changed = delta.applications_changed,
                metrics_changed = delta.metrics_changed.len()
            );
        }
        Err(err) => {
            warn!(event = "snapshot_reload_failed", error = %err);
        }
    }
}

async fn print(stdout: &mut Stdout, text: &str) -> io::Result<()> {
    stdout.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if debug {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else if config::env_true("MSCOPE_LOG_STDOUT") {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mscope_core::persisted::{PersistedSelection, SELECTION_KEY};

    #[test]
    fn persisted_selection_waits_for_first_render() {
        let store = Arc::new(InMemoryTelemetryStore::new());
        store.add_application("svc1", "Service One");
        let persistence = MemorySelectionStore::new();
        persistence
            .save(
                SELECTION_KEY,
                &PersistedSelection {
                    application_id: Some("svc1".to_string()),
                    meter_name: None,
                    instrument_name: None,
                    duration_minutes: 60,
                },
            )
            .expect("seed record");
        let (mut session, mut signals) =
            MetricsSession::start(store, persistence, SessionConfig::default());
        let mut location_bar = Location::root();
        session.apply_location(&location_bar);

        assert!(drain_signals(&mut session, &mut signals, &mut location_bar));
        assert_eq!(location_bar, Location::root());

        let view = console::render_view(&session, &location_bar, Utc::now());
        assert!(view.contains("location:   /metrics\n"));
        session.on_first_render();

        assert!(drain_signals(&mut session, &mut signals, &mut location_bar));
        assert_eq!(location_bar.to_string(), "/metrics/svc1?duration=60");
        assert_eq!(session.selected_application().id.as_deref(), Some("svc1"));
    }
}
