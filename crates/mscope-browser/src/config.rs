use anyhow::Context;
use clap::Parser;
use mscope_core::location::Location;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mscope", about = "Browse live application metrics from a telemetry snapshot")]
pub struct Args {
    /// Telemetry snapshot file, reloaded whenever it changes.
    #[arg(long, env = "MSCOPE_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,
    /// Directory holding the persisted selection.
    #[arg(long, env = "MSCOPE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
    #[arg(long, default_value = "/metrics")]
    pub location: String,
    /// Start from `--location` and keep the selection in memory only.
    #[arg(long, default_value_t = false)]
    pub no_restore: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub snapshot: Option<PathBuf>,
    /// None keeps the selection in memory.
    pub state_dir: Option<PathBuf>,
    pub location: Location,
    pub restore: bool,
    pub debug: bool,
}

pub fn load_config() -> anyhow::Result<Config> {
    resolve(Args::parse())
}

pub fn resolve(args: Args) -> anyhow::Result<Config> {
    let location = Location::parse(&args.location)
        .with_context(|| format!("invalid --location {}", args.location))?;
    let state_dir = if args.no_restore {
        None
    } else {
        args.state_dir.or_else(default_state_dir)
    };
    Ok(Config {
        snapshot: args.snapshot,
        state_dir,
        location,
        restore: !args.no_restore,
        debug: args.debug || env_true("MSCOPE_DEBUG"),
    })
}

fn default_state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
        .map(|dir| dir.join("mscope"))
}

pub fn env_true(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let args = Args::try_parse_from(std::iter::once("mscope").chain(args.iter().copied()))
            .expect("args");
        resolve(args).expect("config")
    }

    #[test]
    fn explicit_state_dir_and_location() {
        let config = parse(&[
            "--state-dir",
            "/tmp/mscope-state",
            "--location",
            "/metrics/svc1?duration=60",
        ]);
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/mscope-state")));
        assert_eq!(config.location.application_id.as_deref(), Some("svc1"));
        assert_eq!(config.location.duration_minutes, Some(60));
        assert!(config.restore);
    }

    #[test]
    fn no_restore_drops_state_dir() {
        let config = parse(&["--state-dir", "/tmp/mscope-state", "--no-restore"]);
        assert!(config.state_dir.is_none());
        assert!(!config.restore);
        assert_eq!(config.location, Location::root());
    }

    #[test]
    fn location_outside_metrics_is_rejected() {
        let args = Args::try_parse_from(["mscope", "--location", "/logs/svc1"]).expect("args");
        assert!(resolve(args).is_err());
    }
}
