use mscope_core::telemetry::{InstrumentKind, MetricPoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Telemetry as written to a snapshot file: applications, their meters and instruments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    #[serde(default)]
    pub applications: Vec<ApplicationSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meters: Vec<MeterSnapshot>,
}

impl ApplicationSnapshot {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub instruments: Vec<InstrumentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub kind: InstrumentKind,
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

pub fn load_snapshot(path: impl AsRef<Path>) -> Result<TelemetrySnapshot, SnapshotError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(TelemetrySnapshot::default());
    }
    serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_nested_snapshot() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "applications": [{{
                    "id": "svc1",
                    "name": "Service One",
                    "meters": [{{
                        "name": "http",
                        "instruments": [{{
                            "name": "request.count",
                            "kind": "counter",
                            "unit": "{{request}}",
                            "points": [{{"timestamp": "2026-03-01T12:00:00Z", "value": 3.0}}]
                        }}]
                    }}]
                }}]
            }}"#
        )
        .expect("write snapshot");

        let snapshot = load_snapshot(file.path()).expect("load");
        let app = &snapshot.applications[0];
        assert_eq!(app.display_name(), "Service One");
        let instrument = &app.meters[0].instruments[0];
        assert_eq!(instrument.unit, "{request}");
        assert_eq!(instrument.points.len(), 1);
    }

    #[test]
    fn empty_file_is_empty_snapshot() {
        let file = NamedTempFile::new().expect("temp file");
        let snapshot = load_snapshot(file.path()).expect("load");
        assert!(snapshot.applications.is_empty());
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, "{{not json").expect("write");
        let err = load_snapshot(file.path()).expect_err("must fail");
        assert!(matches!(err, SnapshotError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn unnamed_application_displays_id() {
        let app = ApplicationSnapshot {
            id: "svc2".to_string(),
            name: None,
            meters: Vec::new(),
        };
        assert_eq!(app.display_name(), "svc2");
    }
}
