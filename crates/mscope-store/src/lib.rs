mod memory;
mod selection;
mod snapshot;

pub use memory::{InMemoryTelemetryStore, SnapshotDelta};
pub use selection::{FileSelectionStore, MemorySelectionStore, SELECTION_FILE_NAME};
pub use snapshot::{
    load_snapshot, ApplicationSnapshot, InstrumentSnapshot, MeterSnapshot, SnapshotError,
    TelemetrySnapshot,
};
