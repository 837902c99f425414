mod controller;
mod subscription;

pub use controller::{MetricsSession, SessionConfig, SessionError};
pub use subscription::{MetricsSubscriptionManager, Rebind};

use mscope_core::location::Location;

/// Store change notifications, delivered into a session's serialized update path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    NewApplications,
    NewMetrics { application_id: String },
}

/// Why a session asks its host to redraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Applications,
    Instruments,
    Selection,
}

/// Outbound requests from a session to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// The host should move its location bar here and feed the location back through
    /// `MetricsSession::apply_location`.
    Navigate(Location),
    Refresh(RefreshReason),
}
