//! Command types sent from API handlers to the governor task.
//!
//! Each command carries a oneshot reply channel so the handler can
//! await the result and translate it into an HTTP response.

use tokio::sync::oneshot;

use crate::thermal::{ConfigError, ConfigPatch, Mode, ThermalConfig};

/// Commands to the poller that owns the governor.
#[derive(Debug)]
pub enum GovernorCommand {
    /// Turn the governor on or off. Off restores the pre-throttle ceiling.
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<Mode>,
    },

    /// Enter or leave the low-power state in which polling stops.
    SetSuspended {
        suspended: bool,
        reply: oneshot::Sender<Mode>,
    },

    /// Another actor wrote the frequency ceiling.
    MarkExternalChange { reply: oneshot::Sender<()> },

    /// Validate and apply configuration changes as one unit.
    UpdateConfig {
        patch: ConfigPatch,
        reply: oneshot::Sender<Result<ThermalConfig, ConfigError>>,
    },
}
