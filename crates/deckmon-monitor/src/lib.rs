pub mod monitor;
pub mod status;

use std::time::Duration;

use serde::Deserialize;

pub use monitor::ConnectionMonitor;
pub use status::ConnectionStatus;

/// Why a command-surface call failed. Everything here is recoverable; the
/// operator can reconnect and retry. The one fatal error class, radio driver
/// init, is `deckmon_radio::RadioError::DriverInit` and never reaches here.
/// Connect timeouts are not listed: the connect calls return plain `false`
/// per their contract, so a timeout never rides in a `CommandResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Operation needs a link that is not in the Connected state.
    NotConnected,
    /// Underlying read/write failed; the link has been downgraded.
    TransportIo,
}

/// Result of a command-surface call, returned synchronously.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub succeeded: bool,
    pub response: Option<String>,
    pub error: Option<FailReason>,
}

impl CommandResult {
    pub fn ok(response: Option<String>) -> Self {
        Self { succeeded: true, response, error: None }
    }

    pub fn failed(reason: FailReason) -> Self {
        Self { succeeded: false, response: None, error: Some(reason) }
    }
}

/// Bounded waits and the poll cadence. All human-observable; nothing here
/// is performance-sensitive.
#[derive(Debug, Clone)]
pub struct MonitorTiming {
    pub radio_connect: Duration,
    pub serial_probe: Duration,
    pub power_settle: Duration,
    pub poll_period: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            radio_connect: Duration::from_secs(10),
            serial_probe: Duration::from_secs(1),
            power_settle: Duration::from_secs(1),
            poll_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub poll_period_ms: Option<u64>,
    pub power_settle_ms: Option<u64>,
}
