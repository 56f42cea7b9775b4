pub mod sim;

use crossbeam_channel::Sender;
use serde::Deserialize;
use thiserror::Error;

/// A radio endpoint found by a scan. Opaque connection address, e.g.
/// `radio://0/80/2M/E7E7E7E7E7`. Produced fresh on every scan, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioEndpoint {
    pub uri: String,
}

/// Named parameters the monitor subscribes to on the quad side.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioParam {
    FirmwareRevision(String),
    BatteryVoltage(f32),
}

/// Notifications a driver delivers from its own thread(s). The supervisor
/// drains these from a queue; drivers never touch supervisor state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Connected { uri: String },
    ConnectionFailed { uri: String, reason: String },
    Disconnected { uri: String },
    Param(RadioParam),
}

#[derive(Debug, Error)]
pub enum RadioError {
    /// Driver subsystem could not come up at all (missing dongle driver etc).
    /// The one fatal startup error; everything else is recoverable.
    #[error("radio driver init failed: {0}")]
    DriverInit(String),
    /// Enumeration failed mid-call. The sim driver never produces this;
    /// hardware backends (USB dongle walks) can.
    #[error("radio scan failed: {0}")]
    Scan(String),
    /// The open request itself failed, before any Connected/ConnectionFailed
    /// notification could be delivered.
    #[error("radio link open failed ({uri}): {reason}")]
    LinkOpen { uri: String, reason: String },
}

/// Seam for the vendor radio library. `close_link` must be idempotent:
/// the monitor calls it on shutdown regardless of link state.
pub trait RadioDriver: Send {
    fn scan(&mut self) -> Result<Vec<RadioEndpoint>, RadioError>;

    /// Request a link open. Completion is reported asynchronously on `events`
    /// as `Connected` or `ConnectionFailed`; the caller owns the bounded wait.
    fn open_link(&mut self, uri: &str, events: Sender<RadioEvent>) -> Result<(), RadioError>;

    fn close_link(&mut self);
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    /// Driver backend. "sim" is the built-in bench driver; a hardware dongle
    /// driver plugs in through the same trait.
    pub driver: String,

    /// When set, skip scanning and connect straight to this address.
    pub uri: Option<String>,

    /// Bounded wait for the Connected/ConnectionFailed notification.
    pub connect_timeout_ms: Option<u64>,
}
