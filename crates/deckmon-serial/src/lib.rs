pub mod discover;
pub mod doctor;
pub mod link;
pub mod wire;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// When set, skip discovery and use this port directly.
    pub port: Option<String>,

    pub baud: u32,

    /// Substrings matched case-insensitively against port descriptions.
    /// Defaults cover the usual dev-board bridges (esp32, xiao, ch340, cp210).
    pub allowlist: Option<Vec<String>>,

    /// Bounded wait for the PONG reply during connect.
    pub probe_timeout_ms: Option<u64>,
}

pub fn default_allowlist() -> Vec<String> {
    vec!["esp32".into(), "xiao".into(), "ch340".into(), "cp210".into()]
}

pub const DEFAULT_BAUD: u32 = 115_200;
