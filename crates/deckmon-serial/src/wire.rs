//! The bare-text line protocol spoken by the dev-board firmware.
//! Newline-terminated ASCII, no framing, no checksum, 115200 baud.

/// Command keywords the firmware dispatches on (case-insensitive there;
/// we always send the canonical upper-case form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Ping,
    PowerTest,
    StopPowerTest,
    Status,
    Heartbeat,
    LedOn,
    LedOff,
    Blink,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 8] = [
        DeviceCommand::Ping,
        DeviceCommand::PowerTest,
        DeviceCommand::StopPowerTest,
        DeviceCommand::Status,
        DeviceCommand::Heartbeat,
        DeviceCommand::LedOn,
        DeviceCommand::LedOff,
        DeviceCommand::Blink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceCommand::Ping => "PING",
            DeviceCommand::PowerTest => "POWER_TEST",
            DeviceCommand::StopPowerTest => "STOP_POWER_TEST",
            DeviceCommand::Status => "STATUS",
            DeviceCommand::Heartbeat => "HEARTBEAT",
            DeviceCommand::LedOn => "LED_ON",
            DeviceCommand::LedOff => "LED_OFF",
            DeviceCommand::Blink => "BLINK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_uppercase();
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// A line received from the firmware, decoded as far as we understand it.
/// Anything unrecognized is still traffic (`Ack`) and counts as liveness.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceLine {
    Pong,
    Status {
        uptime_ms: u64,
        free_heap: u64,
        power_pin_raw: u32,
        led_on: bool,
        power_test_on: bool,
    },
    Heartbeat {
        uptime_ms: u64,
        free_heap: u64,
    },
    PowerTestSample {
        led_on: bool,
        power_pin: u32,
    },
    EnteringPowerTest,
    ExitingPowerTest,
    UnknownCommand(String),
    Ack(String),
}

pub fn parse_line(line: &str) -> DeviceLine {
    let line = line.trim();

    if line.eq_ignore_ascii_case("PONG") {
        return DeviceLine::Pong;
    }
    if line.eq_ignore_ascii_case("Entering power test mode") {
        return DeviceLine::EnteringPowerTest;
    }
    if line.eq_ignore_ascii_case("Exiting power test mode") {
        return DeviceLine::ExitingPowerTest;
    }
    if let Some(tok) = line.strip_prefix("Unknown command: ") {
        return DeviceLine::UnknownCommand(tok.to_string());
    }

    if let Some(rest) = line.strip_prefix("STATUS:") {
        if let Some(parsed) = parse_status(rest) {
            return parsed;
        }
    }
    if let Some(rest) = line.strip_prefix("HEARTBEAT:") {
        if let Some(parsed) = parse_heartbeat(rest) {
            return parsed;
        }
    }
    if let Some(rest) = line.strip_prefix("POWER_TEST:") {
        if let Some(parsed) = parse_power_sample(rest) {
            return parsed;
        }
    }

    // Recognized prefix with mangled fields degrades to Ack rather than
    // erroring; the firmware is allowed to be sloppy.
    DeviceLine::Ack(line.to_string())
}

fn field<'a>(rest: &'a str, key: &str) -> Option<&'a str> {
    rest.split_whitespace()
        .find_map(|kv| kv.strip_prefix(key).and_then(|v| v.strip_prefix('=')))
}

fn parse_status(rest: &str) -> Option<DeviceLine> {
    Some(DeviceLine::Status {
        uptime_ms: field(rest, "UPTIME")?.parse().ok()?,
        free_heap: field(rest, "FREE_HEAP")?.parse().ok()?,
        power_pin_raw: field(rest, "POWER_PIN")?.parse().ok()?,
        led_on: field(rest, "LED")? == "1",
        power_test_on: field(rest, "POWER_TEST")?.eq_ignore_ascii_case("ON"),
    })
}

fn parse_heartbeat(rest: &str) -> Option<DeviceLine> {
    Some(DeviceLine::Heartbeat {
        uptime_ms: field(rest, "UPTIME")?.parse().ok()?,
        free_heap: field(rest, "FREE_HEAP")?.parse().ok()?,
    })
}

fn parse_power_sample(rest: &str) -> Option<DeviceLine> {
    Some(DeviceLine::PowerTestSample {
        led_on: field(rest, "LED")?.eq_ignore_ascii_case("ON"),
        power_pin: field(rest, "POWER_PIN")?.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_table_round_trips() {
        for c in DeviceCommand::ALL {
            assert_eq!(DeviceCommand::parse(c.as_str()), Some(c));
        }
        assert_eq!(DeviceCommand::parse("ping"), Some(DeviceCommand::Ping));
        assert_eq!(DeviceCommand::parse(" led_on "), Some(DeviceCommand::LedOn));
        assert_eq!(DeviceCommand::parse("WARP_DRIVE"), None);
    }

    #[test]
    fn parses_pong_case_insensitively() {
        assert_eq!(parse_line("PONG"), DeviceLine::Pong);
        assert_eq!(parse_line("pong\r"), DeviceLine::Pong);
    }

    #[test]
    fn parses_status_line() {
        let l = parse_line("STATUS: UPTIME=123456 FREE_HEAP=204800 POWER_PIN=2048 LED=1 POWER_TEST=OFF");
        assert_eq!(
            l,
            DeviceLine::Status {
                uptime_ms: 123_456,
                free_heap: 204_800,
                power_pin_raw: 2048,
                led_on: true,
                power_test_on: false,
            }
        );
    }

    #[test]
    fn parses_heartbeat_and_power_sample() {
        assert_eq!(
            parse_line("HEARTBEAT: UPTIME=5000 FREE_HEAP=190000"),
            DeviceLine::Heartbeat { uptime_ms: 5000, free_heap: 190_000 }
        );
        assert_eq!(
            parse_line("POWER_TEST: LED=ON POWER_PIN=1890"),
            DeviceLine::PowerTestSample { led_on: true, power_pin: 1890 }
        );
    }

    #[test]
    fn mode_transitions_and_unknown_command() {
        assert_eq!(parse_line("Entering power test mode"), DeviceLine::EnteringPowerTest);
        assert_eq!(parse_line("Exiting power test mode"), DeviceLine::ExitingPowerTest);
        assert_eq!(
            parse_line("Unknown command: WARP_DRIVE"),
            DeviceLine::UnknownCommand("WARP_DRIVE".into())
        );
    }

    #[test]
    fn mangled_fields_degrade_to_ack() {
        let l = parse_line("STATUS: UPTIME=abc FREE_HEAP=1 POWER_PIN=1 LED=1 POWER_TEST=ON");
        assert!(matches!(l, DeviceLine::Ack(_)));
        assert!(matches!(parse_line("LED is now ON"), DeviceLine::Ack(_)));
    }
}
