use anyhow::{Context, Result};
use tokio_serial::{SerialPortType, UsbPortInfo};
use tracing::info;

/// A serial port that heuristically matches a dev-board signature.
/// A match is a candidate only; it may still fail the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialEndpoint {
    pub port: String,
    pub description: String,
}

/// USB vendor ids we accept regardless of description text:
/// Espressif, QinHeng (CH34x), Silicon Labs (CP210x).
const KNOWN_VIDS: [u16; 3] = [0x303a, 0x1a86, 0x10c4];

pub fn discover_serial_endpoints(allowlist: &[String]) -> Result<Vec<SerialEndpoint>> {
    let ports = tokio_serial::available_ports().context("enumerate serial ports")?;

    let mut found = Vec::new();
    for p in ports {
        let (description, usb) = match &p.port_type {
            SerialPortType::UsbPort(info) => (usb_description(info), Some(info)),
            SerialPortType::PciPort => ("PCI serial".to_string(), None),
            SerialPortType::BluetoothPort => ("Bluetooth serial".to_string(), None),
            SerialPortType::Unknown => (String::new(), None),
        };
        info!("serial scan: {}: {}", p.port_name, description);

        if matches_allowlist(&description, allowlist)
            || usb.map(|u| KNOWN_VIDS.contains(&u.vid)).unwrap_or(false)
        {
            found.push(SerialEndpoint {
                port: p.port_name,
                description,
            });
        }
    }
    Ok(found)
}

pub fn matches_allowlist(description: &str, allowlist: &[String]) -> bool {
    let d = description.to_lowercase();
    allowlist.iter().any(|k| d.contains(&k.to_lowercase()))
}

fn usb_description(info: &UsbPortInfo) -> String {
    match (&info.manufacturer, &info.product) {
        (Some(m), Some(p)) => format!("{} {}", m, p),
        (None, Some(p)) => p.clone(),
        (Some(m), None) => m.clone(),
        (None, None) => format!("USB {:04x}:{:04x}", info.vid, info.pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_allowlist;

    #[test]
    fn allowlist_matches_are_case_insensitive() {
        let allow = default_allowlist();
        assert!(matches_allowlist("Espressif ESP32-S3", &allow));
        assert!(matches_allowlist("USB-SERIAL CH340", &allow));
        assert!(matches_allowlist("Silicon Labs CP2102N", &allow));
        assert!(matches_allowlist("XIAO Sense", &allow));
    }

    #[test]
    fn unrelated_descriptions_do_not_match() {
        let allow = default_allowlist();
        assert!(!matches_allowlist("Prolific PL2303 GPS puck", &allow));
        assert!(!matches_allowlist("", &allow));
    }
}
