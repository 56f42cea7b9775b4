use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use deckmon_radio::{RadioDriver, RadioEndpoint, RadioEvent, RadioParam};
use deckmon_serial::discover::SerialEndpoint;
use deckmon_serial::link::{SerialLink, TransportOpener};
use deckmon_serial::wire::{self, DeviceCommand, DeviceLine};

use crate::{CommandResult, FailReason, MonitorTiming};
use crate::status::ConnectionStatus;

/// Owns both links' lifecycle and the shared status record. All transport
/// errors stop at this boundary as false/failed returns plus a log line;
/// only radio driver init (done by the caller) can abort a session.
pub struct ConnectionMonitor {
    status: Arc<Mutex<ConnectionStatus>>,
    radio: Box<dyn RadioDriver>,
    events_tx: Sender<RadioEvent>,
    events_rx: Receiver<RadioEvent>,
    serial: Option<SerialLink>,
    opener: Box<dyn TransportOpener>,
    timing: MonitorTiming,
}

impl ConnectionMonitor {
    pub fn new(
        radio: Box<dyn RadioDriver>,
        opener: Box<dyn TransportOpener>,
        timing: MonitorTiming,
    ) -> Self {
        let (events_tx, events_rx) = bounded(64);
        Self {
            status: Arc::new(Mutex::new(ConnectionStatus::default())),
            radio,
            events_tx,
            events_rx,
            serial: None,
            opener,
            timing,
        }
    }

    /// Handle for readers (the CLI status line); the monitor keeps its own.
    pub fn status_handle(&self) -> Arc<Mutex<ConnectionStatus>> {
        self.status.clone()
    }

    pub fn status_snapshot(&self) -> ConnectionStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn scan_radio(&mut self) -> Result<Vec<RadioEndpoint>, deckmon_radio::RadioError> {
        self.radio.scan()
    }

    /// Bounded wait for the driver's Connected/ConnectionFailed notification.
    /// Timeout or failure leaves the link Disconnected and returns false.
    pub fn connect_radio(&mut self, endpoint: &RadioEndpoint) -> bool {
        info!("connecting radio {}", endpoint.uri);
        if let Err(e) = self.radio.open_link(&endpoint.uri, self.events_tx.clone()) {
            warn!("radio open failed: {e}");
            return false;
        }

        let deadline = Instant::now() + self.timing.radio_connect;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(remaining) {
                Ok(ev) => {
                    let verdict = match &ev {
                        RadioEvent::Connected { uri } => {
                            info!("radio connected: {uri}");
                            Some(true)
                        }
                        RadioEvent::ConnectionFailed { uri, reason } => {
                            warn!("radio connection failed: {uri} - {reason}");
                            Some(false)
                        }
                        _ => None,
                    };
                    self.apply_radio_event(ev);
                    if let Some(ok) = verdict {
                        return ok;
                    }
                }
                Err(_) => {
                    warn!(
                        "radio connect timed out after {:?}",
                        self.timing.radio_connect
                    );
                    self.radio.close_link();
                    return false;
                }
            }
        }
    }

    /// Open-then-probe. True only when the port opened AND the firmware
    /// answered PING; a dead probe closes the port before returning.
    pub fn connect_serial(&mut self, endpoint: &SerialEndpoint, baud: u32) -> bool {
        info!("connecting serial {} @ {}", endpoint.port, baud);
        match SerialLink::open_probed(
            self.opener.as_ref(),
            &endpoint.port,
            baud,
            self.timing.serial_probe,
        ) {
            Ok(link) => {
                self.serial = Some(link);
                let mut st = self.status.lock().unwrap();
                st.set_serial_connected(true);
                // The probe itself was a round trip.
                st.mark_traffic();
                info!("serial connected: {}", endpoint.port);
                true
            }
            Err(e) => {
                warn!("serial connect failed: {e}");
                false
            }
        }
    }

    /// Fire-and-forget write of `cmd` plus terminator. The liveness probe in
    /// `connect_serial` is the only path that waits for a reply.
    pub fn send_command(&mut self, cmd: &str) -> CommandResult {
        let Some(link) = self.serial.as_mut() else {
            warn!("send_command({cmd}): serial not connected");
            return CommandResult::failed(FailReason::NotConnected);
        };
        match link.send_line(cmd.trim()) {
            Ok(()) => {
                info!("sent command: {}", cmd.trim());
                CommandResult::ok(None)
            }
            Err(e) => {
                warn!("serial write failed, dropping link: {e}");
                self.drop_serial();
                CommandResult::failed(FailReason::TransportIo)
            }
        }
    }

    /// One unit of poll work; never blocks. Drains buffered serial lines,
    /// then queued radio events. Nothing pending means nothing changes.
    pub fn poll_once(&mut self) {
        if let Some(link) = self.serial.as_mut() {
            match link.drain_lines() {
                Ok(lines) if !lines.is_empty() => {
                    let mut st = self.status.lock().unwrap();
                    st.mark_traffic();
                    for line in &lines {
                        debug!("device: {line}");
                        match wire::parse_line(line) {
                            DeviceLine::Status {
                                uptime_ms,
                                free_heap,
                                power_pin_raw,
                                ..
                            } => {
                                st.last_uptime_ms = Some(uptime_ms);
                                st.last_free_heap = Some(free_heap);
                                st.last_power_pin_raw = Some(power_pin_raw);
                            }
                            DeviceLine::Heartbeat { uptime_ms, free_heap } => {
                                st.last_uptime_ms = Some(uptime_ms);
                                st.last_free_heap = Some(free_heap);
                            }
                            DeviceLine::PowerTestSample { power_pin, .. } => {
                                st.last_power_pin_raw = Some(power_pin);
                            }
                            DeviceLine::UnknownCommand(tok) => {
                                warn!("device rejected command: {tok}");
                            }
                            _ => {}
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("serial read failed, dropping link: {e}");
                    self.drop_serial();
                }
            }
        }

        while let Ok(ev) = self.events_rx.try_recv() {
            self.apply_radio_event(ev);
        }
    }

    /// Connectivity smoke test, not a power measurement: send POWER_TEST,
    /// then report whether a battery-voltage sample is observable at all
    /// after a short settle.
    pub fn test_power_connection(&mut self) -> bool {
        let (radio_up, serial_up) = {
            let st = self.status.lock().unwrap();
            (st.radio_connected, st.serial_connected)
        };
        if !radio_up {
            warn!("cannot test power: radio not connected");
            return false;
        }
        if !serial_up {
            warn!("cannot test power: serial not connected");
            return false;
        }

        let before = self.status.lock().unwrap().last_battery_voltage;
        if !self.send_command(DeviceCommand::PowerTest.as_str()).succeeded {
            return false;
        }

        let deadline = Instant::now() + self.timing.power_settle;
        while Instant::now() < deadline {
            self.poll_once();
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        match self.status.lock().unwrap().last_battery_voltage {
            Some(after) => {
                info!("power test: vbat {:?} -> {:.2}V", before, after);
                true
            }
            None => {
                warn!("power test: no battery voltage sample observed");
                false
            }
        }
    }

    /// Close both links; safe to call repeatedly or on never-opened links.
    pub fn shutdown(&mut self) {
        info!("shutting down links");
        self.drop_serial();
        self.radio.close_link();
        self.status.lock().unwrap().set_radio_connected(false);
    }

    fn drop_serial(&mut self) {
        if self.serial.take().is_some() {
            info!("serial link closed");
        }
        self.status.lock().unwrap().set_serial_connected(false);
    }

    fn apply_radio_event(&mut self, ev: RadioEvent) {
        let mut st = self.status.lock().unwrap();
        match ev {
            RadioEvent::Connected { .. } => st.set_radio_connected(true),
            RadioEvent::ConnectionFailed { .. } | RadioEvent::Disconnected { .. } => {
                st.set_radio_connected(false)
            }
            RadioEvent::Param(p) => {
                // Late queued samples after a drop must not repopulate fields.
                if st.radio_connected {
                    match p {
                        RadioParam::FirmwareRevision(v) => {
                            info!("firmware revision: {v}");
                            st.last_firmware_version = Some(v);
                        }
                        RadioParam::BatteryVoltage(v) => {
                            debug!("battery voltage: {v:.2}V");
                            st.last_battery_voltage = Some(v);
                        }
                    }
                }
            }
        }
    }
}
