//! Simulated radio driver for bench runs and tests without a dongle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rand::Rng;
use tracing::{debug, info};

use crate::{RadioDriver, RadioEndpoint, RadioError, RadioEvent, RadioParam};

pub const SIM_URI: &str = "radio://0/80/2M/E7E7E7E7E7";

/// Knobs for fault injection. Defaults behave like a healthy quad on a bench.
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Report ConnectionFailed instead of Connected.
    pub refuse_connect: bool,
    /// Emit Disconnected this long after connecting (cable-pull simulation).
    pub drop_after: Option<Duration>,
    /// Battery voltage sample period.
    pub vbat_period: Duration,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            refuse_connect: false,
            drop_after: None,
            vbat_period: Duration::from_millis(500),
        }
    }
}

pub struct SimRadio {
    behavior: SimBehavior,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimRadio {
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl RadioDriver for SimRadio {
    fn scan(&mut self) -> Result<Vec<RadioEndpoint>, RadioError> {
        Ok(vec![RadioEndpoint { uri: SIM_URI.into() }])
    }

    fn open_link(&mut self, uri: &str, events: Sender<RadioEvent>) -> Result<(), RadioError> {
        self.close_link();
        self.stop = Arc::new(AtomicBool::new(false));

        let uri = uri.to_string();
        let stop = self.stop.clone();
        let behavior = self.behavior.clone();

        info!("sim radio: opening link {}", uri);
        self.worker = Some(std::thread::spawn(move || {
            if behavior.refuse_connect {
                let _ = events.send(RadioEvent::ConnectionFailed {
                    uri,
                    reason: "simulated refusal".into(),
                });
                return;
            }

            let _ = events.send(RadioEvent::Connected { uri: uri.clone() });
            let _ = events.send(RadioEvent::Param(RadioParam::FirmwareRevision(
                "2024.10-sim".into(),
            )));

            let opened = Instant::now();
            let mut rng = rand::thread_rng();
            while !stop.load(Ordering::Relaxed) {
                if let Some(after) = behavior.drop_after {
                    if opened.elapsed() >= after {
                        debug!("sim radio: injecting disconnect");
                        let _ = events.send(RadioEvent::Disconnected { uri: uri.clone() });
                        return;
                    }
                }
                let vbat: f32 = 3.9 + rng.gen_range(-0.15..0.15);
                if events
                    .send(RadioEvent::Param(RadioParam::BatteryVoltage(vbat)))
                    .is_err()
                {
                    // Consumer gone; nothing left to report to.
                    return;
                }
                std::thread::sleep(behavior.vbat_period);
            }
            let _ = events.send(RadioEvent::Disconnected { uri });
        }));
        Ok(())
    }

    fn close_link(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.close_link();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn sim_reports_connected_then_params() {
        let mut radio = SimRadio::new(SimBehavior {
            vbat_period: Duration::from_millis(10),
            ..Default::default()
        });
        let (tx, rx) = unbounded();
        radio.open_link(SIM_URI, tx).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first, RadioEvent::Connected { uri: SIM_URI.into() });

        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            second,
            RadioEvent::Param(RadioParam::FirmwareRevision(_))
        ));

        let third = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            third,
            RadioEvent::Param(RadioParam::BatteryVoltage(_))
        ));

        radio.close_link();
    }

    #[test]
    fn sim_refusal_reports_connection_failed() {
        let mut radio = SimRadio::new(SimBehavior {
            refuse_connect: true,
            ..Default::default()
        });
        let (tx, rx) = unbounded();
        radio.open_link(SIM_URI, tx).unwrap();

        let ev = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(ev, RadioEvent::ConnectionFailed { .. }));
    }

    #[test]
    fn close_link_is_idempotent() {
        let mut radio = SimRadio::new(SimBehavior::default());
        let (tx, _rx) = unbounded();
        radio.open_link(SIM_URI, tx).unwrap();
        radio.close_link();
        radio.close_link();
    }
}
