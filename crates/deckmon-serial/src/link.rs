use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

/// Narrow view of a serial port: just what the link needs, so tests can
/// substitute an in-memory peer.
pub trait SerialTransport: Send {
    fn bytes_to_read(&mut self) -> io::Result<u32>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}

pub trait TransportOpener: Send + Sync {
    fn open(&self, port: &str, baud: u32, timeout: Duration)
        -> io::Result<Box<dyn SerialTransport>>;
}

/// Opens real OS ports. The read timeout doubles as the probe wait quantum.
pub struct SystemOpener;

impl TransportOpener for SystemOpener {
    fn open(
        &self,
        port: &str,
        baud: u32,
        timeout: Duration,
    ) -> io::Result<Box<dyn SerialTransport>> {
        let port = tokio_serial::new(port, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(SystemTransport { port }))
    }
}

struct SystemTransport {
    port: Box<dyn tokio_serial::SerialPort>,
}

impl SerialTransport for SystemTransport {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, buf)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: io::Error,
    },
    /// Port opened but never answered PING. Whatever is on the other end is
    /// not the expected firmware.
    #[error("no PONG from {port} within {timeout_ms}ms")]
    Timeout { port: String, timeout_ms: u64 },
    #[error("probe i/o on {port}: {source}")]
    Io {
        port: String,
        #[source]
        source: io::Error,
    },
}

/// Line-oriented serial link to the dev board. Exists only in the probed
/// state: construction fails unless the firmware answered the liveness PING,
/// and a failed probe drops the transport so nothing stays open.
pub struct SerialLink {
    transport: Box<dyn SerialTransport>,
    port: String,
    rx_buf: Vec<u8>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port", &self.port)
            .field("rx_buf", &self.rx_buf)
            .finish_non_exhaustive()
    }
}

// Partial-line carry-over cap; a device spewing garbage without newlines
// should not grow the buffer unbounded.
const RX_BUF_CAP: usize = 4096;

impl SerialLink {
    pub fn open_probed(
        opener: &dyn TransportOpener,
        port: &str,
        baud: u32,
        probe_timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let transport = opener
            .open(port, baud, probe_timeout)
            .map_err(|source| ProbeError::Open { port: port.into(), source })?;

        let mut link = Self {
            transport,
            port: port.to_string(),
            rx_buf: Vec::new(),
        };

        link.send_line("PING").map_err(|source| ProbeError::Io {
            port: link.port.clone(),
            source,
        })?;

        let deadline = Instant::now() + probe_timeout;
        loop {
            let lines = link.drain_lines().map_err(|source| ProbeError::Io {
                port: link.port.clone(),
                source,
            })?;
            for l in &lines {
                debug!("probe {}: {}", link.port, l);
                if l.trim().eq_ignore_ascii_case("PONG") {
                    return Ok(link);
                }
            }
            if Instant::now() >= deadline {
                // Dropping `link` here closes the transport.
                warn!("liveness probe timed out on {}", link.port);
                return Err(ProbeError::Timeout {
                    port: link.port.clone(),
                    timeout_ms: probe_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Fire-and-forget: appends the newline terminator, no reply wait.
    pub fn send_line(&mut self, cmd: &str) -> io::Result<()> {
        self.transport.write_all(cmd.as_bytes())?;
        self.transport.write_all(b"\n")
    }

    /// Non-blocking drain of buffered input; returns any complete lines.
    /// Reads only while the transport reports pending bytes.
    pub fn drain_lines(&mut self) -> io::Result<Vec<String>> {
        let mut chunk = [0u8; 256];
        while self.transport.bytes_to_read()? > 0 {
            let n = self.transport.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.rx_buf.extend_from_slice(&chunk[..n]);
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.rx_buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.rx_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(&['\n', '\r'][..])
                .to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        if self.rx_buf.len() > RX_BUF_CAP {
            warn!("{}: discarding {} unterminated bytes", self.port, self.rx_buf.len());
            self.rx_buf.clear();
        }
        Ok(lines)
    }
}

/// In-memory transport pair for tests and bench runs without hardware.
pub mod testutil {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared handles into a [`FakePort`], kept by the test after the
    /// transport itself is boxed away.
    #[derive(Clone, Default)]
    pub struct FakePeer {
        pub rx: Arc<Mutex<VecDeque<u8>>>,   // device -> host
        pub written: Arc<Mutex<Vec<u8>>>,   // host -> device
        pub closed: Arc<AtomicBool>,
        pub pong_on_ping: Arc<AtomicBool>,
        /// Fail subsequent writes (device yanked mid-session).
        pub fail_writes: Arc<AtomicBool>,
        /// Fail subsequent reads.
        pub fail_reads: Arc<AtomicBool>,
    }

    impl FakePeer {
        pub fn answering() -> Self {
            let peer = Self::default();
            peer.pong_on_ping.store(true, Ordering::Relaxed);
            peer
        }

        pub fn push_line(&self, line: &str) {
            let mut rx = self.rx.lock().unwrap();
            rx.extend(line.as_bytes());
            rx.push_back(b'\n');
        }

        pub fn written_text(&self) -> String {
            String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
        }
    }

    pub struct FakePort {
        pub peer: FakePeer,
    }

    impl Drop for FakePort {
        fn drop(&mut self) {
            self.peer.closed.store(true, Ordering::Relaxed);
        }
    }

    impl SerialTransport for FakePort {
        fn bytes_to_read(&mut self) -> io::Result<u32> {
            if self.peer.fail_reads.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            }
            Ok(self.peer.rx.lock().unwrap().len() as u32)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.peer.fail_reads.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            }
            let mut rx = self.peer.rx.lock().unwrap();
            let mut n = 0;
            while n < buf.len() {
                match rx.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            if self.peer.fail_writes.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            }
            self.peer.written.lock().unwrap().extend_from_slice(buf);
            if self.peer.pong_on_ping.load(Ordering::Relaxed) {
                let text = self.peer.written_text();
                if text.to_uppercase().contains("PING\n") {
                    self.peer.pong_on_ping.store(false, Ordering::Relaxed);
                    self.peer.push_line("PONG");
                }
            }
            Ok(())
        }
    }

    pub struct FakeOpener {
        pub peer: FakePeer,
        /// Refuse the open itself (port busy / missing).
        pub fail_open: bool,
    }

    impl TransportOpener for FakeOpener {
        fn open(
            &self,
            _port: &str,
            _baud: u32,
            _timeout: Duration,
        ) -> io::Result<Box<dyn SerialTransport>> {
            if self.fail_open {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            Ok(Box::new(FakePort { peer: self.peer.clone() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{FakeOpener, FakePeer};
    use super::*;
    use std::sync::atomic::Ordering;

    const PROBE: Duration = Duration::from_millis(50);

    #[test]
    fn probe_succeeds_when_peer_answers_pong() {
        let peer = FakePeer::answering();
        let opener = FakeOpener { peer: peer.clone(), fail_open: false };

        let link = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap();
        assert_eq!(link.port(), "FAKE0");
        assert!(peer.written_text().starts_with("PING\n"));
    }

    #[test]
    fn probe_timeout_closes_the_transport() {
        let peer = FakePeer::default(); // never answers
        let opener = FakeOpener { peer: peer.clone(), fail_open: false };

        let err = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(peer.closed.load(Ordering::Relaxed), "transport leaked after failed probe");
    }

    #[test]
    fn failed_open_is_reported_as_open_error() {
        let opener = FakeOpener { peer: FakePeer::default(), fail_open: true };
        let err = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
    }

    #[test]
    fn drain_lines_splits_and_keeps_partials() {
        let peer = FakePeer::answering();
        let opener = FakeOpener { peer: peer.clone(), fail_open: false };
        let mut link = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap();

        peer.push_line("HEARTBEAT: UPTIME=1000 FREE_HEAP=200000");
        peer.rx.lock().unwrap().extend(b"PARTIAL".iter());

        let lines = link.drain_lines().unwrap();
        assert_eq!(lines, vec!["HEARTBEAT: UPTIME=1000 FREE_HEAP=200000"]);

        // Completing the partial line yields it on the next drain.
        peer.rx.lock().unwrap().push_back(b'\n');
        let lines = link.drain_lines().unwrap();
        assert_eq!(lines, vec!["PARTIAL"]);
    }

    #[test]
    fn drain_propagates_device_loss() {
        let peer = FakePeer::answering();
        let opener = FakeOpener { peer: peer.clone(), fail_open: false };
        let mut link = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap();

        peer.fail_reads.store(true, Ordering::Relaxed);
        assert!(link.drain_lines().is_err());
    }

    #[test]
    fn drain_with_nothing_pending_returns_empty() {
        let peer = FakePeer::answering();
        let opener = FakeOpener { peer: peer.clone(), fail_open: false };
        let mut link = SerialLink::open_probed(&opener, "FAKE0", 115_200, PROBE).unwrap();
        assert!(link.drain_lines().unwrap().is_empty());
    }
}
