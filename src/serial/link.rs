//! # Link Module
//!
//! The byte-stream link abstraction the connection engine talks to.
//!
//! A [`Link`] is a small capability surface: a read bounded by a timeout, a
//! write, and a close. The reader thread calls [`Link::read`] while the
//! consumer thread calls [`Link::write`], so implementations serialize the two
//! directions independently. [`SerialLink`] drives a real serial port through
//! `tokio-serial`; [`crate::serial::loopback::LoopbackLink`] is the in-memory
//! stand-in used by tests and the `--loopback` console mode.

use log::{error, info, warn};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_serial::{FlowControl, SerialPort, available_ports};

use crate::error::LinkError;
use crate::serial::port::ConnectionProfile;

/// Result of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived before the timeout.
    Data(Vec<u8>),
    /// Nothing arrived within the timeout.
    TimedOut,
}

/// An open, bidirectional byte-stream connection to a device.
#[cfg_attr(test, mockall::automock)]
pub trait Link: Send + Sync {
    /// Reads at most `max_len` bytes, returning after `timeout` at the latest.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<ReadOutcome, LinkError>;

    /// Writes `data`, returning the number of bytes accepted.
    fn write(&self, data: &[u8]) -> Result<usize, LinkError>;

    /// Closes the link. Later reads and writes fail with [`LinkError::Closed`].
    fn close(&self);
}

/// Opens links for the controller.
#[cfg_attr(test, mockall::automock)]
pub trait Connector: Send {
    fn open(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Link>, LinkError>;
}

impl<C: Connector + Sync> Connector for Arc<C> {
    fn open(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Link>, LinkError> {
        self.as_ref().open(profile)
    }
}

/// A serial port opened with `tokio-serial`.
///
/// The port handle is cloned at open time so the read and write directions
/// each sit behind their own lock.
pub struct SerialLink {
    port_name: String,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    closed: AtomicBool,
}

impl SerialLink {
    /// open serial port
    pub fn open(profile: &ConnectionProfile, read_timeout: Duration) -> Result<Self, LinkError> {
        let parity = profile.parity.to_driver().ok_or_else(|| {
            LinkError::Unsupported(format!(
                "parity {} is not supported by the driver",
                profile.parity
            ))
        })?;
        let stop_bits = profile.stop_bits.to_driver().ok_or_else(|| {
            LinkError::Unsupported(format!(
                "{} stop bits are not supported by the driver",
                profile.stop_bits
            ))
        })?;

        let reader = tokio_serial::new(profile.port_name.as_str(), profile.baud_rate)
            .data_bits(profile.data_bits.to_driver())
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", profile.port_name, e);
                LinkError::open(&profile.port_name, e.to_string())
            })?;
        let writer = reader
            .try_clone()
            .map_err(|e| LinkError::open(&profile.port_name, e.to_string()))?;

        info!("Opened serial port {profile}");
        Ok(SerialLink {
            port_name: profile.port_name.clone(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Link for SerialLink {
    fn read(&self, max_len: usize, timeout: Duration) -> Result<ReadOutcome, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let mut guard = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(port) = guard.as_mut() else {
            return Err(LinkError::Closed);
        };
        if port.timeout() != timeout {
            port.set_timeout(timeout)
                .map_err(|e| LinkError::io(e.to_string()))?;
        }

        let mut buf = vec![0u8; max_len.max(1)];
        match port.read(&mut buf) {
            Ok(0) => Err(LinkError::EndOfStream),
            Ok(n) => {
                buf.truncate(n);
                Ok(ReadOutcome::Data(buf))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(ReadOutcome::TimedOut)
            }
            Err(e) => Err(LinkError::io(e.to_string())),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(port) = guard.as_mut() else {
            return Err(LinkError::Closed);
        };
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| LinkError::io(e.to_string()))?;
        Ok(data.len())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The reader lock is held for at most one read timeout.
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Closed serial port {}", self.port_name);
    }
}

/// Opens [`SerialLink`]s with a fixed read timeout.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(read_timeout: Duration) -> Self {
        SerialConnector { read_timeout }
    }
}

impl Connector for SerialConnector {
    fn open(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Link>, LinkError> {
        let link = SerialLink::open(profile, self.read_timeout)?;
        Ok(Arc::new(link) as Arc<dyn Link>)
    }
}

/// List the serial ports currently present on the system.
pub fn list_available_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Error listing ports: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port::{DataBits, Parity, StopBits};

    #[test]
    fn test_mark_parity_is_unsupported() {
        let profile = ConnectionProfile::new(9600, Parity::Mark, DataBits::Eight, StopBits::One)
            .with_port("/dev/does-not-matter");
        let result = SerialLink::open(&profile, Duration::from_millis(100));
        assert!(matches!(result, Err(LinkError::Unsupported(_))));
    }

    #[test]
    fn test_one_and_a_half_stop_bits_is_unsupported() {
        let profile =
            ConnectionProfile::new(9600, Parity::None, DataBits::Eight, StopBits::OnePointFive)
                .with_port("/dev/does-not-matter");
        let result = SerialLink::open(&profile, Duration::from_millis(100));
        assert!(matches!(result, Err(LinkError::Unsupported(_))));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let profile = ConnectionProfile::default().with_port("/dev/serial_mon-no-such-port");
        let result = SerialConnector::new(Duration::from_millis(100)).open(&profile);
        assert!(matches!(result, Err(LinkError::Open { .. })));
    }
}
