//! In-memory link that stands in for a device.
//!
//! Bytes written to a [`LoopbackLink`] with echo enabled come back on the read
//! side as one chunk per write, the way a device with local echo behaves.
//! Tests use [`LoopbackLink::inject`] to simulate device output and the
//! `fail_*` hooks to simulate a cable being pulled.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::LinkError;
use crate::serial::link::{Connector, Link, ReadOutcome};
use crate::serial::port::ConnectionProfile;

/// Port name offered by the console in loopback mode.
pub const LOOPBACK_PORT: &str = "loop0";

#[derive(Default)]
struct LoopbackState {
    pending: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    read_fault: Option<LinkError>,
    write_fault: Option<LinkError>,
    closed: bool,
    close_calls: usize,
}

/// Simulated device link.
pub struct LoopbackLink {
    port_name: String,
    echo: bool,
    state: Mutex<LoopbackState>,
    ready: Condvar,
}

impl LoopbackLink {
    pub fn new(port_name: impl Into<String>, echo: bool) -> Self {
        LoopbackLink {
            port_name: port_name.into(),
            echo,
            state: Mutex::new(LoopbackState::default()),
            ready: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Queue bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.state().pending.push_back(bytes.to_vec());
        self.ready.notify_all();
    }

    /// Make the next read fail with `error`.
    pub fn fail_next_read(&self, error: LinkError) {
        self.state().read_fault = Some(error);
        self.ready.notify_all();
    }

    /// Make every following write fail with `error`.
    pub fn fail_writes(&self, error: LinkError) {
        self.state().write_fault = Some(error);
    }

    /// Everything written so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }
}

impl Link for LoopbackLink {
    fn read(&self, max_len: usize, timeout: Duration) -> Result<ReadOutcome, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if state.closed {
                return Err(LinkError::Closed);
            }
            if let Some(error) = state.read_fault.take() {
                return Err(error);
            }
            if let Some(mut chunk) = state.pending.pop_front() {
                let max_len = max_len.max(1);
                if chunk.len() > max_len {
                    let rest = chunk.split_off(max_len);
                    state.pending.push_front(rest);
                }
                return Ok(ReadOutcome::Data(chunk));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(ReadOutcome::TimedOut);
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, LinkError> {
        let mut state = self.state();
        if state.closed {
            return Err(LinkError::Closed);
        }
        if let Some(error) = state.write_fault.clone() {
            return Err(error);
        }
        state.written.extend_from_slice(data);
        if self.echo && !data.is_empty() {
            state.pending.push_back(data.to_vec());
            self.ready.notify_all();
        }
        Ok(data.len())
    }

    fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.close_calls += 1;
        self.ready.notify_all();
    }
}

/// Connector handing out [`LoopbackLink`]s.
///
/// Every opened link is kept so tests can reach the device side.
pub struct LoopbackConnector {
    echo: bool,
    unavailable: Vec<String>,
    opened: Mutex<Vec<Arc<LoopbackLink>>>,
}

impl LoopbackConnector {
    pub fn new(echo: bool) -> Self {
        LoopbackConnector {
            echo,
            unavailable: Vec::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Make opening `port_name` fail as if the device were missing.
    pub fn with_unavailable(mut self, port_name: impl Into<String>) -> Self {
        self.unavailable.push(port_name.into());
        self
    }

    /// The most recently opened link.
    pub fn last_link(&self) -> Option<Arc<LoopbackLink>> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Link>, LinkError> {
        if self.unavailable.contains(&profile.port_name) {
            return Err(LinkError::open(&profile.port_name, "No such device"));
        }
        let link = Arc::new(LoopbackLink::new(profile.port_name.clone(), self.echo));
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(link.clone());
        Ok(link as Arc<dyn Link>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_read_times_out_without_data() {
        let link = LoopbackLink::new("loop0", false);
        assert_eq!(link.read(64, SHORT), Ok(ReadOutcome::TimedOut));
    }

    #[test]
    fn test_echo_returns_written_chunk() {
        let link = LoopbackLink::new("loop0", true);
        assert_eq!(link.write(b"ping"), Ok(4));
        assert_eq!(link.read(64, SHORT), Ok(ReadOutcome::Data(b"ping".to_vec())));
        assert_eq!(link.written(), b"ping");
    }

    #[test]
    fn test_long_chunk_is_split() {
        let link = LoopbackLink::new("loop0", false);
        link.inject(b"abcdef");
        assert_eq!(link.read(4, SHORT), Ok(ReadOutcome::Data(b"abcd".to_vec())));
        assert_eq!(link.read(4, SHORT), Ok(ReadOutcome::Data(b"ef".to_vec())));
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let link = Arc::new(LoopbackLink::new("loop0", false));
        let reader = {
            let link = link.clone();
            std::thread::spawn(move || link.read(64, Duration::from_secs(5)))
        };
        std::thread::sleep(SHORT);
        link.close();
        assert_eq!(reader.join().ok(), Some(Err(LinkError::Closed)));
        assert_eq!(link.write(b"x"), Err(LinkError::Closed));
    }

    #[test]
    fn test_injected_faults() {
        let link = LoopbackLink::new("loop0", true);
        link.fail_next_read(LinkError::io("framing error"));
        assert_eq!(link.read(8, SHORT), Err(LinkError::io("framing error")));
        link.fail_writes(LinkError::io("unplugged"));
        assert_eq!(link.write(b"x"), Err(LinkError::io("unplugged")));
    }

    #[test]
    fn test_connector_refuses_unavailable_port() {
        let connector = LoopbackConnector::new(true).with_unavailable("busy0");
        let profile = ConnectionProfile::default().with_port("busy0");
        assert!(matches!(connector.open(&profile), Err(LinkError::Open { .. })));
        assert_eq!(connector.open_count(), 0);
    }
}
