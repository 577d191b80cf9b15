//! # Controller Module
//!
//! [`ConnectionController`] owns the one link and its reader, and is the only
//! place the connection state changes.
//!
//! ```text
//!                 connect (ok)
//!   Disconnected ─────────────▶ Connected
//!        ▲                          │
//!        └──── disconnect / fault ──┘
//! ```
//!
//! The controller is driven from the consumer thread. Reader faults arrive on
//! the fault channel handed to [`ConnectionController::new`] and are applied
//! with [`ConnectionController::handle_fault`].

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::error::{ConnectError, DisconnectError, LinkError, SendError};
use crate::serial::buffer::ReadBuffer;
use crate::serial::display::DisplaySink;
use crate::serial::encoding::{DisplayMode, InputEncoding, encode_input, render_block};
use crate::serial::link::{Connector, Link};
use crate::serial::port::{ConnectionProfile, ConnectionState};
use crate::serial::reader::{ReaderConfig, ReaderExit, ReaderFault, ReaderTask};

/// Prefix of the echo block for outgoing text.
pub const ECHO_PREFIX: &str = "\n--> ";

/// Prefix of the line reserved for the device response.
pub const RESPONSE_PREFIX: &str = "<-- ";

/// UI collaborator toggled on every state change.
pub trait Controls: Send {
    /// Port and line-setting controls.
    fn set_config_enabled(&mut self, enabled: bool);

    /// Input and send controls.
    fn set_send_enabled(&mut self, enabled: bool);
}

/// Plain control flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub config_enabled: bool,
    pub send_enabled: bool,
}

/// [`ControlFlags`] shared between the controller and whoever draws them.
#[derive(Clone, Debug, Default)]
pub struct SharedControls(Arc<Mutex<ControlFlags>>);

impl SharedControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> ControlFlags {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Controls for SharedControls {
    fn set_config_enabled(&mut self, enabled: bool) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .config_enabled = enabled;
    }

    fn set_send_enabled(&mut self, enabled: bool) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send_enabled = enabled;
    }
}

/// Options applied to every `send`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Append a carriage return octet.
    pub cr: bool,
    /// Append a line feed octet.
    pub lf: bool,
    pub input: InputEncoding,
}

impl SendOptions {
    /// Octets written after the user's bytes.
    pub fn terminator(&self) -> &'static [u8] {
        match (self.cr, self.lf) {
            (false, false) => b"",
            (true, false) => b"\r",
            (false, true) => b"\n",
            (true, true) => b"\r\n",
        }
    }
}

struct Session {
    id: u64,
    profile: ConnectionProfile,
    link: Arc<dyn Link>,
    reader: ReaderTask,
}

/// The connection state machine.
pub struct ConnectionController {
    connector: Box<dyn Connector>,
    controls: Box<dyn Controls>,
    buffer: ReadBuffer,
    faults: mpsc::UnboundedSender<ReaderFault>,
    config: ReaderConfig,
    session: Option<Session>,
    last_session: u64,
}

impl ConnectionController {
    /// Create a disconnected controller.
    ///
    /// Received bytes go to `buffer`; reader faults are sent on `faults`.
    pub fn new(
        connector: Box<dyn Connector>,
        controls: Box<dyn Controls>,
        buffer: ReadBuffer,
        faults: mpsc::UnboundedSender<ReaderFault>,
        config: ReaderConfig,
    ) -> Self {
        let mut controller = ConnectionController {
            connector,
            controls,
            buffer,
            faults,
            config,
            session: None,
            last_session: 0,
        };
        controller.signal_controls(false);
        controller
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Profile of the open link.
    pub fn profile(&self) -> Option<&ConnectionProfile> {
        self.session.as_ref().map(|s| &s.profile)
    }

    /// Id of the open link; every successful connect gets a new one.
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn buffer(&self) -> &ReadBuffer {
        &self.buffer
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Open `port` with the line settings of `profile` and start reading.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        &mut self,
        profile: &ConnectionProfile,
        port: &str,
    ) -> Result<(), ConnectError> {
        let port = port.trim();
        if port.is_empty() {
            return Err(ConnectError::InvalidPort);
        }
        if self.session.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }
        let profile = profile.with_port(port);
        profile.validate(port)?;

        let link = self.connector.open(&profile).map_err(|e| {
            warn!("Could not connect to {port}: {e}");
            let reason = match e {
                LinkError::Open { reason, .. } => reason,
                other => other.to_string(),
            };
            ConnectError::DeviceUnavailable {
                port: port.to_string(),
                reason,
            }
        })?;

        self.last_session += 1;
        let id = self.last_session;
        let reader = ReaderTask::spawn(
            id,
            link.clone(),
            self.buffer.clone(),
            self.faults.clone(),
            &self.config,
        );
        info!("Connected to {profile} (session {id})");
        self.session = Some(Session {
            id,
            profile,
            link,
            reader,
        });
        self.signal_controls(true);
        Ok(())
    }

    /// Stop the reader, close the link and return to Disconnected.
    ///
    /// Bytes already in the read buffer stay there for the next flush; nothing
    /// is appended once this returns.
    pub async fn disconnect(&mut self) -> Result<(), DisconnectError> {
        let session = self.session.take().ok_or(DisconnectError::NotConnected)?;
        info!("Disconnecting from {}", session.profile);
        self.teardown(session).await
    }

    async fn teardown(&mut self, session: Session) -> Result<(), DisconnectError> {
        let Session {
            id, link, reader, ..
        } = session;
        reader.cancel();
        self.buffer.barrier();
        link.close();

        let joined = reader.join(self.config.join_timeout).await;
        self.signal_controls(false);
        match joined {
            Ok(ReaderExit::Cancelled) => {
                debug!("Reader {id} joined");
                Ok(())
            }
            Ok(ReaderExit::Failed(e)) => {
                debug!("Reader {id} had already failed: {e}");
                Ok(())
            }
            Err(timeout) => {
                error!("Reader {id} did not stop within {timeout:?}");
                Err(DisconnectError::ReaderStuck(timeout))
            }
        }
    }

    /// Apply a reader fault.
    ///
    /// Returns the error when it belonged to the open link, which is then
    /// closed. Faults from earlier links are ignored.
    pub async fn handle_fault(&mut self, fault: ReaderFault) -> Option<LinkError> {
        if self.session_id() != Some(fault.session) {
            debug!("Ignoring fault from session {}: {}", fault.session, fault.error);
            return None;
        }
        let session = self.session.take()?;
        error!("Link to {} failed: {}", session.profile.port_name, fault.error);
        if let Err(e) = self.teardown(session).await {
            warn!("{e}");
        }
        Some(fault.error)
    }

    /// Echo `text` to `sink` and write it to the link.
    ///
    /// The echo is appended before the write. A failed write leaves the link
    /// open; the caller decides whether to disconnect.
    pub fn send(
        &mut self,
        text: &str,
        options: &SendOptions,
        mode: DisplayMode,
        sink: &mut dyn DisplaySink,
    ) -> Result<(), SendError> {
        let session = self.session.as_ref().ok_or(SendError::NotConnected)?;
        let mut bytes = encode_input(text, options.input).map_err(SendError::InvalidInput)?;

        sink.append(&render_block(&bytes, mode, ECHO_PREFIX, true));
        sink.append(&render_block(b"\n", mode, RESPONSE_PREFIX, false));

        bytes.extend_from_slice(options.terminator());
        if bytes.is_empty() {
            return Ok(());
        }
        let written = session.link.write(&bytes).inspect_err(|e| {
            warn!("Write to {} failed: {e}", session.profile.port_name);
        })?;
        if written < bytes.len() {
            return Err(SendError::LinkFailure(LinkError::io(format!(
                "short write: {written} of {} bytes",
                bytes.len()
            ))));
        }
        debug!("Sent {written} bytes to {}", session.profile.port_name);
        Ok(())
    }

    fn signal_controls(&mut self, connected: bool) {
        self.controls.set_config_enabled(!connected);
        self.controls.set_send_enabled(connected);
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.reader.cancel();
            session.link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::serial::display::MemoryDisplay;
    use crate::serial::link::{MockConnector, MockLink, ReadOutcome};
    use crate::serial::loopback::LoopbackConnector;
    use crate::serial::port::{DataBits, Parity, StopBits};
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    struct Harness {
        controller: ConnectionController,
        connector: Arc<LoopbackConnector>,
        controls: SharedControls,
        faults: mpsc::UnboundedReceiver<ReaderFault>,
    }

    fn fast_config() -> ReaderConfig {
        ReaderConfig {
            read_timeout: Duration::from_millis(20),
            join_timeout: Duration::from_secs(1),
            chunk_size: 64,
        }
    }

    fn harness(echo: bool) -> Harness {
        let connector = Arc::new(LoopbackConnector::new(echo).with_unavailable("busy0"));
        let controls = SharedControls::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = ConnectionController::new(
            Box::new(connector.clone()),
            Box::new(controls.clone()),
            ReadBuffer::new(),
            tx,
            fast_config(),
        );
        Harness {
            controller,
            connector,
            controls,
            faults: rx,
        }
    }

    fn profile_9600() -> ConnectionProfile {
        ConnectionProfile::new(9600, Parity::None, DataBits::Eight, StopBits::One)
    }

    async fn wait_for_len(buffer: &ReadBuffer, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while buffer.len() < len && Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_starts_disconnected_with_config_enabled() {
        let h = harness(false);
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.controls.flags(),
            ControlFlags {
                config_enabled: true,
                send_enabled: false
            }
        );
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        assert_eq!(h.controller.profile().unwrap().port_name, "loop0");
        assert!(h.controls.flags().send_enabled);
        assert!(!h.controls.flags().config_enabled);

        h.controller.disconnect().await.unwrap();
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controls.flags().config_enabled);
        assert!(!h.controls.flags().send_enabled);

        let link = h.connector.last_link().unwrap();
        assert!(link.is_closed());
        assert_eq!(link.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_port() {
        let mut h = harness(false);
        let result = h.controller.connect(&profile_9600(), "  ").await;
        assert_eq!(result, Err(ConnectError::InvalidPort));
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_twice() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let result = h.controller.connect(&profile_9600(), "loop1").await;
        assert_eq!(result, Err(ConnectError::AlreadyConnected));
        assert_eq!(h.controller.profile().unwrap().port_name, "loop0");
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_baud() {
        let mut h = harness(false);
        let profile = ConnectionProfile::new(1234, Parity::None, DataBits::Eight, StopBits::One);
        let result = h.controller.connect(&profile, "loop0").await;
        assert_eq!(
            result,
            Err(ConnectError::InvalidProfile(ConfigError::invalid(
                "loop0",
                "baud_rate",
                1234
            )))
        );
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_to_unavailable_device() {
        let mut h = harness(false);
        let result = h.controller.connect(&profile_9600(), "busy0").await;
        assert!(matches!(
            result,
            Err(ConnectError::DeviceUnavailable { ref port, .. }) if port == "busy0"
        ));
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controls.flags().config_enabled);
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected() {
        let mut h = harness(false);
        assert_eq!(
            h.controller.disconnect().await,
            Err(DisconnectError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_send_when_disconnected_has_no_side_effects() {
        let mut connector = MockConnector::new();
        connector.expect_open().never();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut controller = ConnectionController::new(
            Box::new(connector),
            Box::new(SharedControls::new()),
            ReadBuffer::new(),
            tx,
            fast_config(),
        );
        let mut display = MemoryDisplay::new();

        let options = SendOptions::default();
        let result = controller.send("ping", &options, DisplayMode::Text, &mut display);
        assert_eq!(result, Err(SendError::NotConnected));
        assert!(display.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_send_echoes_then_writes() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let mut display = MemoryDisplay::new();
        let options = SendOptions {
            cr: true,
            lf: true,
            ..SendOptions::default()
        };

        h.controller
            .send("ping", &options, DisplayMode::Text, &mut display)
            .unwrap();
        assert_eq!(display.as_str(), "\n--> ping\n<-- \n");
        assert_eq!(h.connector.last_link().unwrap().written(), b"ping\r\n");
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_hex_input_in_hex_mode() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let mut display = MemoryDisplay::new();
        let options = SendOptions {
            input: InputEncoding::Hex,
            ..SendOptions::default()
        };

        h.controller
            .send("41 42", &options, DisplayMode::Hex, &mut display)
            .unwrap();
        assert_eq!(display.as_str(), "\n--> 0x41 0x42 \n<-- 0x0a ");
        assert_eq!(h.connector.last_link().unwrap().written(), b"AB");
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_bad_hex_without_echo() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let mut display = MemoryDisplay::new();
        let options = SendOptions {
            input: InputEncoding::Hex,
            ..SendOptions::default()
        };

        let result = h.controller.send("zz", &options, DisplayMode::Text, &mut display);
        assert!(matches!(result, Err(SendError::InvalidInput(_))));
        assert!(display.as_str().is_empty());
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_keeps_state() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        h.connector
            .last_link()
            .unwrap()
            .fail_writes(LinkError::io("unplugged"));
        let mut display = MemoryDisplay::new();

        let result = h
            .controller
            .send("ping", &SendOptions::default(), DisplayMode::Text, &mut display);
        assert_eq!(result, Err(SendError::LinkFailure(LinkError::io("unplugged"))));
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_fault_disconnects() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let link = h.connector.last_link().unwrap();
        link.fail_next_read(LinkError::io("device reports error"));

        let fault = h.faults.recv().await.unwrap();
        let error = h.controller.handle_fault(fault).await;
        assert_eq!(error, Some(LinkError::io("device reports error")));
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
        assert!(h.controls.flags().config_enabled);
        assert_eq!(link.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_fault_is_ignored() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let stale = ReaderFault {
            session: h.controller.session_id().unwrap() + 100,
            error: LinkError::Closed,
        };
        assert_eq!(h.controller.handle_fault(stale).await, None);
        assert_eq!(h.controller.state(), ConnectionState::Connected);
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_gets_fresh_session() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let first = h.controller.session_id().unwrap();
        h.controller.disconnect().await.unwrap();
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let second = h.controller.session_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(h.connector.open_count(), 2);
        h.controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_appended_after_disconnect() {
        let mut h = harness(false);
        h.controller.connect(&profile_9600(), "loop0").await.unwrap();
        let link = h.connector.last_link().unwrap();
        link.inject(b"before");
        wait_for_len(h.controller.buffer(), 6).await;

        h.controller.disconnect().await.unwrap();
        link.inject(b"after");
        sleep(Duration::from_millis(60)).await;
        assert_eq!(h.controller.buffer().take(), b"before");
    }

    #[tokio::test]
    async fn test_stuck_reader_still_disconnects() {
        let mut link = MockLink::new();
        link.expect_read().returning(|_, _| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(ReadOutcome::TimedOut)
        });
        link.expect_close().times(1).return_const(());
        let link: Arc<dyn Link> = Arc::new(link);

        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(move |_| Ok(link.clone()));
        let controls = SharedControls::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ReaderConfig {
            join_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let buffer = ReadBuffer::new();
        let mut controller = ConnectionController::new(
            Box::new(connector),
            Box::new(controls.clone()),
            buffer.clone(),
            tx,
            config,
        );

        controller.connect(&profile_9600(), "mock0").await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            controller.disconnect().await,
            Err(DisconnectError::ReaderStuck(Duration::from_millis(50)))
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(
            controls.flags(),
            ControlFlags {
                config_enabled: true,
                send_enabled: false
            }
        );
        assert_eq!(controller.disconnect().await, Err(DisconnectError::NotConnected));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_closes_link_exactly_once() {
        let mut link = MockLink::new();
        link.expect_read().returning(|_, timeout| {
            std::thread::sleep(timeout);
            Ok(ReadOutcome::TimedOut)
        });
        link.expect_close().times(1).return_const(());
        let link: Arc<dyn Link> = Arc::new(link);

        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(move |_| Ok(link.clone()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut controller = ConnectionController::new(
            Box::new(connector),
            Box::new(SharedControls::new()),
            ReadBuffer::new(),
            tx,
            fast_config(),
        );

        controller.connect(&profile_9600(), "mock0").await.unwrap();
        controller.disconnect().await.unwrap();
        assert_eq!(controller.disconnect().await, Err(DisconnectError::NotConnected));
    }
}
