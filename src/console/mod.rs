//! # Console Module
//!
//! Line-oriented front end for the connection engine.
//!
//! The console owns the consumer side: it reads operator lines from stdin,
//! ticks the [`FlushScheduler`], and applies reader faults, all from one
//! `tokio::select!` loop on a single thread. Rendered traffic goes to stdout
//! through [`ConsoleDisplay`]; diagnostics go to the log on stderr.
//!
//! ## Usage
//!
//! Lines starting with `:` are commands (see [`command::HELP`]); every other
//! line is sent to the device with the current terminator and input encoding.

pub mod command;

use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::config::{DEFAULT_PROFILE, ProfileStore};
use crate::error::{ConfigError, Result, SendError, SerialMonError};
use crate::serial::buffer::ReadBuffer;
use crate::serial::controller::{ConnectionController, SendOptions, SharedControls};
use crate::serial::display::{DisplaySink, default_log_name};
use crate::serial::encoding::{DisplayMode, InputEncoding};
use crate::serial::flush::{DEFAULT_FLUSH_PERIOD, FlushScheduler};
use crate::serial::link::{Connector, list_available_ports};
use crate::serial::port::ConnectionProfile;
use crate::serial::reader::{ReaderConfig, ReaderFault};
use command::{Command, HELP};

/// Display sink that keeps the log and mirrors it to a writer.
pub struct ConsoleDisplay {
    log: String,
    out: Box<dyn Write + Send>,
}

impl ConsoleDisplay {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        ConsoleDisplay {
            log: String::new(),
            out,
        }
    }

    /// Print a status line that is not part of the log.
    pub fn notice(&mut self, msg: &str) {
        let line = if self.log.is_empty() || self.log.ends_with('\n') {
            format!("[serial_mon] {msg}\n")
        } else {
            format!("\n[serial_mon] {msg}\n")
        };
        self.write_out(&line);
    }

    fn write_out(&mut self, text: &str) {
        if let Err(e) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
        {
            warn!("Failed to write to console: {e}");
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn append(&mut self, text: &str) {
        self.log.push_str(text);
        self.write_out(text);
    }

    fn clear(&mut self) {
        self.log.clear();
    }

    fn contents(&self) -> String {
        self.log.clone()
    }
}

/// Start-up settings for a [`Console`].
#[derive(Clone, Debug)]
pub struct ConsoleSettings {
    pub profile: ConnectionProfile,
    /// Port to use when `:connect` has no argument.
    pub port: Option<String>,
    pub mode: DisplayMode,
    pub send: SendOptions,
    pub timestamps: bool,
    pub flush_period: Duration,
    pub reader: ReaderConfig,
    pub list_ports: fn() -> Vec<String>,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        ConsoleSettings {
            profile: ConnectionProfile::default(),
            port: None,
            mode: DisplayMode::Text,
            send: SendOptions::default(),
            timestamps: false,
            flush_period: DEFAULT_FLUSH_PERIOD,
            reader: ReaderConfig::default(),
            list_ports: list_available_ports,
        }
    }
}

/// Whether the loop keeps going after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// The interactive console.
pub struct Console {
    controller: ConnectionController,
    controls: SharedControls,
    faults: mpsc::UnboundedReceiver<ReaderFault>,
    flush: FlushScheduler,
    display: ConsoleDisplay,
    store: ProfileStore,
    profile: ConnectionProfile,
    port: Option<String>,
    mode: DisplayMode,
    send: SendOptions,
    list_ports: fn() -> Vec<String>,
}

impl Console {
    pub fn new(
        connector: Box<dyn Connector>,
        store: ProfileStore,
        settings: ConsoleSettings,
        display: ConsoleDisplay,
    ) -> Self {
        let buffer = ReadBuffer::new();
        let controls = SharedControls::new();
        let (tx, faults) = mpsc::unbounded_channel();
        let controller = ConnectionController::new(
            connector,
            Box::new(controls.clone()),
            buffer.clone(),
            tx,
            settings.reader,
        );
        let mut flush = FlushScheduler::new(buffer, settings.flush_period);
        flush.set_timestamps(settings.timestamps);

        let port = settings.port.or_else(|| {
            (!settings.profile.port_name.is_empty()).then(|| settings.profile.port_name.clone())
        });
        Console {
            controller,
            controls,
            faults,
            flush,
            display,
            store,
            profile: settings.profile,
            port,
            mode: settings.mode,
            send: settings.send,
            list_ports: settings.list_ports,
        }
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    pub fn display(&self) -> &ConsoleDisplay {
        &self.display
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn send_options(&self) -> &SendOptions {
        &self.send
    }

    /// Run until `:quit` or end of input, then disconnect.
    ///
    /// A line that is not valid UTF-8 is reported and skipped. A read error
    /// on `input` still disconnects before it is returned.
    pub async fn run<R>(&mut self, mut input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut raw = Vec::new();
        let mut ticker = self.flush.interval();
        let mut failure = None;
        info!("Console ready, flushing every {:?}", self.flush.period());

        loop {
            tokio::select! {
                read = input.read_until(b'\n', &mut raw) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            error!("Failed to read input: {e}");
                            failure = Some(e);
                            break;
                        }
                    }
                    let result = match String::from_utf8(std::mem::take(&mut raw)) {
                        Ok(line) => self.handle_line(&line).await,
                        Err(_) => Err(SerialMonError::command("input line is not valid UTF-8")),
                    };
                    match result {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => self.report(&e),
                    }
                }
                _ = ticker.tick() => {
                    self.flush_now();
                }
                Some(fault) = self.faults.recv() => {
                    self.apply_fault(fault).await;
                }
            }
        }

        self.shutdown().await;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Parse and execute one operator line.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let command = command::parse(line.trim_end_matches(['\r', '\n']))?;
        self.execute(command).await
    }

    pub async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Send(text) => self.send_text(&text).await?,
            Command::Connect(port) => self.connect(port).await?,
            Command::Disconnect => {
                let result = self.controller.disconnect().await;
                self.finish_now();
                result?;
                self.display.notice("disconnected");
            }
            Command::Mode(mode) => {
                self.flush_now();
                self.mode = mode;
                self.display.notice(&format!("display mode: {mode}"));
            }
            Command::ToggleCr => {
                self.send.cr = !self.send.cr;
                self.display.notice(&format!("CR: {}", on_off(self.send.cr)));
            }
            Command::ToggleLf => {
                self.send.lf = !self.send.lf;
                self.display.notice(&format!("LF: {}", on_off(self.send.lf)));
            }
            Command::ToggleHexInput => {
                self.send.input = match self.send.input {
                    InputEncoding::Text => InputEncoding::Hex,
                    InputEncoding::Hex => InputEncoding::Text,
                };
                let hex = self.send.input == InputEncoding::Hex;
                self.display.notice(&format!("hex input: {}", on_off(hex)));
            }
            Command::ToggleTimestamps => {
                let enabled = !self.flush.timestamps();
                self.flush.set_timestamps(enabled);
                self.display.notice(&format!("timestamps: {}", on_off(enabled)));
            }
            Command::Baud(baud) => self.edit_settings(|p| p.baud_rate = baud)?,
            Command::Parity(parity) => self.edit_settings(|p| p.parity = parity)?,
            Command::DataBits(bits) => self.edit_settings(|p| p.data_bits = bits)?,
            Command::StopBits(stop) => self.edit_settings(|p| p.stop_bits = stop)?,
            Command::Ports => {
                let ports = (self.list_ports)();
                if ports.is_empty() {
                    self.display.notice("no serial ports found");
                }
                for port in ports {
                    self.display.notice(&port);
                }
            }
            Command::Profiles => {
                for name in self.store.list_profile_names()? {
                    self.display.notice(&name);
                }
            }
            Command::Profile(name) => self.load_profile(&name)?,
            Command::SaveProfile(name) => {
                let port = self.port.clone().unwrap_or_default();
                self.store.save_profile(&name, &self.profile.with_port(port))?;
                self.display.notice(&format!("saved profile '{name}'"));
            }
            Command::Clear => self.display.clear(),
            Command::Save(path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(default_log_name()));
                self.flush_now();
                self.display.save_to_file(&path)?;
                self.display.notice(&format!("log saved to {}", path.display()));
            }
            Command::Status => {
                let status = self.status();
                self.display.notice(&status);
            }
            Command::Help => self.display.notice(HELP.trim_end()),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn connect(&mut self, port: Option<String>) -> Result<()> {
        let port = port.or_else(|| self.port.clone()).unwrap_or_default();
        self.controller.connect(&self.profile, &port).await?;
        self.display
            .notice(&format!("connected to {}", self.profile.with_port(port.as_str())));
        self.port = Some(port);
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        match self
            .controller
            .send(text, &self.send, self.mode, &mut self.display)
        {
            Ok(()) => Ok(()),
            Err(SendError::LinkFailure(e)) => {
                error!("Write failed, closing the link: {e}");
                if let Err(e) = self.controller.disconnect().await {
                    warn!("{e}");
                }
                self.finish_now();
                Err(SendError::LinkFailure(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn edit_settings(&mut self, edit: impl FnOnce(&mut ConnectionProfile)) -> Result<()> {
        if !self.controls.flags().config_enabled {
            return Err(SerialMonError::command(
                "disconnect before changing line settings",
            ));
        }
        edit(&mut self.profile);
        self.display
            .notice(&format!("line settings: {}", self.profile.line_settings()));
        Ok(())
    }

    fn load_profile(&mut self, name: &str) -> Result<()> {
        if !self.controls.flags().config_enabled {
            return Err(SerialMonError::command("disconnect before loading a profile"));
        }
        let profile = match self.store.resolve(name) {
            Ok(profile) => profile,
            Err(ConfigError::NoDefault) => {
                warn!(
                    "No usable '{name}' and no '{DEFAULT_PROFILE}' profile, \
                     using built-in settings"
                );
                ConnectionProfile::default()
            }
            Err(e) => return Err(e.into()),
        };
        if !profile.port_name.is_empty() {
            self.port = Some(profile.port_name.clone());
        }
        self.display
            .notice(&format!("line settings: {}", profile.line_settings()));
        self.profile = profile;
        Ok(())
    }

    async fn apply_fault(&mut self, fault: ReaderFault) {
        if let Some(e) = self.controller.handle_fault(fault).await {
            self.finish_now();
            self.display.notice(&format!("connection lost: {e}"));
        }
    }

    /// Move everything buffered so far to the display.
    pub fn flush_now(&mut self) -> usize {
        self.flush.flush(self.mode, &mut self.display)
    }

    /// Flush and release bytes held back for an incomplete character.
    pub fn finish_now(&mut self) -> usize {
        self.flush.finish(self.mode, &mut self.display)
    }

    /// Apply any reader faults that have already arrived.
    pub async fn poll_faults(&mut self) {
        while let Ok(fault) = self.faults.try_recv() {
            self.apply_fault(fault).await;
        }
    }

    fn status(&self) -> String {
        let link = match self.controller.profile() {
            Some(profile) => format!("connected to {profile}"),
            None => format!(
                "disconnected, port {}, {}",
                self.port.as_deref().unwrap_or("<none>"),
                self.profile.line_settings()
            ),
        };
        format!(
            "{link}; mode {}, CR {}, LF {}, hex input {}, timestamps {}",
            self.mode,
            on_off(self.send.cr),
            on_off(self.send.lf),
            on_off(self.send.input == InputEncoding::Hex),
            on_off(self.flush.timestamps())
        )
    }

    fn report(&mut self, error: &SerialMonError) {
        warn!("{error}");
        self.display.notice(&format!("error: {error}"));
    }

    async fn shutdown(&mut self) {
        if self.controller.state().is_connected() {
            if let Err(e) = self.controller.disconnect().await {
                warn!("{e}");
            }
        }
        self.finish_now();
        info!("Console closed");
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
