//! # Command Module
//!
//! Parsing of console input lines. A line starting with `:` is a
//! [`Command`]; anything else is text to send.

use std::path::PathBuf;

use crate::error::{Result, SerialMonError};
use crate::serial::encoding::DisplayMode;
use crate::serial::port::{DataBits, Parity, STANDARD_BAUD_RATES, StopBits};

/// Prefix that marks a console command.
pub const COMMAND_PREFIX: char = ':';

/// One line typed by the operator.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Connect(Option<String>),
    Disconnect,
    Mode(DisplayMode),
    ToggleCr,
    ToggleLf,
    ToggleHexInput,
    ToggleTimestamps,
    Baud(u32),
    Parity(Parity),
    DataBits(DataBits),
    StopBits(StopBits),
    Ports,
    Profiles,
    Profile(String),
    SaveProfile(String),
    Clear,
    Save(Option<PathBuf>),
    Status,
    Help,
    Quit,
    /// Anything that is not a command goes to the device.
    Send(String),
}

pub const HELP: &str = "\
commands:
  :connect [PORT]       open PORT (or the last port) with the current settings
  :disconnect           close the port
  :mode text|hex|bytes  choose how received bytes are shown
  :cr / :lf             toggle the CR / LF terminator
  :hex                  toggle hex input
  :ts                   toggle timestamps
  :baud N               set baud rate (disconnected only)
  :parity N|E|O|M|S     set parity (disconnected only)
  :data 5|6|7|8         set data bits (disconnected only)
  :stop 1|1.5|2         set stop bits (disconnected only)
  :ports                list serial ports
  :profiles             list stored profiles
  :profile NAME         load a stored profile
  :save-profile NAME    store the current settings
  :status               show connection state and options
  :clear                clear the log
  :save [PATH]          save the log to a file
  :help                 show this help
  :quit                 exit
  ::text                send text starting with ':'
";

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    arg.ok_or_else(|| SerialMonError::command(format!("usage: {usage}")))
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command> {
    let Some(rest) = line.strip_prefix(COMMAND_PREFIX) else {
        return Ok(Command::Send(line.to_string()));
    };
    if rest.starts_with(COMMAND_PREFIX) {
        return Ok(Command::Send(rest.to_string()));
    }

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next();

    let command = match name {
        "connect" | "c" => Command::Connect(arg.map(str::to_string)),
        "disconnect" | "d" => Command::Disconnect,
        "mode" => {
            let mode = required(arg, ":mode text|hex|bytes")?;
            Command::Mode(mode.parse().map_err(SerialMonError::command)?)
        }
        "cr" => Command::ToggleCr,
        "lf" => Command::ToggleLf,
        "hex" => Command::ToggleHexInput,
        "ts" => Command::ToggleTimestamps,
        "baud" => {
            let text = required(arg, ":baud N")?;
            match text.parse::<u32>() {
                Ok(baud) if STANDARD_BAUD_RATES.contains(&baud) => Command::Baud(baud),
                _ => return Err(SerialMonError::command(format!("unsupported baud rate '{text}'"))),
            }
        }
        "parity" => {
            let text = required(arg, ":parity N|E|O|M|S")?;
            Command::Parity(text.parse().map_err(SerialMonError::command)?)
        }
        "data" => {
            let text = required(arg, ":data 5|6|7|8")?;
            text.parse::<u8>()
                .ok()
                .and_then(DataBits::from_bits)
                .map(Command::DataBits)
                .ok_or_else(|| SerialMonError::command(format!("unsupported data bits '{text}'")))?
        }
        "stop" => {
            let text = required(arg, ":stop 1|1.5|2")?;
            Command::StopBits(text.parse().map_err(SerialMonError::command)?)
        }
        "ports" => Command::Ports,
        "profiles" => Command::Profiles,
        "profile" => Command::Profile(required(arg, ":profile NAME")?.to_string()),
        "save-profile" => Command::SaveProfile(required(arg, ":save-profile NAME")?.to_string()),
        "clear" => Command::Clear,
        "save" => Command::Save(arg.map(PathBuf::from)),
        "status" => Command::Status,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => {
            return Err(SerialMonError::command(format!(
                "unknown command ':{other}', try :help"
            )));
        }
    };
    Ok(command)
}
