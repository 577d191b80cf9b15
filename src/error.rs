//! # Error Module
//!
//! This module provides the error types for the `serial_mon` crate.
//! Every operation family of the connection engine has its own enum so callers
//! can match on exactly the failures that operation can produce; the
//! application-level [`SerialMonError`] collects them for the console.
//! All types use the `thiserror` crate for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for `serial_mon` application operations.
pub type Result<T> = std::result::Result<T, SerialMonError>;

/// Failure of the underlying byte-stream link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The handle was closed; reads and writes are no longer possible.
    #[error("link is closed")]
    Closed,

    /// The device stopped delivering data (zero-length read without timeout).
    #[error("link reached end of stream")]
    EndOfStream,

    /// Read or write failed after a successful open.
    #[error("link I/O error: {0}")]
    Io(String),

    /// The open call itself failed.
    #[error("failed to open '{port}': {reason}")]
    Open { port: String, reason: String },

    /// The driver cannot express the requested setting.
    #[error("unsupported link setting: {0}")]
    Unsupported(String),
}

impl LinkError {
    /// Creates a new I/O error.
    #[must_use]
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Creates a new open error.
    #[must_use]
    pub fn open(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Open {
            port: port.into(),
            reason: reason.into(),
        }
    }
}

/// Missing or invalid connection profile data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required field is absent from the stored profile.
    #[error("profile '{profile}' is missing field '{field}'")]
    MissingField { profile: String, field: &'static str },

    /// A field is present but not one of the allowed values.
    #[error("profile '{profile}' has invalid {field}: {value}")]
    InvalidValue {
        profile: String,
        field: &'static str,
        value: String,
    },

    /// No profile with this name exists in the store.
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    /// Fallback was requested but the store has no `default` profile.
    #[error("no 'default' profile to fall back to")]
    NoDefault,

    /// Reading or writing the profile document failed.
    #[error("profile store I/O error: {0}")]
    Io(String),

    /// The profile document is not valid RON.
    #[error("profile store parse error: {0}")]
    Parse(String),

    /// The profile document could not be written out as RON.
    #[error("profile store serialize error: {0}")]
    Serialize(String),
}

impl ConfigError {
    /// Creates a new invalid value error.
    #[must_use]
    pub fn invalid(profile: impl Into<String>, field: &'static str, value: impl ToString) -> Self {
        Self::InvalidValue {
            profile: profile.into(),
            field,
            value: value.to_string(),
        }
    }
}

/// Errors from `ConnectionController::connect`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// No port was selected.
    #[error("no port selected")]
    InvalidPort,

    /// A link is already open.
    #[error("already connected")]
    AlreadyConnected,

    /// The profile failed validation.
    #[error("invalid profile: {0}")]
    InvalidProfile(#[from] ConfigError),

    /// The device could not be opened (missing, busy, permission denied).
    #[error("device '{port}' unavailable: {reason}")]
    DeviceUnavailable { port: String, reason: String },
}

/// Errors from `ConnectionController::disconnect`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    /// There is no open link.
    #[error("not connected")]
    NotConnected,

    /// The reader did not stop within the join timeout; the link is closed
    /// and the state is already Disconnected.
    #[error("reader did not stop within {0:?}")]
    ReaderStuck(Duration),
}

/// Errors from `ConnectionController::send`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// There is no open link.
    #[error("not connected")]
    NotConnected,

    /// The outgoing text could not be encoded.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The write failed; the caller decides whether to disconnect.
    #[error("write failed: {0}")]
    LinkFailure(#[from] LinkError),
}

/// Malformed UTF-8 under Text display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid UTF-8 at byte {offset}")]
pub struct DecodeError {
    /// Offset of the first byte that is not part of a valid sequence.
    pub offset: usize,
}

/// Main error type for the `serial_mon` application.
#[derive(Debug, Error)]
pub enum SerialMonError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Disconnect(#[from] DisconnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    /// Operator command could not be understood.
    #[error("Invalid command: {0}")]
    Command(String),
}

impl SerialMonError {
    /// Creates a new command error.
    #[must_use]
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }
}
