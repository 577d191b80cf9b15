//! # Serial Mon
//!
//! A serial port monitor built around a small concurrent connection engine.
//!
//! One link to a device is open at a time. A background reader moves bytes
//! from the link into a shared buffer, and the consumer thread drains that
//! buffer on a timer and renders it as UTF-8 text, hex, or byte literals.
//! Outgoing lines are echoed to the display before they are written.
//!
//! ## Features
//!
//! - **Bounded reads**: every read has a timeout, so disconnect never waits
//!   on a silent device.
//! - **Fault handling**: read and write failures close the link and return
//!   to Disconnected.
//! - **Display Modes**: Text, Hex and ByteLiteral views with CR/LF
//!   terminators and hex input.
//! - **Profiles**: named line settings stored as RON.
//!
//! ## Architecture
//!
//! - [`serial`]: the connection engine
//! - [`config`]: the profile store
//! - [`console`]: the stdin/stdout front end
//! - [`error`]: Custom error types for the application

pub mod config;
pub mod console;
pub mod error;
pub mod serial;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::{DEFAULT_PROFILE, PROFILE_FILE, ProfileStore};
    pub use crate::console::{Console, ConsoleDisplay, ConsoleSettings};
    pub use crate::error::*;
    pub use crate::serial::buffer::ReadBuffer;
    pub use crate::serial::controller::{
        ConnectionController, Controls, SendOptions, SharedControls,
    };
    pub use crate::serial::display::{DisplaySink, MemoryDisplay};
    pub use crate::serial::encoding::{DisplayMode, InputEncoding};
    pub use crate::serial::flush::FlushScheduler;
    pub use crate::serial::link::{Connector, Link, SerialConnector, list_available_ports};
    pub use crate::serial::loopback::{LOOPBACK_PORT, LoopbackConnector, LoopbackLink};
    pub use crate::serial::port::{ConnectionProfile, ConnectionState, DataBits, Parity, StopBits};
    pub use crate::serial::reader::ReaderConfig;
}
