//! # Serial Module
//!
//! The connection engine: one link to a device, a background reader filling a
//! shared buffer, and a consumer-side flush that renders the buffered bytes.
//!
//! - [`port`]: line settings, profiles and connection state
//! - [`link`]: the [`link::Link`] abstraction and the `tokio-serial` backend
//! - [`loopback`]: in-memory link for tests and demos
//! - [`encoding`]: Text/Hex/ByteLiteral rendering and input encoding
//! - [`buffer`]: the reader-to-consumer byte queue
//! - [`reader`]: the cancellable background read loop
//! - [`flush`]: periodic drain of the buffer to a display
//! - [`display`]: the display sink
//! - [`controller`]: the connection state machine

pub mod buffer;
pub mod controller;
pub mod display;
pub mod encoding;
pub mod flush;
pub mod link;
pub mod loopback;
pub mod port;
pub mod reader;
