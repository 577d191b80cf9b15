//! # Port Module
//!
//! Serial line settings and the connection profile built from them: the
//! standard baud-rate table, [`Parity`], [`DataBits`], [`StopBits`],
//! [`ConnectionProfile`] and [`ConnectionState`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_serial::{DataBits as SpDataBits, Parity as SpParity, StopBits as SpStopBits};

use crate::error::ConfigError;

/// standard serial port baud rates
pub const STANDARD_BAUD_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

/// baud rate used when nothing is selected
pub const DEFAULT_BAUD_RATE: u32 = 921600;

/// serial port parity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Parity {
    pub const ALL: [Parity; 5] = [
        Parity::None,
        Parity::Even,
        Parity::Odd,
        Parity::Mark,
        Parity::Space,
    ];

    /// single letter code, as used in `8N1` notation
    pub fn code(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    /// driver parity, if the driver supports it
    pub fn to_driver(self) -> Option<SpParity> {
        match self {
            Parity::None => Some(SpParity::None),
            Parity::Even => Some(SpParity::Even),
            Parity::Odd => Some(SpParity::Odd),
            Parity::Mark | Parity::Space => None,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "None",
            Parity::Even => "Even",
            Parity::Odd => "Odd",
            Parity::Mark => "Mark",
            Parity::Space => "Space",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Parity {
    type Err = String;

    /// accepts the letter code or the full name, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "e" | "even" => Ok(Parity::Even),
            "o" | "odd" => Ok(Parity::Odd),
            "m" | "mark" => Ok(Parity::Mark),
            "s" | "space" => Ok(Parity::Space),
            other => Err(format!("unknown parity '{other}'")),
        }
    }
}

/// serial port data bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    /// number of bits in a frame
    pub fn bits(&self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            5 => Some(DataBits::Five),
            6 => Some(DataBits::Six),
            7 => Some(DataBits::Seven),
            8 => Some(DataBits::Eight),
            _ => None,
        }
    }

    pub fn to_driver(self) -> SpDataBits {
        match self {
            DataBits::Five => SpDataBits::Five,
            DataBits::Six => SpDataBits::Six,
            DataBits::Seven => SpDataBits::Seven,
            DataBits::Eight => SpDataBits::Eight,
        }
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// serial port stop bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    pub fn value(&self) -> f64 {
        match self {
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }

    pub fn from_value(value: f64) -> Option<Self> {
        if value == 1.0 {
            Some(StopBits::One)
        } else if value == 1.5 {
            Some(StopBits::OnePointFive)
        } else if value == 2.0 {
            Some(StopBits::Two)
        } else {
            None
        }
    }

    /// driver stop bits, if the driver supports it
    pub fn to_driver(self) -> Option<SpStopBits> {
        match self {
            StopBits::One => Some(SpStopBits::One),
            StopBits::Two => Some(SpStopBits::Two),
            StopBits::OnePointFive => None,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

impl FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(StopBits::from_value)
            .ok_or_else(|| format!("unknown stop bits '{s}'"))
    }
}

/// physical link configuration
///
/// A profile is copied into the controller when a link is opened and never
/// changes for the lifetime of that link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        ConnectionProfile {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
        }
    }
}

impl ConnectionProfile {
    /// profile with the given line settings and no port
    pub fn new(baud_rate: u32, parity: Parity, data_bits: DataBits, stop_bits: StopBits) -> Self {
        ConnectionProfile {
            port_name: String::new(),
            baud_rate,
            parity,
            data_bits,
            stop_bits,
        }
    }

    /// copy of this profile bound to a port
    pub fn with_port(&self, port_name: impl Into<String>) -> Self {
        ConnectionProfile {
            port_name: port_name.into(),
            ..self.clone()
        }
    }

    /// check the baud rate against the standard set
    ///
    /// Parity, data bits and stop bits are closed enums and always valid.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !STANDARD_BAUD_RATES.contains(&self.baud_rate) {
            return Err(ConfigError::invalid(name, "baud_rate", self.baud_rate));
        }
        Ok(())
    }

    /// short line description, e.g. `9600 8N1`
    pub fn line_settings(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.code(),
            self.stop_bits
        )
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port_name.is_empty() {
            write!(f, "{}", self.line_settings())
        } else {
            write!(f, "{} @ {}", self.port_name, self.line_settings())
        }
    }
}

/// connection state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    /// link is open
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
