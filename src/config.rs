//! # Config Module
//!
//! Named connection profiles persisted as a RON document.
//!
//! ```ron
//! #![enable(implicit_some)]
//! (
//!     profiles: {
//!         "default": (baud_rate: 921600, parity: "N", data_bits: 8, stop_bits: 1.0),
//!         "bench": (
//!             port_name: "/dev/ttyUSB0",
//!             baud_rate: 9600,
//!             parity: "E",
//!             data_bits: 7,
//!             stop_bits: 2.0,
//!         ),
//!     },
//! )
//! ```
//!
//! Each profile is read as a plain RON value and checked on its own, so a
//! hand-edited profile with a missing or mistyped field is rejected with a
//! [`ConfigError`] naming the field while the other profiles still load.
//! [`ProfileStore::resolve`] falls back to the profile named
//! [`DEFAULT_PROFILE`].

use log::{info, warn};
use ron::extensions::Extensions;
use ron::ser::PrettyConfig;
use ron::{Number, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::serial::port::{ConnectionProfile, DataBits, Parity, STANDARD_BAUD_RATES, StopBits};

/// Configuration file path for stored profiles.
pub const PROFILE_FILE: &str = "config/profiles.ron";

/// Name of the fallback profile.
pub const DEFAULT_PROFILE: &str = "default";

/// One profile with its fields decoded but not yet validated.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RawProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    pub baud_rate: Option<u32>,
    pub parity: Option<String>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<f64>,
}

fn field<'v>(fields: &'v ron::Map, key: &str) -> Option<&'v Value> {
    let value = fields
        .iter()
        .find_map(|(k, v)| matches!(k, Value::String(k) if k == key).then_some(v))?;
    match value {
        Value::Option(inner) => inner.as_deref(),
        other => Some(other),
    }
}

fn describe(value: &Value) -> String {
    ron::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(Number::Integer(i)) => Some(*i),
        _ => None,
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(Number::Integer(i)) => Some(*i as f64),
        Value::Number(Number::Float(f)) => Some(f.get()),
        _ => None,
    }
}

impl RawProfile {
    /// Decode the fields of one stored profile.
    ///
    /// A field of the wrong type is an [`ConfigError::InvalidValue`]; absent
    /// fields stay `None` for [`RawProfile::validate`] to report.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, ConfigError> {
        let Value::Map(fields) = value else {
            return Err(ConfigError::invalid(name, "profile", describe(value)));
        };
        let invalid = |field: &'static str, value: &Value| {
            ConfigError::invalid(name, field, describe(value))
        };

        let port_name = match field(fields, "port_name") {
            Some(Value::String(port)) => Some(port.clone()),
            Some(other) => return Err(invalid("port_name", other)),
            None => None,
        };
        let baud_rate = match field(fields, "baud_rate") {
            Some(v) => Some(
                integer(v)
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| invalid("baud_rate", v))?,
            ),
            None => None,
        };
        let parity = match field(fields, "parity") {
            Some(Value::String(parity)) => Some(parity.clone()),
            Some(Value::Char(c)) => Some(c.to_string()),
            Some(other) => return Err(invalid("parity", other)),
            None => None,
        };
        let data_bits = match field(fields, "data_bits") {
            Some(v) => Some(
                integer(v)
                    .and_then(|i| u8::try_from(i).ok())
                    .ok_or_else(|| invalid("data_bits", v))?,
            ),
            None => None,
        };
        let stop_bits = match field(fields, "stop_bits") {
            Some(v) => Some(float(v).ok_or_else(|| invalid("stop_bits", v))?),
            None => None,
        };

        Ok(RawProfile {
            port_name,
            baud_rate,
            parity,
            data_bits,
            stop_bits,
        })
    }

    /// Check every field and build a [`ConnectionProfile`].
    pub fn validate(&self, name: &str) -> Result<ConnectionProfile, ConfigError> {
        let missing = |field| ConfigError::MissingField {
            profile: name.to_string(),
            field,
        };

        let baud_rate = self.baud_rate.ok_or_else(|| missing("baud_rate"))?;
        if !STANDARD_BAUD_RATES.contains(&baud_rate) {
            return Err(ConfigError::invalid(name, "baud_rate", baud_rate));
        }
        let parity_text = self.parity.as_deref().ok_or_else(|| missing("parity"))?;
        let parity: Parity = parity_text
            .parse()
            .map_err(|_| ConfigError::invalid(name, "parity", parity_text))?;
        let bits = self.data_bits.ok_or_else(|| missing("data_bits"))?;
        let data_bits = DataBits::from_bits(bits)
            .ok_or_else(|| ConfigError::invalid(name, "data_bits", bits))?;
        let stop = self.stop_bits.ok_or_else(|| missing("stop_bits"))?;
        let stop_bits = StopBits::from_value(stop)
            .ok_or_else(|| ConfigError::invalid(name, "stop_bits", stop))?;

        let profile = ConnectionProfile::new(baud_rate, parity, data_bits, stop_bits);
        Ok(match self.port_name.as_deref() {
            Some(port) => profile.with_port(port),
            None => profile,
        })
    }
}

impl From<&ConnectionProfile> for RawProfile {
    fn from(profile: &ConnectionProfile) -> Self {
        RawProfile {
            port_name: (!profile.port_name.is_empty()).then(|| profile.port_name.clone()),
            baud_rate: Some(profile.baud_rate),
            parity: Some(profile.parity.code().to_string()),
            data_bits: Some(profile.data_bits.bits()),
            stop_bits: Some(profile.stop_bits.value()),
        }
    }
}

/// The whole profile document, with every profile left undecoded.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfileDocument {
    pub profiles: BTreeMap<String, Value>,
}

/// A profile on its way back to disk.
#[derive(Serialize)]
#[serde(untagged)]
enum StoredProfile<'a> {
    Saved(RawProfile),
    Kept(&'a Value),
}

#[derive(Serialize)]
struct StoredDocument<'a> {
    profiles: BTreeMap<&'a str, StoredProfile<'a>>,
}

fn ron_options() -> ron::Options {
    ron::Options::default().with_default_extension(Extensions::IMPLICIT_SOME)
}

/// File-backed profile store.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    path: PathBuf,
}

impl Default for ProfileStore {
    fn default() -> Self {
        ProfileStore::new(PROFILE_FILE)
    }
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProfileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is an empty store.
    pub fn load_document(&self) -> Result<ProfileDocument, ConfigError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProfileDocument::default());
            }
            Err(e) => return Err(ConfigError::Io(e.to_string())),
        };
        ron_options()
            .from_str(&data)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn write_document(&self, document: &StoredDocument<'_>) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let data = ron_options()
            .to_string_pretty(document, PrettyConfig::new())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(&self.path, data).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Names of all stored profiles, sorted.
    pub fn list_profile_names(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.load_document()?.profiles.into_keys().collect())
    }

    /// Load and validate one profile.
    pub fn load_profile(&self, name: &str) -> Result<ConnectionProfile, ConfigError> {
        let document = self.load_document()?;
        let value = document
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        RawProfile::from_value(name, value)?.validate(name)
    }

    /// Store `profile` under `name`, replacing any profile with that name.
    pub fn save_profile(
        &self,
        name: &str,
        profile: &ConnectionProfile,
    ) -> Result<(), ConfigError> {
        profile.validate(name)?;
        let existing = self.load_document()?;
        let mut profiles: BTreeMap<&str, StoredProfile<'_>> = existing
            .profiles
            .iter()
            .map(|(key, value)| (key.as_str(), StoredProfile::Kept(value)))
            .collect();
        profiles.insert(name, StoredProfile::Saved(profile.into()));
        self.write_document(&StoredDocument { profiles })?;
        info!("Saved profile '{name}' to {}", self.path.display());
        Ok(())
    }

    /// Load `name`, falling back to [`DEFAULT_PROFILE`] when it is missing or
    /// invalid.
    ///
    /// Returns [`ConfigError::NoDefault`] when the fallback does not exist.
    pub fn resolve(&self, name: &str) -> Result<ConnectionProfile, ConfigError> {
        match self.load_profile(name) {
            Ok(profile) => Ok(profile),
            Err(e @ (ConfigError::Io(_) | ConfigError::Parse(_))) => Err(e),
            Err(e) if name == DEFAULT_PROFILE => Err(match e {
                ConfigError::UnknownProfile(_) => ConfigError::NoDefault,
                other => other,
            }),
            Err(e) => {
                warn!("{e}, falling back to '{DEFAULT_PROFILE}'");
                match self.load_profile(DEFAULT_PROFILE) {
                    Err(ConfigError::UnknownProfile(_)) => Err(ConfigError::NoDefault),
                    other => other,
                }
            }
        }
    }
}
