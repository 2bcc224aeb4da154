//! Target profiles.
//!
//! Everything that differs between controller variants lives here: device id,
//! baud rate, security parameters, flash layout, the RAM window kernels are
//! uploaded into, and named RAM addresses. Profiles are built in or loaded
//! from TOML at runtime.
//!
//! A TOML profile may name a built-in `base` and override only some fields:
//!
//! ```toml
//! base = "vy-v6"
//! name = "vy-v6-bench"
//!
//! [security]
//! max_failed_attempts = 10
//!
//! [ram.rpm]
//! address = 0x0083
//! confidence = "verified"
//! ```
//!
//! Nested tables merge key by key; arrays (banks, sectors) replace the base's.

use std::{collections::BTreeMap, fmt, fs, path::Path, time::Duration};

use aldl_proto::DeviceId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{FlashError, ProfileError},
    flash::{FlashLayout, Window},
    security::{SECURITY_MAGIC, SecurityConfig},
};

/// Default ALDL baud rate.
pub const DEFAULT_BAUD: u32 = 8192;

/// How much a RAM address can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Confirmed on hardware or by independent sources
    Verified,
    /// Single source, never checked
    #[default]
    Unverified,
    /// Sources disagree
    Disputed,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verified => "verified",
            Self::Unverified => "unverified",
            Self::Disputed => "disputed",
        })
    }
}

/// Named RAM location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamAddress {
    /// Address in use
    pub address: u16,
    /// Trust level
    #[serde(default)]
    pub confidence: Confidence,
    /// Competing candidates from other sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<u16>,
    /// Provenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Security handshake parameters as stored in a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityProfile {
    /// Key algorithm constant
    pub magic: u16,
    /// Rejections before the cooldown (0 disables)
    pub max_failed_attempts: u32,
    /// Cooldown length
    pub lockout_ms: u64,
    /// Idle time before an issued seed or unlock lapses
    pub idle_timeout_ms: u64,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        let config = SecurityConfig::default();
        Self {
            magic: SECURITY_MAGIC,
            max_failed_attempts: config.max_failed_attempts,
            lockout_ms: config.lockout.as_millis() as u64,
            idle_timeout_ms: config.idle_timeout.as_millis() as u64,
        }
    }
}

impl From<&SecurityProfile> for SecurityConfig {
    fn from(profile: &SecurityProfile) -> Self {
        Self {
            magic: profile.magic,
            max_failed_attempts: profile.max_failed_attempts,
            lockout: Duration::from_millis(profile.lockout_ms),
            idle_timeout: Duration::from_millis(profile.idle_timeout_ms),
        }
    }
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_upload_window() -> Window {
    Window { start: 0x0300, len: 0x0100 }
}

/// Complete description of one controller variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProfile {
    /// Profile name
    pub name: String,
    /// Device id the controller answers to
    pub device: DeviceId,
    /// Serial baud rate
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Handshake parameters
    #[serde(default)]
    pub security: SecurityProfile,
    /// Flash layout
    #[serde(default)]
    pub flash: FlashLayout,
    /// RAM window mode-6 kernels must fit in
    #[serde(default = "default_upload_window")]
    pub upload_window: Window,
    /// Named RAM addresses
    #[serde(default)]
    pub ram: BTreeMap<String, RamAddress>,
}

impl TargetProfile {
    /// Names accepted by [`TargetProfile::builtin`].
    pub const BUILTIN: [&'static str; 2] = ["vy-v6", "holden-f4"];

    /// VY V6 (`$060A` calibration, device 0xF7).
    pub fn vy_v6() -> Self {
        let ram = |address, confidence, alternatives: &[u16], note: &str| RamAddress {
            address,
            confidence,
            alternatives: alternatives.to_vec(),
            note: Some(note.to_string()),
        };

        let mut addresses = BTreeMap::new();
        addresses.insert(
            "rpm".to_string(),
            ram(
                0x00A2,
                Confidence::Disputed,
                &[0x0083],
                "labelled RPM by the XDF; input capture analysis suggests the period lives at 0x0083 and 0x00A2 is MAP",
            ),
        );
        addresses.insert(
            "coolant".to_string(),
            ram(0x0080, Confidence::Unverified, &[0x0092], "PE2/AN2"),
        );
        addresses.insert(
            "iat".to_string(),
            ram(0x0081, Confidence::Unverified, &[0x0094], "PE1/AN1"),
        );
        addresses.insert(
            "tps".to_string(),
            ram(0x0082, Confidence::Unverified, &[0x00F3, 0x0052], "throttle position"),
        );
        addresses.insert(
            "battery".to_string(),
            ram(0x0088, Confidence::Unverified, &[0x007B, 0x0065], "battery voltage"),
        );
        addresses.insert(
            "dwell".to_string(),
            ram(0x017B, Confidence::Verified, &[], "dwell calculation, two independent sources"),
        );

        Self {
            name: "vy-v6".to_string(),
            device: DeviceId::PcmVyV6,
            baud: DEFAULT_BAUD,
            security: SecurityProfile::default(),
            flash: FlashLayout::vy_v6(),
            upload_window: default_upload_window(),
            ram: addresses,
        }
    }

    /// Generic Holden PCM on device 0xF4, same layout as the VY V6.
    pub fn holden_f4() -> Self {
        Self {
            name: "holden-f4".to_string(),
            device: DeviceId::Pcm,
            ram: BTreeMap::new(),
            ..Self::vy_v6()
        }
    }

    /// Look up a built-in profile.
    pub fn builtin(name: &str) -> Result<Self, ProfileError> {
        match name {
            "vy-v6" => Ok(Self::vy_v6()),
            "holden-f4" => Ok(Self::holden_f4()),
            other => Err(ProfileError::UnknownProfile(other.to_string())),
        }
    }

    /// Parse a TOML profile, merging over `base` when one is named.
    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        let mut table: toml::Table = toml::from_str(text)?;

        let profile: Self = match table.remove("base") {
            Some(toml::Value::String(base)) => {
                let toml::Value::Table(mut merged) = toml::Value::try_from(Self::builtin(&base)?)
                    .map_err(|err| ProfileError::Invalid(err.to_string()))?
                else {
                    return Err(ProfileError::Invalid(format!("profile {base:?} did not render as a table")));
                };
                merge(&mut merged, table);
                toml::Value::Table(merged).try_into()?
            },
            Some(other) => {
                return Err(ProfileError::Invalid(format!(
                    "base must be a profile name, got {}",
                    other.type_str()
                )));
            },
            None => toml::Value::Table(table).try_into()?,
        };

        profile.validate()?;
        Ok(profile)
    }

    /// Read and parse a TOML profile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| ProfileError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    /// Resolve a built-in name or a path to a TOML file.
    pub fn resolve(name_or_path: &str) -> Result<Self, ProfileError> {
        if Self::BUILTIN.contains(&name_or_path) {
            Self::builtin(name_or_path)
        } else {
            Self::load(name_or_path)
        }
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ProfileError> {
        toml::to_string_pretty(self).map_err(|err| ProfileError::Invalid(err.to_string()))
    }

    /// Reject profiles whose values contradict each other.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.is_empty() {
            return Err(ProfileError::Invalid("profile name is empty".into()));
        }
        if self.baud == 0 {
            return Err(ProfileError::Invalid("baud must be above zero".into()));
        }
        if self.upload_window.len == 0 || self.upload_window.end() > 0x10000 {
            return Err(ProfileError::Invalid(
                "upload window must be non-empty and inside CPU space".into(),
            ));
        }
        self.flash.validate()
    }

    /// Security session parameters.
    pub fn security_config(&self) -> SecurityConfig {
        SecurityConfig::from(&self.security)
    }

    /// Refuse uploads that leave the kernel RAM window.
    pub fn check_upload(&self, load_addr: u16, len: usize) -> Result<(), FlashError> {
        if self.upload_window.contains(load_addr, len) {
            Ok(())
        } else {
            Err(FlashError::UploadOverflow {
                addr: load_addr,
                len,
                window_start: self.upload_window.start,
                window_len: self.upload_window.len,
            })
        }
    }

    /// Named RAM address, whatever its confidence.
    ///
    /// Disputed entries are logged every time they are used.
    pub fn ram_address(&self, name: &str) -> Result<&RamAddress, ProfileError> {
        let entry = self
            .ram
            .get(name)
            .ok_or_else(|| ProfileError::UnknownAddress(name.to_string()))?;

        if entry.confidence == Confidence::Disputed {
            warn!(
                profile = %self.name,
                name,
                address = entry.address,
                alternatives = ?entry.alternatives,
                "using disputed RAM address"
            );
        }

        Ok(entry)
    }

    /// Named RAM address, only if verified.
    pub fn verified_ram_address(&self, name: &str) -> Result<u16, ProfileError> {
        let entry = self
            .ram
            .get(name)
            .ok_or_else(|| ProfileError::UnknownAddress(name.to_string()))?;

        match entry.confidence {
            Confidence::Verified => Ok(entry.address),
            confidence => Err(ProfileError::Unverified { name: name.to_string(), confidence }),
        }
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::vy_v6()
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            },
            (_, value) => {
                base.insert(key, value);
            },
        }
    }
}
