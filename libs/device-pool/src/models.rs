//! Typed models for device listings, reservations and identities.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Device identity
// ---------------------------------------------------------------------------

/// Identifies one remote device. Equality and hashing use `(org, device)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRef {
    pub org: String,
    pub device: String,
}

impl DeviceRef {
    pub fn new(org: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.device)
    }
}

/// Opaque token proving ownership of a lease.
///
/// The `Debug` impl never prints the token itself.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationSecret(String);

impl ReservationSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the token is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ReservationSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReservationSecret(***)")
    }
}

impl From<String> for ReservationSecret {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

impl From<&str> for ReservationSecret {
    fn from(secret: &str) -> Self {
        Self(secret.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// Identity the server uses to scope authorization for a non-public device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerSpec {
    User(String),
    Group(String),
}

impl OwnerSpec {
    /// Derive the owner from listing metadata: a user owner wins over a group
    /// owner, and a device with neither is public.
    pub fn from_metadata(metadata: &DeviceMetadata) -> Option<Self> {
        let user = metadata.owner.user.trim();
        let group = metadata.owner.group.trim();
        if !user.is_empty() {
            Some(OwnerSpec::User(user.to_owned()))
        } else if !group.is_empty() {
            Some(OwnerSpec::Group(group.to_owned()))
        } else {
            None
        }
    }
}

/// Owner fields as they appear in a listing. Empty strings mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

// ---------------------------------------------------------------------------
// Listing records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    pub name: String,
    pub owner: Owner,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackData {
    pub device_make: String,
    pub rack: String,
    pub slot: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceData {
    pub device_model: String,
    pub platform: String,
    pub firmware_version: String,
}

/// One entry of a device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub reference: DeviceRef,
    #[serde(default)]
    pub metadata: DeviceMetadata,
    #[serde(default)]
    pub rack: RackData,
    #[serde(default)]
    pub device: DeviceData,
}

impl DeviceRecord {
    pub fn new(reference: DeviceRef) -> Self {
        Self {
            reference,
            metadata: DeviceMetadata::default(),
            rack: RackData::default(),
            device: DeviceData::default(),
        }
    }
}

/// Liveness and lock status reported by `check_alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveStatus {
    pub alive: bool,
    pub locked: bool,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The user a credential resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub org: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub teams: Vec<Team>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub org: String,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Command payloads
// ---------------------------------------------------------------------------

/// Remote-control redirector attached to a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectorType {
    Bigsur,
    Toledo,
    #[default]
    None,
}

impl fmt::Display for RedirectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectorType::Bigsur => write!(f, "bigsur"),
            RedirectorType::Toledo => write!(f, "toledo"),
            RedirectorType::None => write!(f, "none"),
        }
    }
}

impl FromStr for RedirectorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bigsur" => Ok(RedirectorType::Bigsur),
            "toledo" => Ok(RedirectorType::Toledo),
            "none" => Ok(RedirectorType::None),
            other => Err(format!("unknown redirector type '{other}'")),
        }
    }
}

/// Application to launch on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AppConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            version: None,
        }
    }
}

/// Options applied when an app launch should resolve to a deeplink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeeplinkParams {
    pub enable_debug_mode: bool,
    pub dry_run: bool,
    pub additional_params: HashMap<String, String>,
    pub disable_voice_out: bool,
    pub voice_guidance_mode: Option<String>,
    pub not_stackable: bool,
    pub enable_screensaver: bool,
}

impl DeeplinkParams {
    pub fn builder() -> DeeplinkParamsBuilder {
        DeeplinkParamsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeeplinkParamsBuilder {
    params: DeeplinkParams,
}

impl DeeplinkParamsBuilder {
    pub fn enable_debug_mode(mut self, enable: bool) -> Self {
        self.params.enable_debug_mode = enable;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.params.dry_run = dry_run;
        self
    }

    pub fn additional_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .additional_params
            .insert(key.into(), value.into());
        self
    }

    pub fn disable_voice_out(mut self, disable: bool) -> Self {
        self.params.disable_voice_out = disable;
        self
    }

    pub fn voice_guidance_mode(mut self, mode: impl Into<String>) -> Self {
        self.params.voice_guidance_mode = Some(mode.into());
        self
    }

    pub fn not_stackable(mut self, not_stackable: bool) -> Self {
        self.params.not_stackable = not_stackable;
        self
    }

    pub fn enable_screensaver(mut self, enable: bool) -> Self {
        self.params.enable_screensaver = enable;
        self
    }

    pub fn build(self) -> DeeplinkParams {
        self.params
    }
}
