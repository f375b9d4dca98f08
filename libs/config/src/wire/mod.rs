//! On-disk config format.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};

use device_pool::TokenType;
use device_pool::models::Owner;
use device_pool::search::Predicate;

/// top-level config type
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default)]
    pub token_type: TokenType,
    /// falls back to the `DEVPOOL_TOKEN` env var when absent
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub renewal_interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub shutdown_timeout: Option<Duration>,
    #[serde(default)]
    pub release_on_stop: bool,
    /// devices to work on when none are named on the command line
    #[serde(default)]
    pub select: Option<Predicate>,
    #[serde(default)]
    pub simulation: Option<Simulation>,
}

fn default_host() -> String {
    crate::DEFAULT_HOST.to_owned()
}

fn default_authority_url() -> String {
    crate::DEFAULT_AUTHORITY_URL.to_owned()
}

/// An in-process control plane to run against instead of a real one.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub org: String,
    #[serde(default = "default_sim_user")]
    pub user: String,
    /// server-side lease lifetime; leases never expire when unset
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub lease_ttl: Option<Duration>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub devices: Vec<SimDevice>,
}

fn default_sim_user() -> String {
    "simulator".to_owned()
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default = "default_alive")]
    pub alive: bool,
}

fn default_alive() -> bool {
    true
}

/// Parse a duration string with optional time units
/// Accepts: "30", "30s", "5m", "1h"
/// If no unit is specified, assumes seconds
fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::Error::msg("empty duration string"));
    }

    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    // split units
    let (num, unit) = s.split_at(end);
    let num = num.parse::<u64>().context("invalid number")?;

    let num_seconds = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => anyhow::bail!(
            "unknown time unit '{}', only 'h', 'm', or 's' are supported",
            other
        ),
    };

    num.checked_mul(num_seconds)
        .context("duration value overflow")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDuration {
    Seconds(u64),
    String(String),
}

impl WireDuration {
    fn into_nonzero<E: de::Error>(self) -> Result<Duration, E> {
        let secs = match self {
            WireDuration::Seconds(val) => val,
            WireDuration::String(s) => parse_duration(&s).map_err(E::custom)?,
        };
        if secs == 0 {
            return Err(E::custom("duration cannot be zero"));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn deserialize_optional_duration<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireDuration>::deserialize(de)?
        .map(WireDuration::into_nonzero)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration("30s").unwrap(), 30);
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert_eq!(parse_duration(" 90m ").unwrap(), 5400);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("60d").is_err());
        assert!(parse_duration("60mins").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("99999999999999999999h").is_err());
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg: Config = serde_yaml::from_str("release_on_stop: false\n").unwrap();
        assert_eq!(cfg.host, crate::DEFAULT_HOST);
        assert_eq!(cfg.authority_url, crate::DEFAULT_AUTHORITY_URL);
        assert_eq!(cfg.token_type, TokenType::ApiKey);
        assert!(cfg.renewal_interval.is_none());
        assert!(cfg.simulation.is_none());
    }

    #[test]
    fn test_durations_int_or_string() {
        let cfg: Config =
            serde_yaml::from_str("renewal_interval: 45\nshutdown_timeout: \"2m\"\n").unwrap();
        assert_eq!(cfg.renewal_interval, Some(Duration::from_secs(45)));
        assert_eq!(cfg.shutdown_timeout, Some(Duration::from_secs(120)));

        assert!(serde_yaml::from_str::<Config>("renewal_interval: 0\n").is_err());
        assert!(serde_yaml::from_str::<Config>("renewal_interval: \"0s\"\n").is_err());
        assert!(serde_yaml::from_str::<Config>("renewal_interval: \"5d\"\n").is_err());
    }

    #[test]
    fn test_simulation_section() {
        let yaml = r#"
simulation:
  org: acme
  lease_ttl: 1m
  devices:
    - id: stb-1
      make: X
      owner:
        group: qa
    - id: stb-2
      alive: false
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let sim = cfg.simulation.unwrap();
        assert_eq!(sim.user, "simulator");
        assert_eq!(sim.lease_ttl, Some(Duration::from_secs(60)));
        assert_eq!(sim.devices.len(), 2);
        assert_eq!(sim.devices[0].owner.group, "qa");
        assert!(sim.devices[0].alive);
        assert!(!sim.devices[1].alive);
    }
}
