use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

use device_pool::search::Predicate;
use device_pool::{Credentials, DEFAULT_RENEWAL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, TokenType};

pub mod env;
pub mod wire;

/// default control plane address
pub static DEFAULT_HOST: &str = "device-pool.example.com:443";
/// default identity service
pub static DEFAULT_AUTHORITY_URL: &str = "https://authority.example.com";
/// env var consulted when the config carries no token
pub static TOKEN_ENV: &str = "DEVPOOL_TOKEN";

/// client config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    wire: wire::Config,
    path: Option<PathBuf>,
}

impl ClientConfig {
    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = Self::parse_str(input)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let s = s.as_ref();
        let wire: wire::Config = match serde_json::from_str(s) {
            Ok(wire) => wire,
            Err(_) => serde_yaml::from_str(s).context("config is neither valid JSON nor YAML")?,
        };
        debug!(host = %wire.host, simulated = wire.simulation.is_some(), "parsed client config");
        Ok(Self { wire, path: None })
    }

    pub fn host(&self) -> &str {
        &self.wire.host
    }

    /// Identity service for [`device_pool::HttpAuthProvider`]. The `devpool`
    /// binary only runs against a simulated plane and never reads it.
    pub fn authority_url(&self) -> &str {
        &self.wire.authority_url
    }

    pub fn token_type(&self) -> TokenType {
        self.wire.token_type
    }

    /// the control plane is reached without TLS only on localhost
    pub fn use_plaintext(&self) -> bool {
        self.wire.host.contains("localhost")
    }

    pub fn renewal_interval(&self) -> Duration {
        self.wire
            .renewal_interval
            .unwrap_or(DEFAULT_RENEWAL_INTERVAL)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.wire
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn release_on_stop(&self) -> bool {
        self.wire.release_on_stop
    }

    pub fn select(&self) -> Option<&Predicate> {
        self.wire.select.as_ref()
    }

    pub fn simulation(&self) -> Option<&wire::Simulation> {
        self.wire.simulation.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The configured token, else `DEVPOOL_TOKEN`.
    pub fn credentials(&self) -> Result<Credentials> {
        let configured = self
            .wire
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);
        match configured.or_else(|| env::var_non_blank(TOKEN_ENV)) {
            Some(token) => Ok(Credentials::new(token, self.wire.token_type)),
            None => bail!("no token configured, set `token` in the config or {TOKEN_ENV}"),
        }
    }
}
