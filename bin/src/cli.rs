//! Parse from either cli or env var

/// the default path to config
pub static DEFAULT_CONFIG_PATH: &str = "/etc/devpool/config.yaml";
/// default log level. Can use this argument or DEVPOOL_LOG env var
pub const DEFAULT_DEVPOOL_LOG: &str = "info";
/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "devpool-worker";
/// number of concurrent workers sharing one session
pub const DEFAULT_WORKERS: usize = 1;

use std::{path::PathBuf, time::Duration};

pub use clap::Parser;
use device_pool::search::{self, Predicate};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "devpool", bin_name = "devpool", about, long_about = None)]
/// parses from cli & environment var. `.env` in the working dir is loaded as well
pub struct Config {
    /// path to the client config
    #[clap(short, long, value_parser, env, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env, value_parser, default_value = DEFAULT_DEVPOOL_LOG)]
    pub devpool_log: String,
    /// device ids to reserve; overrides the config's `select`
    #[clap(short, long = "device", env = "DEVPOOL_DEVICES", value_delimiter = ',')]
    pub devices: Vec<String>,
    /// deeplink to send to every reserved device
    #[clap(long, env, value_parser)]
    pub deeplink: Option<String>,
    /// workers sharing the session, each reserving a slice of the devices
    #[clap(short, long, env, value_parser, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
    /// seconds to hold each reservation before releasing it
    #[clap(long, env, value_parser, default_value_t = 0)]
    pub hold_secs: u64,
    /// Worker thread name
    #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
    pub thread_name: String,
}

impl Config {
    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    /// Devices named on the command line, else `fallback`, else everything.
    pub fn selection(&self, fallback: Option<&Predicate>) -> Predicate {
        if !self.devices.is_empty() {
            search::or(self.devices.iter().map(search::device_id))
        } else {
            fallback.cloned().unwrap_or_else(|| search::and([]))
        }
    }
}
