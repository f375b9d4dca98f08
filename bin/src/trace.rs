//! tracing configuration
use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use config::env::parse_var_with_err;

/// log as "json", "pretty" or "standard" (unstructured)
static DEFAULT_LOG_FORMAT: &str = "standard";

#[derive(Debug)]
pub struct Config {
    /// formatting to apply to logs
    pub log_frmt: String,
}

impl Config {
    /// Install the global subscriber. Level comes from DEVPOOL_LOG, format
    /// from LOG_FORMAT.
    pub fn parse(devpool_log: &str) -> Result<Self> {
        let log_frmt: String = parse_var_with_err("LOG_FORMAT", DEFAULT_LOG_FORMAT)?;

        let filter = EnvFilter::try_new(devpool_log)
            .or_else(|_| EnvFilter::try_new("info"))?
            .add_directive("hyper=off".parse()?);

        match &log_frmt[..] {
            "json" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .event_format(Format::default().pretty().with_source_location(false))
                            .fmt_fields(PrettyFields::new()),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer())
                    .init();
            }
        }

        Ok(Self { log_frmt })
    }
}
