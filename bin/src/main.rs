#![allow(clippy::cognitive_complexity)]
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::{runtime::Builder, signal, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::*;

mod cli;
mod sim;
mod trace;

use cli::Parser;
use config::ClientConfig;
use device_pool::{Device, DevicePoolClient};

fn main() -> Result<()> {
    let dotenv_res = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.devpool_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv_res {
        debug!(?err, ".env file not loaded");
    }

    let rt = Builder::new_multi_thread()
        .thread_name(&config.thread_name)
        .enable_all()
        .build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { run(config).await }).await {
            Err(err) => {
                error!(?err, "devpool task failed");
                Err(anyhow!(err))
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                Err(err)
            }
            Ok(Ok(())) => {
                debug!("exiting...");
                Ok(())
            }
        }
    })
}

async fn run(config: cli::Config) -> Result<()> {
    debug!("parsing client config");
    let client_cfg = ClientConfig::parse(&config.config_path)?;
    info!(
        host = client_cfg.host(),
        plaintext = client_cfg.use_plaintext(),
        "loaded client config"
    );

    let sim = client_cfg
        .simulation()
        .context("config has no `simulation` section, nothing to connect to")?;
    let credentials = client_cfg.credentials()?;
    let plane = sim::build_plane(sim, credentials.token());

    let client = Arc::new(
        DevicePoolClient::builder()
            .stub(Arc::new(plane.clone()))
            .auth(Arc::new(plane))
            .credentials(credentials)
            .renewal_interval(client_cfg.renewal_interval())
            .shutdown_timeout(client_cfg.shutdown_timeout())
            .release_on_stop(client_cfg.release_on_stop())
            .build()?,
    );
    client.start().await?;

    let result = drive(&config, &client_cfg, &client).await;

    client.stop().await?;
    info!(
        granted = device_pool::metrics::RESERVATIONS_GRANTED.get(),
        released = device_pool::metrics::RELEASES_COMPLETED.get(),
        renewed = device_pool::metrics::RENEWALS_ATTEMPTED.get(),
        "session finished"
    );
    result
}

/// Select devices and hand them out to the workers, stopping early on ctrl-c.
async fn drive(
    config: &cli::Config,
    client_cfg: &ClientConfig,
    client: &Arc<DevicePoolClient>,
) -> Result<()> {
    let predicate = config.selection(client_cfg.select());
    let devices = client.search_devices(&predicate).await?;
    if devices.is_empty() {
        warn!(?predicate, "no devices matched");
        return Ok(());
    }
    info!(count = devices.len(), workers = config.workers(), "devices selected");

    let token = CancellationToken::new();
    let mut workers = JoinSet::new();
    let per_worker = devices.len().div_ceil(config.workers());
    for (id, chunk) in devices.chunks(per_worker).enumerate() {
        workers.spawn(work(
            id,
            Arc::clone(client),
            chunk.to_vec(),
            config.deeplink.clone(),
            config.hold(),
            token.clone(),
        ));
    }

    let mut failed = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ctrl-c received, releasing devices");
                token.cancel();
            }
            joined = workers.join_next() => {
                match joined {
                    None => break,
                    Some(Ok(Ok(released))) => debug!(released, "worker finished"),
                    Some(Ok(Err(err))) => {
                        failed += 1;
                        error!(?err, "worker failed");
                    }
                    Some(Err(err)) => {
                        failed += 1;
                        error!(?err, "worker panicked");
                    }
                }
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} worker(s) failed"));
    }
    Ok(())
}

/// Reserve `devices`, send the deeplink, hold, then release. Returns how many
/// devices were released.
async fn work(
    id: usize,
    client: Arc<DevicePoolClient>,
    devices: Vec<Device>,
    deeplink: Option<String>,
    hold: Duration,
    token: CancellationToken,
) -> Result<usize> {
    let reserved = client.reserve_all(&devices).await;
    if let Ok(secrets) = &reserved {
        info!(worker = id, count = secrets.len(), "devices reserved");
        if let Some(link) = &deeplink {
            for device in &devices {
                match device.deeplink(link).await {
                    Ok(resolved) => info!(worker = id, device = %device.reference(), %resolved, "deeplink sent"),
                    Err(err) => warn!(worker = id, device = %device.reference(), %err, "deeplink failed"),
                }
            }
        }
        tokio::select! {
            _ = token.cancelled() => debug!(worker = id, "hold interrupted"),
            _ = tokio::time::sleep(hold) => {}
        }
    }

    // release whatever was reserved, including after a partial reserve
    let reports = client.release_all(&devices).await?;
    let released = reports.iter().filter(|r| r.outcome.is_released()).count();
    for report in reports.iter().filter(|r| r.outcome.error().is_some()) {
        warn!(worker = id, device = %report.device, outcome = ?report.outcome, "release failed");
    }
    reserved.with_context(|| format!("worker {id} could not reserve its devices"))?;
    Ok(released)
}
