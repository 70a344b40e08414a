mod clock;
mod config;
mod secrets;
mod sensors;
mod solar;
#[cfg(test)]
mod testing;
mod tuya;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    clock::{Clock, SystemClock},
    config::Config,
    secrets::{FileSecretStore, StdinPrompter},
    sensors::{csv_log::CsvLog, Poller},
    tuya::{
        token::{RetryPolicy, TokenManager},
        ReqwestTransport, TuyaClient,
    },
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env; env vars may also be set externally
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load config
    let config = Config::from_env()?;

    // Resolve credentials once, before anything talks to the cloud
    let store = FileSecretStore::new(&config.secrets_file);
    let credentials = secrets::load_credentials(&config.credentials, &store, &StdinPrompter)
        .context("Failed to load Tuya credentials")?;
    info!(device_id = %credentials.device_id, "Credentials loaded");

    // Solar window for today, fixed for the rest of the run
    let clock = SystemClock;
    let today = config.location.today(clock.now());
    let window = solar::compute_window(&config.location, today)
        .with_context(|| format!("Failed to compute sunrise/sunset for {today}"))?;

    let transport = ReqwestTransport::new(
        &config.tuya_base_url,
        Duration::from_secs(config.http_timeout_secs),
    )?;

    let mut poller = Poller::new(
        TuyaClient::new(transport, credentials),
        TokenManager::new(RetryPolicy::default()),
        clock,
        CsvLog::new(&config.data_dir, config.csv_columns.clone()),
        config.location,
        window,
    );

    poller.run().await?;

    info!("Done for today");
    Ok(())
}
