use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;

use crate::{
    secrets::CredentialOverrides,
    sensors::csv_log::DEFAULT_COLUMNS,
    solar::Location,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub tuya_base_url: String,
    /// Credentials set here skip the secret store entirely.
    pub credentials: CredentialOverrides,
    pub secrets_file: PathBuf,
    /// Directory the daily CSV files are written to.
    pub data_dir: PathBuf,
    /// Canonical CSV column order.
    /// Format: `"t,online,cur_power"`.
    pub csv_columns: Vec<String>,
    pub location: Location,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            tuya_base_url: optional("TUYA_BASE_URL", "https://openapi.tuyaeu.com"),
            credentials: CredentialOverrides {
                access_id: std::env::var("TUYA_ACCESS_ID").ok(),
                access_secret: std::env::var("TUYA_ACCESS_SECRET").ok(),
                device_id: std::env::var("TUYA_DEVICE_ID").ok(),
            },
            secrets_file: std::env::var("SECRETS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_secrets_file()),
            data_dir: PathBuf::from(optional("DATA_DIR", "data")),
            csv_columns: parse_columns(&std::env::var("CSV_COLUMNS").unwrap_or_default()),
            location: Location {
                latitude: optional("LATITUDE", "52.2722878")
                    .parse()
                    .context("LATITUDE must be a number of degrees")?,
                longitude: optional("LONGITUDE", "10.3630728")
                    .parse()
                    .context("LONGITUDE must be a number of degrees")?,
                altitude_m: optional("ALTITUDE", "75")
                    .parse()
                    .context("ALTITUDE must be a number of metres")?,
                timezone: parse_timezone(&optional("TZ_NAME", "Europe/Berlin"))?,
            },
            http_timeout_secs: parse_timeout(&optional("HTTP_TIMEOUT_SECS", "15"))?,
        })
    }
}

/// `"a, b,c"` → `["a", "b", "c"]`; empty input means the built-in schema.
fn parse_columns(raw: &str) -> Vec<String> {
    let columns: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if columns.is_empty() {
        DEFAULT_COLUMNS.iter().map(|c| (*c).to_owned()).collect()
    } else {
        columns
    }
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("TZ_NAME {name:?} is not a known time zone: {e}"))
}

fn parse_timeout(raw: &str) -> Result<u64> {
    let secs: u64 = raw
        .trim()
        .parse()
        .context("HTTP_TIMEOUT_SECS must be a positive integer")?;
    if secs == 0 {
        anyhow::bail!("HTTP_TIMEOUT_SECS must be at least 1 second");
    }
    Ok(secs)
}

fn default_secrets_file() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".config/tuya-sensor-logger/secrets.json"))
        .unwrap_or_else(|_| PathBuf::from("secrets.json"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
