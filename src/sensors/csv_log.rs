//! Day-bucketed, append-only CSV log of sensor records.
//!
//! One file per local calendar date: `{data_dir}/{YYYYMMDD}_sensor_data.csv`.
//! A file's header is fixed when the file is created: the canonical columns
//! followed by the first record's extra fields in the record's own order.
//! Later rows follow that header; missing fields become empty cells and
//! fields the header doesn't know are dropped with a warning.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};

use super::record::SensorRecord;

/// Canonical column order for the smart plug this logger was built for.
pub const DEFAULT_COLUMNS: [&str; 11] = [
    "t",
    "online",
    "relay_status",
    "countdown_1",
    "switch_1",
    "cur_voltage",
    "cur_current",
    "cycle_time",
    "cur_power",
    "add_ele",
    "random_time",
];

#[derive(Debug, Clone)]
pub struct CsvLog {
    data_dir: PathBuf,
    columns: Vec<String>,
}

impl CsvLog {
    pub fn new(data_dir: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            columns,
        }
    }

    /// `{data_dir}/{YYYY}{MM}{DD}_sensor_data.csv`, zero padded.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("{}_sensor_data.csv", date.format("%Y%m%d")))
    }

    /// Append `record` to the file for `date`, writing the header first if
    /// the file is new or empty. Returns the path written to.
    pub async fn append(&self, record: &SensorRecord, date: NaiveDate) -> Result<PathBuf> {
        let path = self.path_for(date);
        fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", self.data_dir.display()))?;

        let existing = read_header(&path).await?;
        let (header, write_header) = match existing {
            Some(header) => (header, false),
            None => (self.header_for(record), true),
        };

        let dropped: Vec<&str> = record
            .names()
            .filter(|name| !header.iter().any(|c| c == name))
            .collect();
        if !dropped.is_empty() {
            warn!(
                path = %path.display(),
                fields = ?dropped,
                "Record has fields missing from the file header; dropping them"
            );
        }

        let cells: Vec<String> = header
            .iter()
            .map(|column| record.get(column).map(ToString::to_string).unwrap_or_default())
            .collect();
        let out = encode_rows(write_header.then_some(header.as_slice()), &cells)
            .with_context(|| format!("Failed to encode row for {}", path.display()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&out)
            .await
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.flush().await?;

        debug!(path = %path.display(), header_written = write_header, "Record appended");
        Ok(path)
    }

    /// Canonical columns, then the record's other fields in first-seen order.
    fn header_for(&self, record: &SensorRecord) -> Vec<String> {
        let mut header = self.columns.clone();
        for name in record.names() {
            if !header.iter().any(|c| c == name) {
                header.push(name.to_owned());
            }
        }
        header
    }
}

/// The header of an existing, non-empty file.
async fn read_header(path: &Path) -> Result<Option<Vec<String>>> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || read_header_blocking(&path))
        .await
        .context("CSV header reader task failed")?
}

fn read_header_blocking(path: &Path) -> Result<Option<Vec<String>>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    // Only the first record is read; the rest of the file is never touched.
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut first = csv::StringRecord::new();
    let found = reader
        .read_record(&mut first)
        .with_context(|| format!("Failed to read header of {}", path.display()))?;

    if !found || first.iter().all(|cell| cell.trim().is_empty()) {
        return Ok(None);
    }
    Ok(Some(first.iter().map(str::to_owned).collect()))
}

/// Encode an optional header line plus one row, minimally quoted, CRLF terminated.
fn encode_rows(header: Option<&[String]>, cells: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    if let Some(header) = header {
        writer.write_record(header)?;
    }
    writer.write_record(cells)?;
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}
