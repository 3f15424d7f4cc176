//! Persisted outputs under the data directory.

use crate::config::StorageConfig;
use crate::engine::alerts::AlertRecord;
use crate::engine::runner::{EventResult, QueryEvent};
use crate::engine::tracker::BestRecord;
use crate::route::ROUTE_KEY_VERSION;
use crate::stats::RunStats;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Best-price map as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestFile {
    pub key_version: u32,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub updated_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub by_route: BTreeMap<String, BestRecord>,
}

impl Default for BestFile {
    fn default() -> Self {
        Self {
            key_version: ROUTE_KEY_VERSION,
            run_id: None,
            updated_utc: None,
            by_route: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Error,
}

/// One line of the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub ts_utc: DateTime<Utc>,
    pub run_id: String,
    pub route_key: String,
    pub route_id: String,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
    pub adults: u32,
    pub children: u32,
    pub cabin: String,
    pub currency: String,
    pub direct_only: bool,
    pub outcome: Outcome,
    pub offers_count: usize,
    #[serde(default)]
    pub best_price: Option<f64>,
    #[serde(default)]
    pub best_carrier: Option<String>,
    #[serde(default)]
    pub best_stops: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn from_event(run_id: &str, route_key: &str, event: &QueryEvent) -> Self {
        let i = &event.instance;
        let (outcome, offers_count, cheapest, error) = match &event.result {
            EventResult::Ok {
                offers_count,
                cheapest,
                ..
            } => (Outcome::Ok, *offers_count, cheapest.as_ref(), None),
            EventResult::Error(e) => (Outcome::Error, 0, None, Some(e.to_string())),
        };
        Self {
            ts_utc: event.at,
            run_id: run_id.to_string(),
            route_key: route_key.to_string(),
            route_id: i.route_id.clone(),
            origin: i.origin.clone(),
            destination: i.destination.clone(),
            departure_date: i.departure_date,
            return_date: i.return_date,
            adults: i.pax.adults,
            children: i.pax.children,
            cabin: i.cabin.clone(),
            currency: i.currency.clone(),
            direct_only: i.direct_only,
            outcome,
            offers_count,
            best_price: cheapest.map(|c| c.price_total),
            best_carrier: cheapest.map(|c| c.carrier.clone()),
            best_stops: cheapest.map(|c| c.stops),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertFeed {
    pub run_id: String,
    pub generated_utc: DateTime<Utc>,
    pub alerts: Vec<AlertRecord>,
}

pub struct Store {
    config: StorageConfig,
}

impl Store {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    pub fn best_path(&self) -> PathBuf {
        self.path(&self.config.best_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.path(&self.config.history_file)
    }

    pub fn alerts_path(&self) -> PathBuf {
        self.path(&self.config.alerts_file)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path(&self.config.summary_file)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path(&self.config.stats_file)
    }

    /// Load the best-price map. A missing file is an empty map. A file
    /// written under another key version is archived as `<stem>.v<N>.json`
    /// and tracking restarts empty.
    pub fn load_best(&self) -> Result<BestFile> {
        let path = self.best_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BestFile::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let raw: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        // Files without a version predate versioned keys.
        let version = raw
            .get("key_version")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(1);

        if version != ROUTE_KEY_VERSION {
            let archive = archive_path(&path, version);
            fs::rename(&path, &archive).with_context(|| {
                format!("Failed to archive {} to {}", path.display(), archive.display())
            })?;
            tracing::warn!(
                found = version,
                expected = ROUTE_KEY_VERSION,
                archived = %archive.display(),
                "best-price file uses another route key version, starting fresh"
            );
            return Ok(BestFile::default());
        }

        serde_json::from_value(raw).with_context(|| format!("Invalid best-price file {}", path.display()))
    }

    pub fn save_best(&self, file: &BestFile) -> Result<()> {
        write_json(&self.best_path(), file)
    }

    pub fn append_history(&self, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.history_path();
        ensure_parent(&path)?;
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        Ok(())
    }

    /// All parseable history lines, oldest first. Broken lines are skipped.
    pub fn read_history(&self) -> Result<Vec<HistoryRecord>> {
        let path = self.history_path();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping unreadable history line"),
            }
        }
        Ok(records)
    }

    pub fn write_alerts(&self, feed: &AlertFeed) -> Result<()> {
        write_json(&self.alerts_path(), feed)
    }

    pub fn write_summary(&self, markdown: &str) -> Result<()> {
        write_atomic(&self.summary_path(), markdown.as_bytes())
    }

    pub fn write_stats(&self, stats: &RunStats) -> Result<()> {
        write_json(&self.stats_path(), stats)
    }
}

fn archive_path(path: &Path, version: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "best".to_string());
    path.with_file_name(format!("{}.v{}.json", stem, version))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
