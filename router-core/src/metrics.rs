//! Usage Metrics: an append-only JSONL log of per-handle outcomes,
//! read once at startup to rank handles for preload.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::MetricsWriteError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One append-only record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRecord {
    pub ts: i64,
    pub handle: String,
    pub outcome: Outcome,
}

/// Persistent usage log and ranking.
pub struct UsageMetrics {
    path: PathBuf,
    file: Mutex<File>,
    /// In-memory mirror of every record ever logged or loaded, used for ranking
    /// without re-reading the file on every call.
    events: Mutex<Vec<UsageRecord>>,
}

impl UsageMetrics {
    /// Opens (creating if needed) the metrics file at `data_dir/usage_metrics.jsonl`
    /// in append mode, and loads existing records.
    pub fn open(data_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("usage_metrics.jsonl");
        let events = load_existing(&path);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file), events: Mutex::new(events) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file from disk, replacing the in-memory mirror.
    /// Malformed lines (e.g. a crash-truncated final line) are skipped with a
    /// warning and never block startup.
    pub fn load(&self) {
        let events = load_existing(&self.path);
        *self.events.lock().unwrap() = events;
    }

    /// Appends one record, flushing immediately so a crash loses at most this
    /// in-flight line. Never fails the turn: write errors are
    /// returned to the caller to log, not propagated as a hard failure.
    pub fn log(&self, handle: &str, outcome: Outcome, now_ms: i64) -> Result<(), MetricsWriteError> {
        let record = UsageRecord { ts: now_ms, handle: handle.to_string(), outcome };
        let line = serde_json::to_string(&record).map_err(|e| MetricsWriteError(e.to_string()))?;
        {
            let mut file = self.file.lock().unwrap();
            writeln!(file, "{}", line).map_err(|e| MetricsWriteError(e.to_string()))?;
            file.flush().map_err(|e| MetricsWriteError(e.to_string()))?;
        }
        self.events.lock().unwrap().push(record);
        Ok(())
    }

    /// Top-N handles by lifetime success count, descending; ties broken by most
    /// recent success timestamp, then by position in `catalog_order`. A handle
    /// with only failures ranks below any handle with >= 1 success.
    pub fn rank_top(&self, n: usize, catalog_order: &[String]) -> Vec<String> {
        let events = self.events.lock().unwrap();
        let mut success_count: HashMap<&str, u32> = HashMap::new();
        let mut most_recent_success: HashMap<&str, i64> = HashMap::new();

        for record in events.iter() {
            if record.outcome == Outcome::Success {
                *success_count.entry(&record.handle).or_insert(0) += 1;
                let entry = most_recent_success.entry(&record.handle).or_insert(record.ts);
                if record.ts > *entry {
                    *entry = record.ts;
                }
            } else {
                success_count.entry(&record.handle).or_insert(0);
            }
        }

        let catalog_position: HashMap<&str, usize> = catalog_order
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();

        let mut handles: Vec<&str> = success_count.keys().copied().collect();
        handles.sort_by(|a, b| {
            let count_a = success_count[a];
            let count_b = success_count[b];
            count_b
                .cmp(&count_a)
                .then_with(|| {
                    let ts_a = most_recent_success.get(a).copied().unwrap_or(i64::MIN);
                    let ts_b = most_recent_success.get(b).copied().unwrap_or(i64::MIN);
                    ts_b.cmp(&ts_a)
                })
                .then_with(|| {
                    let pos_a = catalog_position.get(a).copied().unwrap_or(usize::MAX);
                    let pos_b = catalog_position.get(b).copied().unwrap_or(usize::MAX);
                    pos_a.cmp(&pos_b)
                })
        });

        // Handles with zero successes only matter if no successful handle exists at all
        // among them; keep them but they naturally sort after any handle with count > 0.
        handles
            .into_iter()
            .filter(|h| success_count[h] > 0)
            .take(n)
            .map(str::to_string)
            .collect()
    }
}

fn load_existing(path: &Path) -> Vec<UsageRecord> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UsageRecord>(&line) {
            Ok(record) => out.push(record),
            Err(e) => tracing::warn!(lineno, error = %e, "usage metrics: skipping malformed line"),
        }
    }
    out
}
