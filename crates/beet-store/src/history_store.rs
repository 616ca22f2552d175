//! Append-only JSONL message history with `(peer_id, message_id)` dedup.
//!
//! Live capture and history replay can both see the same message after a
//! reconnect; appending it twice is a no-op.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use beet_events::{HistoryMessage, HistorySink, MessageEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    Live,
    Replay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub peer_id: i64,
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    pub author_id: i64,
    pub text: String,
    pub date: DateTime<Utc>,
    pub source: HistorySource,
}

impl HistoryRecord {
    pub fn from_event(message: &MessageEvent) -> Self {
        Self {
            peer_id: message.peer_id,
            message_id: message.message_id,
            chat_id: message.chat_id(),
            author_id: message.sender.author_id(),
            text: message.text.clone(),
            date: unix_seconds_to_utc(message.timestamp),
            source: HistorySource::Live,
        }
    }

    pub fn from_history_message(message: &HistoryMessage) -> Self {
        Self {
            peer_id: message.peer_id(),
            message_id: message.id,
            chat_id: message.chat_id,
            author_id: message.user_id,
            text: message.body.clone(),
            date: unix_seconds_to_utc(message.date),
            source: HistorySource::Replay,
        }
    }

    pub fn key(&self) -> (i64, i64) {
        (self.peer_id, self.message_id)
    }
}

fn unix_seconds_to_utc(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

struct HistoryFile {
    file: File,
    seen: HashSet<(i64, i64)>,
}

#[derive(Clone)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: Arc<Mutex<HistoryFile>>,
}

impl JsonlHistoryStore {
    /// Opens (or creates) the log and indexes the records already in it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut seen = HashSet::new();
        if path.exists() {
            let existing = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            for (index, line) in BufReader::new(existing).lines().enumerate() {
                let line =
                    line.with_context(|| format!("failed to read {}", path.display()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<HistoryRecord>(&line) {
                    Ok(record) => {
                        seen.insert(record.key());
                    }
                    Err(error) => {
                        tracing::warn!(
                            path = %path.display(),
                            line = index + 1,
                            %error,
                            "skipping malformed history record"
                        );
                    }
                }
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        tracing::debug!(path = %path.display(), records = seen.len(), "history store opened");
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(HistoryFile { file, seen })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends records not stored yet; returns how many were written.
    pub fn append(&self, records: &[HistoryRecord]) -> Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("history store mutex is poisoned"))?;
        let mut written = 0_usize;
        for record in records {
            if inner.seen.contains(&record.key()) {
                continue;
            }
            let line = serde_json::to_string(record).context("failed to encode history record")?;
            writeln!(inner.file, "{line}")
                .with_context(|| format!("failed to append to {}", self.path.display()))?;
            inner.seen.insert(record.key());
            written = written.saturating_add(1);
        }
        if written > 0 {
            inner
                .file
                .flush()
                .with_context(|| format!("failed to flush {}", self.path.display()))?;
        }
        Ok(written)
    }

    pub fn contains(&self, peer_id: i64, message_id: i64) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.seen.contains(&(peer_id, message_id)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.seen.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads every stored record back in append order.
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<HistoryRecord>(line).ok())
            .collect())
    }
}

#[async_trait]
impl HistorySink for JsonlHistoryStore {
    async fn append_history(&self, messages: &[HistoryMessage]) -> Result<()> {
        let records = messages
            .iter()
            .map(HistoryRecord::from_history_message)
            .collect::<Vec<_>>();
        let written = self.append(&records)?;
        tracing::debug!(
            received = records.len(),
            written,
            "appended replayed history page"
        );
        Ok(())
    }
}
