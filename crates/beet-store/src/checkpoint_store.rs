use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use beet_longpoll::CheckpointStore;
use serde::{Deserialize, Serialize};

use crate::atomic_io::replace_file_atomically;

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CheckpointState {
    schema_version: u32,
    #[serde(default)]
    pts: u64,
    #[serde(default)]
    updated_unix_ms: i64,
}

/// Long-poll checkpoint kept in a small JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<Option<CheckpointState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read checkpoint file {}", self.path.display()))?;
        let state = serde_json::from_str::<CheckpointState>(&raw).with_context(|| {
            format!("failed to parse checkpoint file {}", self.path.display())
        })?;
        if state.schema_version != CHECKPOINT_SCHEMA_VERSION {
            bail!(
                "unsupported checkpoint schema: expected {}, found {}",
                CHECKPOINT_SCHEMA_VERSION,
                state.schema_version
            );
        }
        Ok(Some(state))
    }
}

#[async_trait]
impl CheckpointStore for JsonCheckpointStore {
    async fn load(&self) -> Result<u64> {
        Ok(self.read_state()?.map(|state| state.pts).unwrap_or(0))
    }

    async fn save(&self, pts: u64) -> Result<()> {
        let state = CheckpointState {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            pts,
            updated_unix_ms: chrono::Utc::now().timestamp_millis(),
        };
        let mut payload =
            serde_json::to_string_pretty(&state).context("failed to serialize checkpoint")?;
        payload.push('\n');
        replace_file_atomically(&self.path, &payload).with_context(|| {
            format!("failed to write checkpoint file {}", self.path.display())
        })?;
        tracing::trace!(pts, path = %self.path.display(), "checkpoint written");
        Ok(())
    }
}
