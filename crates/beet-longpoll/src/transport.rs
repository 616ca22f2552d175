use anyhow::Result;
use async_trait::async_trait;
use beet_events::HistoryMessage;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::envelope::value_as_u64;

/// Connection parameters handed out by the platform for one long-poll session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongPollServer {
    pub key: String,
    pub server: String,
    #[serde(deserialize_with = "deserialize_lenient_u64")]
    pub ts: u64,
    #[serde(default, deserialize_with = "deserialize_lenient_u64")]
    pub pts: u64,
}

/// One page of missed history returned while replaying from a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    pub new_pts: Option<u64>,
}

#[async_trait]
/// Platform-facing side of the long-poll feed.
pub trait LongPollTransport: Send + Sync {
    async fn acquire_server(&self) -> Result<LongPollServer>;

    /// Blocks for up to `wait_secs` and returns the raw response body.
    async fn poll(&self, server: &LongPollServer, wait_secs: u64) -> Result<String>;

    async fn fetch_history(&self, ts: u64, pts: u64) -> Result<HistoryPage>;
}

#[async_trait]
/// Durable home of the history checkpoint (`pts`); `0` means nothing stored yet.
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<u64>;

    async fn save(&self, pts: u64) -> Result<()>;
}

pub(crate) fn deserialize_lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_u64(&value).ok_or_else(|| {
        serde::de::Error::custom(format!("expected unsigned integer, got {value}"))
    })
}

pub(crate) fn deserialize_lenient_optional_u64<'de, D>(
    deserializer: D,
) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_u64))
}
