//! Narrow capability traits the runtime consumes from its collaborators.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::history::HistoryMessage;

pub const FRIEND_REQUESTS_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_name: Option<String>,
}

impl ChatMember {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[async_trait]
/// Outbound platform calls available to handlers.
pub trait Messenger: Send + Sync {
    /// Sends `text` to `peer_id`, forwarding `forward_ids`; returns the new message id.
    async fn send_message(&self, peer_id: i64, text: &str, forward_ids: &[i64]) -> Result<i64>;

    async fn fetch_chat_members(&self, chat_id: i64) -> Result<Vec<ChatMember>>;

    /// One page (at most [`FRIEND_REQUESTS_PAGE_SIZE`] ids) of pending incoming friend requests.
    async fn fetch_friend_requests(&self, offset: usize) -> Result<Vec<i64>>;

    async fn approve_friend_request(&self, user_id: i64) -> Result<()>;
}

#[async_trait]
/// Consumer of decoded live events, fed in feed order.
pub trait EventSink: Send + Sync {
    async fn deliver(&self, events: Vec<Event>) -> Result<()>;
}

#[async_trait]
/// Append-only destination for backfilled history pages.
pub trait HistorySink: Send + Sync {
    async fn append_history(&self, messages: &[HistoryMessage]) -> Result<()>;
}
