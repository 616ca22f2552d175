use anyhow::Result;
use async_trait::async_trait;
use beet_events::{HistoryMessage, HistorySink};
use beet_store::JsonlHistoryStore;

/// Backfill destination that keeps ordinary chat messages only.
#[derive(Clone)]
pub struct ChatHistorySink {
    store: JsonlHistoryStore,
}

impl ChatHistorySink {
    pub fn new(store: JsonlHistoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistorySink for ChatHistorySink {
    async fn append_history(&self, messages: &[HistoryMessage]) -> Result<()> {
        let kept = messages
            .iter()
            .filter(|message| message.is_from_chat() && !message.is_service_action())
            .cloned()
            .collect::<Vec<_>>();
        tracing::debug!(
            received = messages.len(),
            kept = kept.len(),
            "filtered replayed history page"
        );
        if kept.is_empty() {
            return Ok(());
        }
        self.store.append_history(&kept).await
    }
}
