use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use beet_dispatch::ConversationHandler;
use beet_events::Event;
use beet_routing::RouteTree;

/// Runs each conversation event through the bot's routes.
pub struct BotEventHandler {
    routes: RouteTree,
}

impl BotEventHandler {
    pub fn new(routes: RouteTree) -> Self {
        Self { routes }
    }
}

#[async_trait]
impl ConversationHandler for BotEventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Message(message) => {
                let invoked = self.routes.dispatch(Arc::new(message)).await?;
                tracing::trace!(invoked, "message routed");
            }
            Event::Service(service) => {
                tracing::info!(
                    peer_id = service.peer_id,
                    chat_id = service.chat_id,
                    actor_id = service.actor_id,
                    action = service.action.as_str(),
                    "chat service event"
                );
            }
        }
        Ok(())
    }
}
