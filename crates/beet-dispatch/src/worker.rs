use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beet_events::Event;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dispatcher::ConversationHandler;

/// Sent by an idle worker; `processed` lets the router tell whether anything
/// is still queued for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetireRequest {
    pub(crate) key: i64,
    pub(crate) generation: u64,
    pub(crate) processed: u64,
}

pub(crate) struct WorkerSpec {
    pub(crate) key: i64,
    pub(crate) generation: u64,
    pub(crate) handler: Arc<dyn ConversationHandler>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) retire_tx: mpsc::UnboundedSender<RetireRequest>,
}

pub(crate) fn spawn_worker(
    spec: WorkerSpec,
    mailbox: mpsc::UnboundedReceiver<Event>,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(spec, mailbox))
}

async fn run_worker(spec: WorkerSpec, mut mailbox: mpsc::UnboundedReceiver<Event>) {
    let WorkerSpec {
        key,
        generation,
        handler,
        idle_timeout,
        retire_tx,
    } = spec;
    tracing::debug!(peer_id = key, generation, "conversation worker started");

    let mut processed = 0_u64;
    let mut retiring = false;
    loop {
        let next = match idle_timeout {
            Some(idle) if !retiring => match tokio::time::timeout(idle, mailbox.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    retiring = true;
                    let request = RetireRequest {
                        key,
                        generation,
                        processed,
                    };
                    if retire_tx.send(request).is_err() {
                        tracing::debug!(peer_id = key, "router gone before retire request");
                    }
                    continue;
                }
            },
            _ => mailbox.recv().await,
        };
        let Some(event) = next else {
            break;
        };
        retiring = false;
        handle_event(handler.as_ref(), key, event).await;
        processed = processed.saturating_add(1);
    }
    tracing::debug!(peer_id = key, generation, processed, "conversation worker stopped");
}

async fn handle_event(handler: &dyn ConversationHandler, key: i64, event: Event) {
    let message_id = event.message_id();
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::error!(
                peer_id = key,
                message_id,
                error = %format!("{error:#}"),
                "conversation handler failed"
            );
        }
        Err(payload) => {
            tracing::error!(
                peer_id = key,
                message_id,
                panic = %panic_message(payload.as_ref()),
                "conversation handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
