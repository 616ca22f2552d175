use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use beet_events::{Event, EventSink};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::worker::{spawn_worker, RetireRequest, WorkerSpec};


pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[async_trait]
/// Per-event logic run inside a conversation worker.
pub trait ConversationHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Idle time after which a worker is retired; `None` keeps workers forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(DEFAULT_WORKER_IDLE_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub active_workers: usize,
    pub spawned_workers: u64,
    pub retired_workers: u64,
    pub submitted_events: u64,
}

enum RouterCommand {
    Submit(Event),
    Stats(oneshot::Sender<DispatcherStats>),
    Shutdown(oneshot::Sender<()>),
}

struct WorkerSlot {
    generation: u64,
    mailbox: mpsc::UnboundedSender<Event>,
    forwarded: u64,
    task: JoinHandle<()>,
}

struct Router {
    handler: Arc<dyn ConversationHandler>,
    config: DispatcherConfig,
    retire_tx: mpsc::UnboundedSender<RetireRequest>,
    workers: HashMap<i64, WorkerSlot>,
    next_generation: u64,
    stats: DispatcherStats,
}

impl Router {
    fn new(
        handler: Arc<dyn ConversationHandler>,
        config: DispatcherConfig,
        retire_tx: mpsc::UnboundedSender<RetireRequest>,
    ) -> Self {
        Self {
            handler,
            config,
            retire_tx,
            workers: HashMap::new(),
            next_generation: 0,
            stats: DispatcherStats::default(),
        }
    }

    fn spawn_slot(&mut self, key: i64) -> WorkerSlot {
        self.next_generation = self.next_generation.saturating_add(1);
        self.stats.spawned_workers = self.stats.spawned_workers.saturating_add(1);
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let task = spawn_worker(
            WorkerSpec {
                key,
                generation: self.next_generation,
                handler: self.handler.clone(),
                idle_timeout: self.config.idle_timeout,
                retire_tx: self.retire_tx.clone(),
            },
            inbox,
        );
        WorkerSlot {
            generation: self.next_generation,
            mailbox,
            forwarded: 0,
            task,
        }
    }

    fn submit(&mut self, event: Event) {
        let key = event.conversation_key();
        self.stats.submitted_events = self.stats.submitted_events.saturating_add(1);
        if !self.workers.contains_key(&key) {
            let slot = self.spawn_slot(key);
            self.workers.insert(key, slot);
        }
        let Some(slot) = self.workers.get_mut(&key) else {
            return;
        };
        match slot.mailbox.send(event) {
            Ok(()) => slot.forwarded = slot.forwarded.saturating_add(1),
            Err(rejected) => {
                tracing::warn!(peer_id = key, "conversation worker exited unexpectedly, respawning");
                let mut slot = self.spawn_slot(key);
                if slot.mailbox.send(rejected.0).is_ok() {
                    slot.forwarded = 1;
                }
                self.workers.insert(key, slot);
            }
        }
    }

    /// Retires the worker only when everything forwarded to it was processed.
    fn retire(&mut self, request: RetireRequest) -> bool {
        let Some(slot) = self.workers.get(&request.key) else {
            return false;
        };
        if slot.generation != request.generation || slot.forwarded != request.processed {
            tracing::trace!(
                peer_id = request.key,
                forwarded = slot.forwarded,
                processed = request.processed,
                "retire request refused"
            );
            return false;
        }
        self.workers.remove(&request.key);
        self.stats.retired_workers = self.stats.retired_workers.saturating_add(1);
        tracing::debug!(peer_id = request.key, "idle conversation worker retired");
        true
    }

    fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            active_workers: self.workers.len(),
            ..self.stats
        }
    }

    /// Closes every mailbox and waits for the workers to drain them.
    async fn shutdown(&mut self) {
        let workers = self.workers.drain().collect::<Vec<_>>();
        for (key, slot) in workers {
            drop(slot.mailbox);
            if let Err(error) = slot.task.await {
                tracing::warn!(peer_id = key, %error, "conversation worker join failed");
            }
        }
    }
}

async fn run_router(
    mut router: Router,
    mut commands: mpsc::UnboundedReceiver<RouterCommand>,
    mut retire_rx: mpsc::UnboundedReceiver<RetireRequest>,
) {
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(RouterCommand::Submit(event)) => router.submit(event),
                Some(RouterCommand::Stats(reply)) => {
                    let _ = reply.send(router.stats());
                }
                Some(RouterCommand::Shutdown(reply)) => {
                    commands.close();
                    router.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                None => {
                    router.shutdown().await;
                    break;
                }
            },
            Some(request) = retire_rx.recv() => {
                router.retire(request);
            }
        }
    }
    tracing::debug!("conversation dispatcher stopped");
}

pub struct ConversationDispatcher;

impl ConversationDispatcher {
    /// Starts the router task on the current Tokio runtime.
    pub fn spawn(
        handler: Arc<dyn ConversationHandler>,
        config: DispatcherConfig,
    ) -> Result<DispatcherHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("conversation dispatcher requires an active Tokio runtime")?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        let router = Router::new(handler, config, retire_tx);
        runtime.spawn(run_router(router, commands_rx, retire_rx));
        Ok(DispatcherHandle {
            commands: commands_tx,
        })
    }
}

/// Cloneable entry point into a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::UnboundedSender<RouterCommand>,
}

impl DispatcherHandle {
    pub fn submit(&self, event: Event) -> Result<()> {
        self.commands
            .send(RouterCommand::Submit(event))
            .map_err(|_| anyhow!("conversation dispatcher is not running"))
    }

    pub async fn stats(&self) -> Result<DispatcherStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RouterCommand::Stats(reply_tx))
            .map_err(|_| anyhow!("conversation dispatcher is not running"))?;
        reply_rx
            .await
            .context("conversation dispatcher stopped before replying")
    }

    pub async fn active_workers(&self) -> Result<usize> {
        Ok(self.stats().await?.active_workers)
    }

    /// Stops accepting events and waits until every queued event was handled.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RouterCommand::Shutdown(reply_tx))
            .map_err(|_| anyhow!("conversation dispatcher is not running"))?;
        reply_rx
            .await
            .context("conversation dispatcher stopped before draining")
    }
}

#[async_trait]
impl EventSink for DispatcherHandle {
    async fn deliver(&self, events: Vec<Event>) -> Result<()> {
        for event in events {
            self.submit(event)?;
        }
        Ok(())
    }
}
