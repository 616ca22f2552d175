//! Per-conversation quiz registry.
//!
//! A registry task owns `peer_id -> session` and forwards every request for a
//! conversation to that conversation's session task in arrival order. Callers
//! await each request until the session has applied it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use beet_events::Messenger;
use tokio::sync::{mpsc, oneshot};

use crate::corpus::QuestionSource;
use crate::replies;
use crate::session::{
    announce, spawn_session, SessionCommand, SessionEnded, SessionSpec, StopOutcome,
};

#[cfg(test)]
mod tests;

pub const DEFAULT_HINT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_HINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizConfig {
    pub hint_interval: Duration,
    /// Pause between a finished round and the next question.
    pub advance_delay: Duration,
    pub max_hints: usize,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            hint_interval: DEFAULT_HINT_INTERVAL,
            advance_delay: DEFAULT_ADVANCE_DELAY,
            max_hints: DEFAULT_MAX_HINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Active,
    /// Answered or timed out; waiting for the next question.
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSnapshot {
    pub question: String,
    pub answer: String,
    pub hints_revealed: usize,
    pub state: RoundState,
    pub question_message_id: i64,
    pub hint_pending: bool,
    pub advance_pending: bool,
}

enum RegistryCommand {
    Session {
        peer_id: i64,
        command: SessionCommand,
    },
    ActiveSessions(oneshot::Sender<usize>),
}

struct SessionSlot {
    generation: u64,
    mailbox: mpsc::UnboundedSender<SessionCommand>,
}

struct Registry {
    messenger: Arc<dyn Messenger>,
    questions: Arc<dyn QuestionSource>,
    config: QuizConfig,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
    sessions: HashMap<i64, SessionSlot>,
    next_generation: u64,
}

impl Registry {
    fn spawn_slot(&mut self, peer_id: i64) -> SessionSlot {
        self.next_generation = self.next_generation.saturating_add(1);
        let (mailbox, inbox) = mpsc::unbounded_channel();
        spawn_session(
            SessionSpec {
                peer_id,
                generation: self.next_generation,
                messenger: self.messenger.clone(),
                questions: self.questions.clone(),
                config: self.config,
                ended_tx: self.ended_tx.clone(),
            },
            inbox,
        );
        SessionSlot {
            generation: self.next_generation,
            mailbox,
        }
    }

    fn route(&mut self, peer_id: i64, command: SessionCommand) {
        let is_stop = matches!(command, SessionCommand::Stop { .. });
        let sent = match self.sessions.get(&peer_id) {
            Some(slot) => slot.mailbox.send(command).map_err(|rejected| rejected.0),
            None => Err(command),
        };
        let command = match sent {
            Ok(()) => {
                if is_stop {
                    self.sessions.remove(&peer_id);
                }
                return;
            }
            Err(command) => {
                self.sessions.remove(&peer_id);
                command
            }
        };

        if !matches!(command, SessionCommand::Start { .. }) {
            command.reply_absent();
            return;
        }
        let slot = self.spawn_slot(peer_id);
        match slot.mailbox.send(command) {
            Ok(()) => {
                self.sessions.insert(peer_id, slot);
            }
            Err(rejected) => rejected.0.reply_absent(),
        }
    }

    fn forget(&mut self, ended: SessionEnded) {
        let current = self
            .sessions
            .get(&ended.peer_id)
            .is_some_and(|slot| slot.generation == ended.generation);
        if current {
            self.sessions.remove(&ended.peer_id);
            tracing::debug!(peer_id = ended.peer_id, "ended quiz session forgotten");
        }
    }
}

async fn run_registry(
    mut registry: Registry,
    mut commands: mpsc::UnboundedReceiver<RegistryCommand>,
    mut ended_rx: mpsc::UnboundedReceiver<SessionEnded>,
) {
    loop {
        tokio::select! {
            biased;
            Some(ended) = ended_rx.recv() => registry.forget(ended),
            command = commands.recv() => match command {
                Some(RegistryCommand::Session { peer_id, command }) => registry.route(peer_id, command),
                Some(RegistryCommand::ActiveSessions(reply)) => {
                    let _ = reply.send(registry.sessions.len());
                }
                None => break,
            },
        }
    }
    tracing::debug!(sessions = registry.sessions.len(), "quiz registry stopped");
}

/// Cloneable handle to the quiz registry.
#[derive(Clone)]
pub struct QuizEngine {
    commands: mpsc::UnboundedSender<RegistryCommand>,
    messenger: Arc<dyn Messenger>,
}

impl QuizEngine {
    /// Starts the registry task on the current Tokio runtime.
    pub fn spawn(
        messenger: Arc<dyn Messenger>,
        questions: Arc<dyn QuestionSource>,
        config: QuizConfig,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("quiz engine requires an active Tokio runtime")?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let registry = Registry {
            messenger: messenger.clone(),
            questions,
            config,
            ended_tx,
            sessions: HashMap::new(),
            next_generation: 0,
        };
        runtime.spawn(run_registry(registry, commands_rx, ended_rx));
        Ok(Self {
            commands: commands_tx,
            messenger,
        })
    }

    fn send(&self, peer_id: i64, command: SessionCommand) -> Result<()> {
        self.commands
            .send(RegistryCommand::Session { peer_id, command })
            .map_err(|_| anyhow!("quiz engine is not running"))
    }

    /// Starts a quiz in `peer_id`, or reminds the chat of the running one.
    pub async fn start(&self, peer_id: i64, trigger_message_id: i64) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            peer_id,
            SessionCommand::Start {
                trigger_message_id,
                reply,
            },
        )?;
        reply_rx
            .await
            .context("quiz session stopped before replying")?
    }

    pub async fn stop(&self, peer_id: i64, trigger_message_id: i64) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            peer_id,
            SessionCommand::Stop {
                trigger_message_id,
                reply,
            },
        )?;
        let outcome = reply_rx
            .await
            .context("quiz session stopped before replying")?;
        if outcome == StopOutcome::NotRunning {
            announce(
                self.messenger.as_ref(),
                peer_id,
                replies::NOT_RUNNING,
                trigger_message_id,
            )
            .await;
        }
        Ok(())
    }

    /// Returns whether `text` answered the current round. Without a running
    /// quiz the text is ignored.
    pub async fn check_answer(&self, peer_id: i64, message_id: i64, text: &str) -> Result<bool> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(
            peer_id,
            SessionCommand::CheckAnswer {
                message_id,
                text: text.to_string(),
                reply,
            },
        )?;
        Ok(reply_rx.await.unwrap_or(false))
    }

    pub async fn snapshot(&self, peer_id: i64) -> Result<Option<QuizSnapshot>> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(peer_id, SessionCommand::Snapshot(reply))?;
        Ok(reply_rx.await.unwrap_or(None))
    }

    pub async fn active_sessions(&self) -> Result<usize> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::ActiveSessions(reply))
            .map_err(|_| anyhow!("quiz engine is not running"))?;
        reply_rx.await.context("quiz registry stopped before replying")
    }
}
