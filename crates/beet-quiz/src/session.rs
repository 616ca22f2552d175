//! One conversation's quiz, run as its own task.
//!
//! Both timers live as deadline fields polled by the session's select loop.
//! A transition that supersedes a timer clears its field in the same step,
//! so a cancelled timer has nothing left to fire.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use beet_events::Messenger;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::corpus::{QuestionSource, QuizQuestion};
use crate::engine::{QuizConfig, QuizSnapshot, RoundState};
use crate::hint::{can_reveal_more, make_hint};
use crate::replies;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    Stopped,
    NotRunning,
}

pub(crate) enum SessionCommand {
    Start {
        trigger_message_id: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        trigger_message_id: i64,
        reply: oneshot::Sender<StopOutcome>,
    },
    CheckAnswer {
        message_id: i64,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<Option<QuizSnapshot>>),
}

impl SessionCommand {
    /// Answers the command as if no quiz were running.
    pub(crate) fn reply_absent(self) {
        match self {
            SessionCommand::Start { reply, .. } => {
                let _ = reply.send(Err(anyhow!("quiz session ended before the request was applied")));
            }
            SessionCommand::Stop { reply, .. } => {
                let _ = reply.send(StopOutcome::NotRunning);
            }
            SessionCommand::CheckAnswer { reply, .. } => {
                let _ = reply.send(false);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(None);
            }
        }
    }
}

/// Reported by a session that ended on its own, so the registry can forget it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionEnded {
    pub(crate) peer_id: i64,
    pub(crate) generation: u64,
}

pub(crate) struct SessionSpec {
    pub(crate) peer_id: i64,
    pub(crate) generation: u64,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) questions: Arc<dyn QuestionSource>,
    pub(crate) config: QuizConfig,
    pub(crate) ended_tx: mpsc::UnboundedSender<SessionEnded>,
}

pub(crate) fn spawn_session(spec: SessionSpec, mailbox: mpsc::UnboundedReceiver<SessionCommand>) {
    tokio::spawn(run_session(spec, mailbox));
}

/// Sends a quiz message; failures are logged and swallowed.
pub(crate) async fn announce(messenger: &dyn Messenger, peer_id: i64, text: &str, forward_id: i64) {
    if let Err(error) = messenger.send_message(peer_id, text, &[forward_id]).await {
        tracing::warn!(
            peer_id,
            error = %format!("{error:#}"),
            "failed to send quiz message"
        );
    }
}

struct Round {
    question: QuizQuestion,
    hints_revealed: usize,
    state: RoundState,
    question_message_id: i64,
}

enum Flow {
    Continue,
    Stopped,
    Failed {
        error: anyhow::Error,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

struct QuizSession {
    peer_id: i64,
    messenger: Arc<dyn Messenger>,
    questions: Arc<dyn QuestionSource>,
    config: QuizConfig,
    round: Option<Round>,
    hint_deadline: Option<Instant>,
    advance_deadline: Option<Instant>,
}

impl QuizSession {
    async fn handle(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Start {
                trigger_message_id,
                reply,
            } => {
                if self.round.is_none() {
                    return match self.start_round().await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                            Flow::Continue
                        }
                        Err(error) => Flow::Failed {
                            error,
                            reply: Some(reply),
                        },
                    };
                }
                self.remind(trigger_message_id).await;
                let _ = reply.send(Ok(()));
                Flow::Continue
            }
            SessionCommand::Stop {
                trigger_message_id,
                reply,
            } => {
                self.hint_deadline = None;
                self.advance_deadline = None;
                let text = match self.round.as_ref().map(|round| round.state) {
                    Some(RoundState::Active) => replies::STOPPED_WITHOUT_ANSWER,
                    _ => replies::STOPPED_AFTER_ANSWER,
                };
                announce(self.messenger.as_ref(), self.peer_id, text, trigger_message_id).await;
                let _ = reply.send(StopOutcome::Stopped);
                Flow::Stopped
            }
            SessionCommand::CheckAnswer {
                message_id,
                text,
                reply,
            } => {
                let correct = self.accept_answer(message_id, &text).await;
                let _ = reply.send(correct);
                Flow::Continue
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Flow::Continue
            }
        }
    }

    async fn start_round(&mut self) -> Result<()> {
        self.hint_deadline = None;
        self.advance_deadline = None;
        let question = self
            .questions
            .pick()
            .context("quiz question source is empty")?;
        let question_message_id = self
            .messenger
            .send_message(self.peer_id, &question.question, &[])
            .await
            .with_context(|| format!("failed to send quiz question to peer {}", self.peer_id))?;
        tracing::debug!(peer_id = self.peer_id, question_message_id, "quiz round started");
        self.round = Some(Round {
            question,
            hints_revealed: 0,
            state: RoundState::Active,
            question_message_id,
        });
        self.hint_deadline = Some(deadline_after(self.config.hint_interval));
        Ok(())
    }

    async fn remind(&self, trigger_message_id: i64) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        let text = match round.state {
            RoundState::Active => replies::already_running_active(
                &round.question.question,
                &make_hint(&round.question.answer, round.hints_revealed),
            ),
            RoundState::Paused => replies::already_running_paused(),
        };
        announce(self.messenger.as_ref(), self.peer_id, &text, trigger_message_id).await;
    }

    async fn accept_answer(&mut self, message_id: i64, text: &str) -> bool {
        let Some(round) = self.round.as_mut() else {
            return false;
        };
        if round.state != RoundState::Active
            || !text
                .trim_start()
                .to_lowercase()
                .starts_with(&round.question.answer.to_lowercase())
        {
            return false;
        }
        round.state = RoundState::Paused;
        self.hint_deadline = None;
        self.advance_deadline = Some(deadline_after(self.config.advance_delay));
        tracing::debug!(peer_id = self.peer_id, message_id, "quiz answered");
        announce(
            self.messenger.as_ref(),
            self.peer_id,
            replies::CORRECT_ANSWER,
            message_id,
        )
        .await;
        true
    }

    async fn reveal_hint(&mut self) {
        self.hint_deadline = None;
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.state != RoundState::Active {
            return;
        }
        let answer = round.question.answer.as_str();
        let text = if can_reveal_more(answer, round.hints_revealed, self.config.max_hints) {
            round.hints_revealed += 1;
            self.hint_deadline = Some(deadline_after(self.config.hint_interval));
            replies::hint(&make_hint(answer, round.hints_revealed))
        } else {
            round.state = RoundState::Paused;
            self.advance_deadline = Some(deadline_after(self.config.advance_delay));
            replies::nobody_answered(answer)
        };
        let question_message_id = round.question_message_id;
        announce(self.messenger.as_ref(), self.peer_id, &text, question_message_id).await;
    }

    fn snapshot(&self) -> Option<QuizSnapshot> {
        self.round.as_ref().map(|round| QuizSnapshot {
            question: round.question.question.clone(),
            answer: round.question.answer.clone(),
            hints_revealed: round.hints_revealed,
            state: round.state,
            question_message_id: round.question_message_id,
            hint_pending: self.hint_deadline.is_some(),
            advance_pending: self.advance_deadline.is_some(),
        })
    }
}

/// Deadlines past what `Instant` can represent are clamped to roughly thirty years.
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_session(spec: SessionSpec, mut mailbox: mpsc::UnboundedReceiver<SessionCommand>) {
    let SessionSpec {
        peer_id,
        generation,
        messenger,
        questions,
        config,
        ended_tx,
    } = spec;
    let mut session = QuizSession {
        peer_id,
        messenger,
        questions,
        config,
        round: None,
        hint_deadline: None,
        advance_deadline: None,
    };
    tracing::debug!(peer_id, generation, "quiz session started");

    let flow = loop {
        let flow = tokio::select! {
            biased;
            command = mailbox.recv() => match command {
                Some(command) => session.handle(command).await,
                None => break Flow::Stopped,
            },
            () = wait_until(session.hint_deadline) => {
                session.reveal_hint().await;
                Flow::Continue
            }
            () = wait_until(session.advance_deadline) => {
                session.advance_deadline = None;
                match session.start_round().await {
                    Ok(()) => Flow::Continue,
                    Err(error) => Flow::Failed { error, reply: None },
                }
            }
        };
        if !matches!(flow, Flow::Continue) {
            break flow;
        }
    };

    if let Flow::Failed { error, reply } = flow {
        tracing::error!(
            peer_id,
            error = %format!("{error:#}"),
            "quiz session ended"
        );
        mailbox.close();
        if ended_tx.send(SessionEnded { peer_id, generation }).is_err() {
            tracing::debug!(peer_id, "quiz registry gone before session end notice");
        }
        if let Some(reply) = reply {
            let _ = reply.send(Err(error));
        }
        while let Some(command) = mailbox.recv().await {
            command.reply_absent();
        }
    }
    tracing::debug!(peer_id, generation, "quiz session stopped");
}
