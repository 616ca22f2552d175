//! Process wiring: file stores, VK client, quiz engine, dispatcher and the
//! long-poll cursor, run until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use beet_dispatch::{ConversationDispatcher, DispatcherConfig};
use beet_events::Messenger;
use beet_longpoll::{
    CursorReport, LongPollTransport, SessionCursor, SessionCursorConfig, VkApiClient, VkApiConfig,
};
use beet_quiz::{QuestionSource, QuizConfig, QuizCorpus, QuizEngine};
use beet_store::{JsonCheckpointStore, JsonlHistoryStore};
use tokio::sync::watch;

use crate::handler::BotEventHandler;
use crate::history_sink::ChatHistorySink;
use crate::routes::{build_routes, BotContext};

const CHECKPOINT_FILE: &str = "checkpoint.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Clone)]
pub struct BotRuntimeConfig {
    pub vk: VkApiConfig,
    pub state_dir: PathBuf,
    pub quiz_corpus: PathBuf,
    pub cursor: SessionCursorConfig,
    pub dispatcher: DispatcherConfig,
    pub quiz: QuizConfig,
}

impl BotRuntimeConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(CHECKPOINT_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join(HISTORY_FILE)
    }
}

/// Runs the bot against the VK API until Ctrl-C.
pub async fn run_bot(config: BotRuntimeConfig) -> Result<()> {
    let client = Arc::new(VkApiClient::new(config.vk.clone()).context("invalid vk api settings")?);
    let questions = Arc::new(load_corpus(&config.quiz_corpus)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c; stop the process to exit");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let report = run_bot_with(client.clone(), client, questions, &config, shutdown_rx).await?;
    tracing::info!(
        polls = report.polls,
        delivered_events = report.delivered_events,
        transport_errors = report.transport_errors,
        history_replays = report.history_replays,
        checkpoint_writes = report.checkpoint_writes,
        "beet bot stopped"
    );
    Ok(())
}

fn load_corpus(path: &Path) -> Result<QuizCorpus> {
    QuizCorpus::load(path).context("failed to load quiz questions")
}

/// Runs the full pipeline over the given collaborators until `shutdown`
/// flips, then drains the dispatcher.
pub async fn run_bot_with(
    transport: Arc<dyn LongPollTransport>,
    messenger: Arc<dyn Messenger>,
    questions: Arc<dyn QuestionSource>,
    config: &BotRuntimeConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<CursorReport> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;
    let history = JsonlHistoryStore::open(config.history_path())?;
    let checkpoints = Arc::new(JsonCheckpointStore::new(config.checkpoint_path()));

    let quiz = QuizEngine::spawn(messenger.clone(), questions, config.quiz)?;
    let routes = build_routes(Arc::new(BotContext {
        messenger,
        quiz,
        history: history.clone(),
    }))
    .context("invalid route declarations")?;
    let dispatcher = ConversationDispatcher::spawn(
        Arc::new(BotEventHandler::new(routes)),
        config.dispatcher.clone(),
    )?;

    let mut cursor = SessionCursor::new(
        transport,
        checkpoints,
        Arc::new(ChatHistorySink::new(history)),
        config.cursor.clone(),
    )
    .await?;
    tracing::info!(
        state_dir = %config.state_dir.display(),
        pts = cursor.checkpoint(),
        "beet bot started"
    );

    let run_result = cursor.run(&dispatcher, shutdown).await;
    if let Err(error) = dispatcher.shutdown().await {
        tracing::warn!(error = %format!("{error:#}"), "dispatcher shutdown failed");
    }
    run_result?;
    Ok(cursor.report().clone())
}
