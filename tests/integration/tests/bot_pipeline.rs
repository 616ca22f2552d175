use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use beet_bot::{build_routes, run_bot_with, BotContext, BotEventHandler, BotRuntimeConfig, HELP_REPLY};
use beet_dispatch::{ConversationDispatcher, DispatcherConfig};
use beet_events::{decode_long_poll_batch, ChatMember, EventSink, HistoryMessage, Messenger};
use beet_longpoll::{
    CheckpointStore, HistoryPage, LongPollServer, LongPollTransport, SessionCursorConfig,
    VkApiConfig,
};
use beet_quiz::{QuizConfig, QuizCorpus, QuizEngine};
use beet_store::{HistorySource, JsonCheckpointStore, JsonlHistoryStore};
use serde_json::{json, Value};
use tokio::sync::watch;

const CHAT_PEER: i64 = 2_000_000_001;

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(i64, String, Vec<i64>)>>,
}

impl RecordingMessenger {
    fn sent(&self) -> Vec<(i64, String, Vec<i64>)> {
        self.sent.lock().expect("sent").clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, peer_id: i64, text: &str, forward_ids: &[i64]) -> Result<i64> {
        let mut sent = self.sent.lock().expect("sent");
        sent.push((peer_id, text.to_string(), forward_ids.to_vec()));
        Ok(9_000 + sent.len() as i64)
    }

    async fn fetch_chat_members(&self, _chat_id: i64) -> Result<Vec<ChatMember>> {
        Ok(Vec::new())
    }

    async fn fetch_friend_requests(&self, _offset: usize) -> Result<Vec<i64>> {
        Ok(Vec::new())
    }

    async fn approve_friend_request(&self, _user_id: i64) -> Result<()> {
        Ok(())
    }
}

/// Serves queued responses and requests shutdown once the polls run out.
struct ScriptedFeed {
    server: LongPollServer,
    polls: Mutex<VecDeque<Value>>,
    pages: Mutex<VecDeque<HistoryPage>>,
    history_requests: Mutex<Vec<(u64, u64)>>,
    shutdown: watch::Sender<bool>,
}

impl ScriptedFeed {
    fn new(pts: u64, polls: Vec<Value>, shutdown: watch::Sender<bool>) -> Self {
        Self {
            server: LongPollServer {
                key: "key-1".to_string(),
                server: "lp.vk.test/im".to_string(),
                ts: 100,
                pts,
            },
            polls: Mutex::new(polls.into()),
            pages: Mutex::new(VecDeque::new()),
            history_requests: Mutex::new(Vec::new()),
            shutdown,
        }
    }
}

#[async_trait]
impl LongPollTransport for ScriptedFeed {
    async fn acquire_server(&self) -> Result<LongPollServer> {
        Ok(self.server.clone())
    }

    async fn poll(&self, _server: &LongPollServer, _wait_secs: u64) -> Result<String> {
        let next = self.polls.lock().expect("polls").pop_front();
        match next {
            Some(body) => Ok(body.to_string()),
            None => {
                self.shutdown.send_replace(true);
                std::future::pending::<Result<String>>().await
            }
        }
    }

    async fn fetch_history(&self, ts: u64, pts: u64) -> Result<HistoryPage> {
        self.history_requests
            .lock()
            .expect("history requests")
            .push((ts, pts));
        let next = self.pages.lock().expect("pages").pop_front();
        next.ok_or_else(|| anyhow!("no more history pages"))
    }
}

fn runtime_config(state_dir: &Path, checkpoint_every: u64) -> BotRuntimeConfig {
    BotRuntimeConfig {
        vk: VkApiConfig::default(),
        state_dir: state_dir.to_path_buf(),
        quiz_corpus: state_dir.join("quiz.txt"),
        cursor: SessionCursorConfig {
            checkpoint_every,
            ..SessionCursorConfig::default()
        },
        dispatcher: DispatcherConfig::default(),
        quiz: QuizConfig::default(),
    }
}

fn chat_update(message_id: i64, text: &str, from: i64) -> Value {
    json!([4, message_id, 1, CHAT_PEER, 1_500_000_000 + message_id, text, {"from": from.to_string()}])
}

fn history_message(id: i64, chat_id: Option<i64>, out: u8, action: Option<&str>) -> HistoryMessage {
    HistoryMessage {
        id,
        user_id: 42,
        date: 1_500_000_000 + id,
        out,
        body: format!("missed {id}"),
        chat_id,
        action: action.map(str::to_string),
        action_mid: None,
        action_text: None,
    }
}

#[tokio::test]
async fn integration_fresh_install_routes_live_chat_traffic_end_to_end() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = runtime_config(temp.path(), 50);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed = Arc::new(ScriptedFeed::new(
        500,
        vec![
            json!({
                "ts": 101,
                "pts": 501,
                "updates": [
                    chat_update(1, "бет викторина", 42),
                    chat_update(2, "Вена", 43),
                ]
            }),
            json!({
                "ts": 102,
                "pts": 502,
                "updates": [
                    [61, 42, 1],
                    chat_update(3, "Бет, помощь", 42),
                    [4, 4, 1, 42, 1_500_000_004_i64, "бет помощь", {}],
                ]
            }),
            json!({"failed": 2}),
            json!({
                "ts": 103,
                "pts": 503,
                "updates": [
                    [4, 5, 1, CHAT_PEER, 1_500_000_005_i64, "", {"from": "42", "source_act": "chat_invite_user", "source_mid": "77"}],
                ]
            }),
        ],
        shutdown_tx,
    ));
    let messenger = Arc::new(RecordingMessenger::default());

    let report = run_bot_with(
        feed.clone(),
        messenger.clone(),
        Arc::new(QuizCorpus::parse("Столица Австрии?|Вена\n")),
        &config,
        shutdown_rx,
    )
    .await
    .expect("bot run");

    assert_eq!(
        messenger.sent(),
        vec![
            (CHAT_PEER, "Столица Австрии?".to_string(), Vec::new()),
            (CHAT_PEER, "Поздравляю! Вы правы!".to_string(), vec![2]),
            (CHAT_PEER, HELP_REPLY.to_string(), vec![3]),
        ]
    );
    assert_eq!(report.delivered_events, 5);
    assert_eq!(report.key_renewals, 2);
    assert!(
        feed.history_requests.lock().expect("requests").is_empty(),
        "a fresh install has nothing to replay"
    );

    let history = JsonlHistoryStore::open(config.history_path()).expect("history");
    let records = history.read_all().expect("records");
    assert_eq!(
        records
            .iter()
            .map(|record| (record.message_id, record.source))
            .collect::<Vec<_>>(),
        vec![
            (1, HistorySource::Live),
            (2, HistorySource::Live),
            (3, HistorySource::Live),
        ]
    );
    assert_eq!(records[1].author_id, 43);

    let checkpoint = JsonCheckpointStore::new(config.checkpoint_path())
        .load()
        .await
        .expect("checkpoint");
    assert_eq!(checkpoint, 500, "only the seeded checkpoint is written");
}

#[tokio::test]
async fn integration_restart_replays_missed_chat_history_before_polling() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = runtime_config(temp.path(), 1);
    JsonCheckpointStore::new(config.checkpoint_path())
        .save(900)
        .await
        .expect("seed checkpoint");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed = Arc::new(ScriptedFeed::new(
        950,
        vec![json!({"ts": 101, "pts": 906, "updates": [chat_update(20, "привет", 42)]})],
        shutdown_tx,
    ));
    feed.pages.lock().expect("pages").push_back(HistoryPage {
        messages: vec![
            history_message(10, Some(1), 0, None),
            history_message(11, None, 0, None),
            history_message(12, Some(1), 1, None),
            history_message(13, Some(1), 0, Some("chat_kick_user")),
            history_message(14, Some(1), 0, None),
        ],
        new_pts: Some(905),
    });
    feed.pages
        .lock()
        .expect("pages")
        .push_back(HistoryPage {
            messages: Vec::new(),
            new_pts: Some(905),
        });
    let messenger = Arc::new(RecordingMessenger::default());

    let report = run_bot_with(
        feed.clone(),
        messenger.clone(),
        Arc::new(QuizCorpus::parse("Столица Австрии?|Вена\n")),
        &config,
        shutdown_rx,
    )
    .await
    .expect("bot run");

    assert_eq!(
        *feed.history_requests.lock().expect("requests"),
        vec![(100, 900), (100, 905)]
    );
    assert_eq!(report.history_replays, 1);

    let records = JsonlHistoryStore::open(config.history_path())
        .expect("history")
        .read_all()
        .expect("records");
    assert_eq!(
        records
            .iter()
            .map(|record| (record.message_id, record.source))
            .collect::<Vec<_>>(),
        vec![
            (10, HistorySource::Replay),
            (14, HistorySource::Replay),
            (20, HistorySource::Live),
        ]
    );
    assert!(messenger.sent().is_empty());

    let checkpoint = JsonCheckpointStore::new(config.checkpoint_path())
        .load()
        .await
        .expect("checkpoint");
    assert_eq!(checkpoint, 906);
}

#[tokio::test(start_paused = true)]
async fn integration_decoded_batches_drive_quiz_timers_through_dispatcher() {
    let temp = tempfile::tempdir().expect("tempdir");
    let messenger = Arc::new(RecordingMessenger::default());
    let quiz = QuizEngine::spawn(
        messenger.clone(),
        Arc::new(QuizCorpus::parse("Кто мурлычет?|кот\n")),
        QuizConfig::default(),
    )
    .expect("quiz");
    let routes = build_routes(Arc::new(BotContext {
        messenger: messenger.clone(),
        quiz: quiz.clone(),
        history: JsonlHistoryStore::open(temp.path().join("history.jsonl")).expect("history"),
    }))
    .expect("routes");
    let dispatcher = ConversationDispatcher::spawn(
        Arc::new(BotEventHandler::new(routes)),
        DispatcherConfig::default(),
    )
    .expect("dispatcher");

    let batch = |updates: Vec<Value>| json!({"ts": 1, "updates": updates}).to_string();

    dispatcher
        .deliver(decode_long_poll_batch(&batch(vec![chat_update(1, "бетховен викторина", 42)])))
        .await
        .expect("deliver start");
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(
        messenger.sent(),
        vec![
            (CHAT_PEER, "Кто мурлычет?".to_string(), Vec::new()),
            (CHAT_PEER, "Подсказка: к ٭ ٭".to_string(), vec![9_001]),
        ]
    );

    dispatcher
        .deliver(decode_long_poll_batch(&batch(vec![
            chat_update(2, "собака", 43),
            chat_update(3, "Бет викторина стоп", 42),
        ])))
        .await
        .expect("deliver stop");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        messenger.sent().last().cloned(),
        Some((
            CHAT_PEER,
            "Викторина остановлена. Ответа не будет.".to_string(),
            vec![3]
        ))
    );
    assert_eq!(quiz.active_sessions().await.expect("sessions"), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(messenger.sent().len(), 3, "no timers survive the stop");
    dispatcher.shutdown().await.expect("shutdown");
}
