use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use beet_events::{ChatMember, Messenger};

use super::{QuizConfig, QuizEngine, RoundState};
use crate::corpus::{QuestionSource, QuizQuestion};

const PEER: i64 = 2_000_000_001;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Sent {
    peer_id: i64,
    text: String,
    forward_ids: Vec<i64>,
}

#[derive(Default)]
struct FakeMessenger {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl FakeMessenger {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent").clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|sent| sent.text).collect()
    }

    fn last(&self) -> Sent {
        self.sent().last().cloned().expect("at least one message")
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send_message(&self, peer_id: i64, text: &str, forward_ids: &[i64]) -> Result<i64> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("messages.send unavailable");
        }
        let mut sent = self.sent.lock().expect("sent");
        sent.push(Sent {
            peer_id,
            text: text.to_string(),
            forward_ids: forward_ids.to_vec(),
        });
        Ok(99 + sent.len() as i64)
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

/// Hands out its questions in order, cycling.
struct RotatingQuestions {
    questions: Vec<QuizQuestion>,
    next: AtomicUsize,
}

impl RotatingQuestions {
    fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            questions: pairs
                .iter()
                .map(|(question, answer)| QuizQuestion {
                    question: question.to_string(),
                    answer: answer.to_string(),
                })
                .collect(),
            next: AtomicUsize::new(0),
        })
    }
}

impl QuestionSource for RotatingQuestions {
    fn pick(&self) -> Option<QuizQuestion> {
        if self.questions.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.questions.len();
        Some(self.questions[index].clone())
    }
}

fn engine_with(pairs: &[(&str, &str)]) -> (QuizEngine, Arc<FakeMessenger>) {
    let messenger = Arc::new(FakeMessenger::default());
    let engine = QuizEngine::spawn(
        messenger.clone(),
        RotatingQuestions::new(pairs),
        QuizConfig::default(),
    )
    .expect("spawn quiz engine");
    (engine, messenger)
}

async fn advance(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

#[tokio::test(start_paused = true)]
async fn functional_correct_answer_cancels_hint_and_next_round_follows() {
    let (engine, messenger) = engine_with(&[
        ("Столица Австрии?", "Вена"),
        ("Кто написал «Оду к радости»?", "Бетховен"),
    ]);

    engine.start(PEER, 10).await.expect("start");
    assert_eq!(
        messenger.sent(),
        vec![Sent {
            peer_id: PEER,
            text: "Столица Австрии?".to_string(),
            forward_ids: Vec::new(),
        }]
    );
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.state, RoundState::Active);
    assert_eq!(snapshot.question_message_id, 100);
    assert!(snapshot.hint_pending);

    advance(10).await;
    assert!(engine
        .check_answer(PEER, 11, "ВЕНА, конечно")
        .await
        .expect("check"));
    assert_eq!(messenger.last().text, "Поздравляю! Вы правы!");
    assert_eq!(messenger.last().forward_ids, vec![11]);
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.state, RoundState::Paused);
    assert!(!snapshot.hint_pending);
    assert!(snapshot.advance_pending);

    assert!(
        !engine.check_answer(PEER, 12, "вена").await.expect("check"),
        "a paused round takes no answers"
    );

    advance(4).await;
    assert_eq!(messenger.sent().len(), 2);
    advance(2).await;
    assert_eq!(messenger.last().text, "Кто написал «Оду к радости»?");

    advance(20).await;
    assert!(
        messenger
            .texts()
            .iter()
            .all(|text| !text.starts_with("Подсказка")),
        "the cancelled hint timer must never fire"
    );
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.state, RoundState::Active);
    assert_eq!(snapshot.hints_revealed, 0);
}

#[tokio::test(start_paused = true)]
async fn functional_hints_reveal_letters_until_the_answer_is_announced() {
    let (engine, messenger) = engine_with(&[("Кто мурлычет?", "кот")]);

    engine.start(PEER, 1).await.expect("start");
    advance(31).await;
    assert_eq!(messenger.last().text, "Подсказка: к ٭ ٭");
    assert_eq!(messenger.last().forward_ids, vec![100]);

    advance(30).await;
    assert_eq!(messenger.last().text, "Подсказка: к о ٭");

    advance(30).await;
    assert_eq!(
        messenger.last().text,
        "Никто не дал правильного ответа.\nПравильный ответ: кот"
    );
    assert_eq!(messenger.last().forward_ids, vec![100]);
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.state, RoundState::Paused);
    assert_eq!(snapshot.hints_revealed, 2);
    assert!(!engine.check_answer(PEER, 2, "кот").await.expect("check"));

    advance(5).await;
    assert_eq!(messenger.last().text, "Кто мурлычет?");
    assert_eq!(messenger.sent().len(), 5);
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.question_message_id, 104);
    assert_eq!(snapshot.hints_revealed, 0);
}

#[tokio::test(start_paused = true)]
async fn functional_hint_budget_caps_reveals_for_long_answers() {
    let (engine, messenger) = engine_with(&[("Композитор?", "Людвиг ван Бетховен")]);

    engine.start(PEER, 1).await.expect("start");
    advance(4 * 30 + 1).await;
    assert_eq!(
        messenger.last().text,
        "Подсказка: Л ю д в ٭ ٭   ٭ ٭ ٭   ٭ ٭ ٭ ٭ ٭ ٭ ٭ ٭"
    );
    advance(30).await;
    assert!(messenger.last().text.starts_with("Никто не дал правильного ответа."));
}

#[tokio::test(start_paused = true)]
async fn functional_stop_wording_depends_on_round_state_and_cancels_timers() {
    let (engine, messenger) = engine_with(&[("Столица Австрии?", "Вена")]);

    engine.start(PEER, 1).await.expect("start");
    advance(10).await;
    engine.stop(PEER, 2).await.expect("stop");
    assert_eq!(
        messenger.last(),
        Sent {
            peer_id: PEER,
            text: "Викторина остановлена. Ответа не будет.".to_string(),
            forward_ids: vec![2],
        }
    );
    assert_eq!(engine.active_sessions().await.expect("sessions"), 0);
    assert!(engine.snapshot(PEER).await.expect("snapshot").is_none());

    engine.start(PEER, 3).await.expect("restart");
    advance(25).await;
    assert!(
        messenger
            .texts()
            .iter()
            .all(|text| !text.starts_with("Подсказка")),
        "the stopped session's hint timer must not fire"
    );

    assert!(engine.check_answer(PEER, 4, "вена").await.expect("check"));
    engine.stop(PEER, 5).await.expect("stop paused");
    assert_eq!(messenger.last().text, "Викторина остановлена.");

    let sent_before = messenger.sent().len();
    advance(60).await;
    assert_eq!(messenger.sent().len(), sent_before, "no round after stop");
}

#[tokio::test(start_paused = true)]
async fn functional_requests_without_a_running_quiz() {
    let (engine, messenger) = engine_with(&[("Столица Австрии?", "Вена")]);

    assert!(!engine.check_answer(PEER, 1, "вена").await.expect("check"));
    assert!(messenger.sent().is_empty(), "answers without a quiz are ignored");

    engine.stop(PEER, 7).await.expect("stop");
    assert_eq!(
        messenger.sent(),
        vec![Sent {
            peer_id: PEER,
            text: "В вашем чате не запущена викторина.".to_string(),
            forward_ids: vec![7],
        }]
    );
    assert_eq!(engine.active_sessions().await.expect("sessions"), 0);
}

#[tokio::test(start_paused = true)]
async fn functional_start_while_running_reminds_instead_of_restarting() {
    let (engine, messenger) = engine_with(&[
        ("Столица Австрии?", "Вена"),
        ("Другой вопрос", "другой ответ"),
    ]);

    engine.start(PEER, 1).await.expect("start");
    advance(31).await;
    engine.start(PEER, 30).await.expect("second start");
    assert_eq!(
        messenger.last(),
        Sent {
            peer_id: PEER,
            text: "В этом чате уже запущена викторина.\nТекущий вопрос: Столица Австрии?\nТекущая подсказка: В ٭ ٭ ٭"
                .to_string(),
            forward_ids: vec![30],
        }
    );

    assert!(engine.check_answer(PEER, 31, "Вена").await.expect("check"));
    engine.start(PEER, 32).await.expect("start while paused");
    assert_eq!(
        messenger.last().text,
        "В этом чате уже запущена викторина.\nПодождите, скоро будет новый вопрос."
    );
    assert_eq!(messenger.last().forward_ids, vec![32]);
    assert_eq!(
        messenger
            .texts()
            .iter()
            .filter(|text| text.as_str() == "Столица Австрии?")
            .count(),
        1
    );
    assert_eq!(engine.active_sessions().await.expect("sessions"), 1);
}

#[tokio::test(start_paused = true)]
async fn functional_conversations_run_independent_sessions() {
    let (engine, messenger) = engine_with(&[("Столица Австрии?", "Вена")]);
    let other = PEER + 1;

    engine.start(PEER, 1).await.expect("start first");
    engine.start(other, 1).await.expect("start second");
    assert_eq!(engine.active_sessions().await.expect("sessions"), 2);

    assert!(engine.check_answer(PEER, 2, "вена").await.expect("check"));
    let first = engine.snapshot(PEER).await.expect("snapshot").expect("first");
    let second = engine.snapshot(other).await.expect("snapshot").expect("second");
    assert_eq!(first.state, RoundState::Paused);
    assert_eq!(second.state, RoundState::Active);

    advance(31).await;
    let hints = messenger
        .sent()
        .into_iter()
        .filter(|sent| sent.text.starts_with("Подсказка"))
        .map(|sent| sent.peer_id)
        .collect::<Vec<_>>();
    assert_eq!(hints, vec![other]);
}

#[tokio::test(start_paused = true)]
async fn regression_question_send_failure_ends_the_session() {
    let (engine, messenger) = engine_with(&[("Столица Австрии?", "Вена")]);

    messenger.failing.store(true, Ordering::SeqCst);
    let error = engine.start(PEER, 1).await.expect_err("question not sent");
    assert!(format!("{error:#}").contains("failed to send quiz question"));
    assert_eq!(engine.active_sessions().await.expect("sessions"), 0);
    assert!(!engine.check_answer(PEER, 2, "вена").await.expect("check"));

    messenger.failing.store(false, Ordering::SeqCst);
    engine.start(PEER, 3).await.expect("fresh start");
    assert_eq!(messenger.texts(), vec!["Столица Австрии?".to_string()]);
    assert_eq!(engine.active_sessions().await.expect("sessions"), 1);
}

#[tokio::test(start_paused = true)]
async fn regression_failed_next_round_ends_the_session() {
    let (engine, messenger) = engine_with(&[("Столица Австрии?", "Вена")]);

    engine.start(PEER, 1).await.expect("start");
    assert!(engine.check_answer(PEER, 2, "вена").await.expect("check"));
    messenger.failing.store(true, Ordering::SeqCst);
    advance(6).await;

    assert_eq!(engine.active_sessions().await.expect("sessions"), 0);
    assert!(engine.snapshot(PEER).await.expect("snapshot").is_none());
}

#[tokio::test]
async fn unit_start_fails_with_empty_question_source() {
    let (engine, messenger) = engine_with(&[]);
    let error = engine.start(PEER, 1).await.expect_err("no questions");
    assert!(error.to_string().contains("quiz question source is empty"));
    assert!(messenger.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn regression_oversized_timer_intervals_do_not_kill_the_session() {
    let messenger = Arc::new(FakeMessenger::default());
    let engine = QuizEngine::spawn(
        messenger.clone(),
        RotatingQuestions::new(&[("Столица Австрии?", "Вена")]),
        QuizConfig {
            hint_interval: Duration::from_secs(u64::MAX),
            advance_delay: Duration::from_secs(u64::MAX),
            ..QuizConfig::default()
        },
    )
    .expect("spawn quiz engine");

    engine.start(PEER, 1).await.expect("start");
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert!(snapshot.hint_pending);

    assert!(engine.check_answer(PEER, 2, "Вена").await.expect("check"));
    advance(3_600).await;
    let snapshot = engine.snapshot(PEER).await.expect("snapshot").expect("running");
    assert_eq!(snapshot.state, RoundState::Paused);
    assert!(snapshot.advance_pending);
    assert_eq!(engine.active_sessions().await.expect("sessions"), 1);
    assert_eq!(
        messenger.texts(),
        vec!["Столица Австрии?".to_string(), "Поздравляю! Вы правы!".to_string()]
    );
}
