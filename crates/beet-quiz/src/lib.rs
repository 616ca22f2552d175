//! Timer-driven trivia quiz, one session actor per conversation.

mod corpus;
mod engine;
mod hint;
mod replies;
mod session;

pub use corpus::{QuestionSource, QuizCorpus, QuizQuestion};
pub use engine::{
    QuizConfig, QuizEngine, QuizSnapshot, RoundState, DEFAULT_ADVANCE_DELAY, DEFAULT_HINT_INTERVAL,
    DEFAULT_MAX_HINTS,
};
pub use hint::{can_reveal_more, make_hint, HINT_PLACEHOLDER};
