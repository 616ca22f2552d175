use std::path::PathBuf;
use std::time::Duration;

use beet_dispatch::DispatcherConfig;
use beet_longpoll::vk_api_client::{DEFAULT_VK_API_BASE, DEFAULT_VK_API_VERSION};
use beet_longpoll::{SessionCursorConfig, VkApiConfig};
use beet_quiz::QuizConfig;
use clap::Parser;

use crate::runtime::BotRuntimeConfig;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "beet-bot",
    about = "VK chat bot with commands, history capture and a trivia quiz",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "BEET_ACCESS_TOKEN",
        hide_env_values = true,
        help = "VK API access token"
    )]
    pub access_token: String,

    #[arg(
        long,
        env = "BEET_API_BASE",
        default_value = DEFAULT_VK_API_BASE,
        help = "Base URL of the VK API method endpoint"
    )]
    pub api_base: String,

    #[arg(
        long,
        env = "BEET_API_VERSION",
        default_value = DEFAULT_VK_API_VERSION,
        help = "VK API version sent with every call"
    )]
    pub api_version: String,

    #[arg(
        long,
        env = "BEET_STATE_DIR",
        default_value = ".beet",
        help = "Directory holding the long-poll checkpoint and the message history"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long,
        env = "BEET_QUIZ_CORPUS",
        default_value = "quiz.txt",
        help = "Quiz questions, one `question|answer` pair per line"
    )]
    pub quiz_corpus: PathBuf,

    #[arg(
        long,
        env = "BEET_LONG_POLL_WAIT_SECS",
        default_value_t = 25,
        value_parser = parse_positive_u64,
        help = "Seconds the long-poll server may hold a request open"
    )]
    pub long_poll_wait_secs: u64,

    #[arg(
        long,
        env = "BEET_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for VK API method calls in milliseconds"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        env = "BEET_RETRY_MAX_ATTEMPTS",
        default_value_t = 5,
        value_parser = parse_positive_usize,
        help = "Attempts per VK API call before giving up"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long,
        env = "BEET_RETRY_BASE_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Base delay of the exponential retry backoff in milliseconds"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long,
        env = "BEET_RECONNECT_DELAY_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Pause between failed long-poll server acquisitions and failed polls in milliseconds"
    )]
    pub reconnect_delay_ms: u64,

    #[arg(
        long,
        env = "BEET_CHECKPOINT_EVERY",
        default_value_t = 50,
        value_parser = parse_positive_u64,
        help = "Persist the history checkpoint after this many updates"
    )]
    pub checkpoint_every: u64,

    #[arg(
        long,
        env = "BEET_HISTORY_PAGE_SIZE",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "Messages requested per history replay page"
    )]
    pub history_page_size: u64,

    #[arg(
        long,
        env = "BEET_WORKER_IDLE_TIMEOUT_SECS",
        default_value_t = 300,
        help = "Idle seconds before a conversation worker is retired; 0 keeps workers forever"
    )]
    pub worker_idle_timeout_secs: u64,

    #[arg(
        long,
        env = "BEET_QUIZ_HINT_INTERVAL_SECS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Seconds between quiz hints"
    )]
    pub quiz_hint_interval_secs: u64,

    #[arg(
        long,
        env = "BEET_QUIZ_ADVANCE_DELAY_SECS",
        default_value_t = 5,
        value_parser = parse_positive_u64,
        help = "Seconds between a finished quiz round and the next question"
    )]
    pub quiz_advance_delay_secs: u64,

    #[arg(
        long,
        env = "BEET_QUIZ_MAX_HINTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Letters a quiz round may reveal before the answer is announced"
    )]
    pub quiz_max_hints: usize,
}

impl Cli {
    pub fn runtime_config(&self) -> BotRuntimeConfig {
        let reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        BotRuntimeConfig {
            vk: VkApiConfig {
                api_base: self.api_base.clone(),
                api_version: self.api_version.clone(),
                access_token: self.access_token.clone(),
                request_timeout_ms: self.request_timeout_ms,
                retry_max_attempts: self.retry_max_attempts,
                retry_base_delay_ms: self.retry_base_delay_ms,
                history_page_size: self.history_page_size,
            },
            state_dir: self.state_dir.clone(),
            quiz_corpus: self.quiz_corpus.clone(),
            cursor: SessionCursorConfig {
                long_poll_wait_secs: self.long_poll_wait_secs,
                reconnect_delay,
                poll_retry_delay: reconnect_delay,
                checkpoint_every: self.checkpoint_every,
            },
            dispatcher: DispatcherConfig {
                idle_timeout: (self.worker_idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.worker_idle_timeout_secs)),
            },
            quiz: QuizConfig {
                hint_interval: Duration::from_secs(self.quiz_hint_interval_secs),
                advance_delay: Duration::from_secs(self.quiz_advance_delay_secs),
                max_hints: self.quiz_max_hints,
            },
        }
    }
}
