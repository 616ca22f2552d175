//! Chat bot application: routes, handlers and the process wiring around the
//! long-poll cursor, dispatcher and quiz engine.

mod bootstrap;
pub mod cli;
pub mod friend_requests;
pub mod handler;
pub mod history_sink;
pub mod routes;
pub mod runtime;

pub use bootstrap::init_tracing;
pub use cli::Cli;
pub use handler::BotEventHandler;
pub use history_sink::ChatHistorySink;
pub use routes::{build_routes, BotContext, ABOUT_REPLY, HELP_REPLY};
pub use runtime::{run_bot, run_bot_with, BotRuntimeConfig};
