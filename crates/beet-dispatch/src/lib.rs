//! Per-conversation actor dispatcher.
//!
//! Events for one conversation key are handled strictly in submission order by
//! a dedicated worker task; different keys are handled concurrently. A single
//! router task owns the key → worker map, spawning workers on demand and
//! retiring idle ones.

pub mod dispatcher;
mod worker;

pub use dispatcher::{
    ConversationDispatcher, ConversationHandler, DispatcherConfig, DispatcherHandle,
    DispatcherStats,
};
