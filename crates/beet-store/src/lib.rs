//! File-backed persistence for the long-poll checkpoint and message history.

mod atomic_io;
pub mod checkpoint_store;
pub mod history_store;

pub use atomic_io::replace_file_atomically;
pub use checkpoint_store::{JsonCheckpointStore, CHECKPOINT_SCHEMA_VERSION};
pub use history_store::{HistoryRecord, HistorySource, JsonlHistoryStore};
