//! Resumable long-poll session management.
//!
//! [`SessionCursor`] owns the live stream position (`ts`) and the history
//! checkpoint (`pts`), recovers from the feed's numbered failure codes and
//! replays missed history before live polling resumes. [`VkApiClient`] is the
//! HTTP implementation of the transport and messenger capabilities.

pub mod checkpoint;
pub mod envelope;
pub mod session_cursor;
pub mod transport;
pub mod vk_api_client;
mod vk_api_helpers;

pub use checkpoint::CheckpointThrottle;
pub use envelope::{parse_poll_envelope, PollOutcome};
pub use session_cursor::{CursorReport, SessionCursor, SessionCursorConfig};
pub use transport::{CheckpointStore, HistoryPage, LongPollServer, LongPollTransport};
pub use vk_api_client::{VkApiClient, VkApiConfig, VkApiError};
