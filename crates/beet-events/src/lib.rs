//! Event model and wire decoder for the Beet long-poll bot runtime.
//!
//! Decodes the positional long-poll update arrays into typed [`Event`]s and
//! defines the capability traits shared by the cursor, dispatcher, quiz and
//! application crates.

pub mod capabilities;
pub mod decoder;
pub mod event;
pub mod history;

pub use capabilities::{
    ChatMember, EventSink, HistorySink, Messenger, FRIEND_REQUESTS_PAGE_SIZE,
};
pub use decoder::{decode_long_poll_batch, decode_updates};
pub use event::{
    chat_peer_id, AttachmentKind, Event, MessageEvent, MessageFlags, Sender, SenderKind,
    ServiceAction, ServiceEvent, CHAT_PEER_OFFSET,
};
pub use history::HistoryMessage;
