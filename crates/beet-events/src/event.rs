//! Typed inbound events produced by the long-poll decoder.

use serde::{Deserialize, Serialize};

/// Peer ids above this offset address a multi-user chat.
pub const CHAT_PEER_OFFSET: i64 = 2_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Closed set of sender kinds a route may be scoped to.
pub enum SenderKind {
    User,
    Chat,
    Community,
}

impl SenderKind {
    /// Classifies a peer id purely by numeric range.
    pub fn classify(peer_id: i64) -> Self {
        if peer_id > CHAT_PEER_OFFSET {
            Self::Chat
        } else if peer_id < 0 {
            Self::Community
        } else {
            Self::User
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Chat => "chat",
            Self::Community => "community",
        }
    }
}

/// Converts a chat id into the peer id used as its conversation key.
pub fn chat_peer_id(chat_id: i64) -> i64 {
    chat_id + CHAT_PEER_OFFSET
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Message flag bit set as reported by the long-poll feed.
pub struct MessageFlags(pub u32);

impl MessageFlags {
    pub const UNREAD: u32 = 1;
    pub const OUTBOX: u32 = 2;
    pub const REPLIED: u32 = 4;
    pub const IMPORTANT: u32 = 8;
    pub const CHAT: u32 = 16;
    pub const FRIENDS: u32 = 32;
    pub const SPAM: u32 = 64;
    pub const DELETED: u32 = 128;
    pub const FIXED: u32 = 256;
    pub const MEDIA: u32 = 512;
    pub const HIDDEN: u32 = 65_536;

    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// True for messages sent by the bot account itself.
    pub fn is_outbox(self) -> bool {
        self.contains(Self::OUTBOX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Video,
    Audio,
    Doc,
    Wall,
    Sticker,
    Link,
    Money,
    Gift,
}

impl AttachmentKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "photo" => Some(Self::Photo),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "doc" => Some(Self::Doc),
            "wall" => Some(Self::Wall),
            "sticker" => Some(Self::Sticker),
            "link" => Some(Self::Link),
            "money" => Some(Self::Money),
            "gift" => Some(Self::Gift),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Who sent a message, derived from the peer id range.
pub enum Sender {
    User { user_id: i64 },
    Chat { chat_id: i64, from_id: i64 },
    Community { community_id: i64 },
}

impl Sender {
    pub fn kind(&self) -> SenderKind {
        match self {
            Self::User { .. } => SenderKind::User,
            Self::Chat { .. } => SenderKind::Chat,
            Self::Community { .. } => SenderKind::Community,
        }
    }

    /// Id of the human (or community) that authored the message.
    pub fn author_id(&self) -> i64 {
        match self {
            Self::User { user_id } => *user_id,
            Self::Chat { from_id, .. } => *from_id,
            Self::Community { community_id } => *community_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: i64,
    pub peer_id: i64,
    pub flags: MessageFlags,
    pub timestamp: i64,
    pub text: String,
    pub sender: Sender,
    #[serde(default)]
    pub attachments: Vec<AttachmentKind>,
    #[serde(default)]
    pub has_forwarded_messages: bool,
}

impl MessageEvent {
    pub fn sender_kind(&self) -> SenderKind {
        self.sender.kind()
    }

    pub fn is_outbox(&self) -> bool {
        self.flags.is_outbox()
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self.sender {
            Sender::Chat { chat_id, .. } => Some(chat_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "act", rename_all = "snake_case")]
/// Structural chat changes reported through the `source_act` attribute.
pub enum ServiceAction {
    ChatCreate { title: String },
    ChatTitleUpdate { old_title: String, new_title: String },
    ChatPhotoUpdate,
    ChatPhotoRemove,
    ChatInviteUser { invitee_id: i64 },
    ChatKickUser { kicked_id: i64 },
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCreate { .. } => "chat_create",
            Self::ChatTitleUpdate { .. } => "chat_title_update",
            Self::ChatPhotoUpdate => "chat_photo_update",
            Self::ChatPhotoRemove => "chat_photo_remove",
            Self::ChatInviteUser { .. } => "chat_invite_user",
            Self::ChatKickUser { .. } => "chat_kick_user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub message_id: i64,
    pub peer_id: i64,
    pub chat_id: i64,
    /// User that performed the action.
    pub actor_id: i64,
    pub flags: MessageFlags,
    pub timestamp: i64,
    pub action: ServiceAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    Service(ServiceEvent),
}

impl Event {
    /// Key that groups every event of one chat or dialog.
    pub fn conversation_key(&self) -> i64 {
        match self {
            Self::Message(message) => message.peer_id,
            Self::Service(service) => service.peer_id,
        }
    }

    pub fn message_id(&self) -> i64 {
        match self {
            Self::Message(message) => message.message_id,
            Self::Service(service) => service.message_id,
        }
    }

    /// `(conversation_key, message_id)` identity of the event.
    pub fn identity(&self) -> (i64, i64) {
        (self.conversation_key(), self.message_id())
    }

    pub fn service_action(&self) -> Option<&ServiceAction> {
        match self {
            Self::Message(_) => None,
            Self::Service(service) => Some(&service.action),
        }
    }

    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Self::Message(message) => Some(message),
            Self::Service(_) => None,
        }
    }
}
