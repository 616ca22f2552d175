use serde::{Deserialize, Serialize};

use crate::event::{chat_peer_id, ServiceAction};

/// Message as returned by the history endpoint used for backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub user_id: i64,
    pub date: i64,
    #[serde(default)]
    pub out: u8,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_mid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_text: Option<String>,
}

impl HistoryMessage {
    /// Conversation key the message belongs to.
    pub fn peer_id(&self) -> i64 {
        match self.chat_id {
            Some(chat_id) => chat_peer_id(chat_id),
            None => self.user_id,
        }
    }

    pub fn is_outbox(&self) -> bool {
        self.out == 1
    }

    pub fn is_service_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn is_from_chat(&self) -> bool {
        self.chat_id.is_some()
    }

    /// Maps the textual action to the typed variant when it is known.
    pub fn service_action(&self) -> Option<ServiceAction> {
        let action = match self.action.as_deref()? {
            "chat_create" => ServiceAction::ChatCreate {
                title: self.action_text.clone().unwrap_or_default(),
            },
            "chat_title_update" => ServiceAction::ChatTitleUpdate {
                old_title: String::new(),
                new_title: self.action_text.clone().unwrap_or_default(),
            },
            "chat_photo_update" => ServiceAction::ChatPhotoUpdate,
            "chat_photo_remove" => ServiceAction::ChatPhotoRemove,
            "chat_invite_user" => ServiceAction::ChatInviteUser {
                invitee_id: self.action_mid.unwrap_or_default(),
            },
            "chat_kick_user" => ServiceAction::ChatKickUser {
                kicked_id: self.action_mid.unwrap_or_default(),
            },
            _ => return None,
        };
        Some(action)
    }
}
