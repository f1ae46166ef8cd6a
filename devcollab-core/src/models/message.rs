use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// A chat message as carried in the broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
    pub content: String,
    pub sent_at_display: String,
}

impl Message {
    /// Outgoing messages are the ones authored by `identity`.
    pub fn is_outgoing(&self, identity: &Identity) -> bool {
        self.sender_id == identity.id
    }
}
