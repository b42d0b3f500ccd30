use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::ParticipantId;

/// Who produced a message. Payloads from older agent builds carry arbitrary
/// role strings; anything that is not "assistant" renders as a user line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "assistant" => Self::Assistant,
            _ => Self::User,
        })
    }
}

impl Role {
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Assistant)
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

/// How a chat item should be rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Reasoning,
}

/// One consumer-visible transcript unit, derived from a fully decoded
/// envelope. While `is_final` is false the same logical message may be
/// re-delivered with amended text; the final delivery replaces it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatItem {
    pub participant: ParticipantId,
    pub role: Role,
    pub kind: MessageKind,
    pub text: String,
    pub is_final: bool,
    /// Epoch milliseconds, as carried in the envelope.
    pub time: i64,
}

impl ChatItem {
    /// A streaming item is still being amended by the sender.
    pub fn is_streaming(&self) -> bool {
        !self.is_final
    }
}
