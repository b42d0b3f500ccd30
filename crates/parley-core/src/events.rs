use serde::{Deserialize, Serialize};

use crate::chat::ChatItem;
use crate::ids::ParticipantId;

/// Events fanned out to session subscribers. These replace the ad-hoc
/// emitter callbacks of typical client SDKs with typed payloads; dispatch
/// stays single-threaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A completed, non-suppressed message.
    #[serde(rename = "chat")]
    Chat { item: ChatItem },

    /// All fragments arrived but the joined payload failed to decode.
    /// The message is dropped; nothing garbled ever reaches the transcript.
    #[serde(rename = "decode_failed")]
    DecodeFailed { message_id: String, reason: String },

    /// First frame seen from a remote participant.
    #[serde(rename = "participant_joined")]
    ParticipantJoined { participant: ParticipantId },

    #[serde(rename = "closed")]
    Closed,
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::DecodeFailed { .. } => "decode_failed",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::Closed => "closed",
        }
    }
}

/// Side-channel effects requested by the agent. Delivered to the injected
/// action handler, never through the chat event stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ExternalAction {
    BrowseWebsite { url: String },
}

impl ExternalAction {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::BrowseWebsite { .. } => "browse_website",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{MessageKind, Role};

    #[test]
    fn event_type_strings() {
        let evt = SessionEvent::Chat {
            item: ChatItem {
                participant: ParticipantId::from_raw("1"),
                role: Role::Assistant,
                kind: MessageKind::Text,
                text: "hi".into(),
                is_final: true,
                time: 0,
            },
        };
        assert_eq!(evt.event_type(), "chat");
        assert_eq!(SessionEvent::Closed.event_type(), "closed");
    }

    #[test]
    fn events_serialize_tagged() {
        let evt = SessionEvent::DecodeFailed {
            message_id: "m1".into(),
            reason: "invalid base64".into(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "decode_failed");
        assert_eq!(json["message_id"], "m1");
    }

    #[test]
    fn action_serialization() {
        let action = ExternalAction::BrowseWebsite {
            url: "https://example.com".into(),
        };
        assert_eq!(action.action_name(), "browse_website");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "browse_website");
        assert_eq!(json["url"], "https://example.com");
    }

    #[test]
    fn event_serde_roundtrip() {
        let evt = SessionEvent::ParticipantJoined {
            participant: ParticipantId::from_raw("9000"),
        };
        let json = serde_json::to_string(&evt).unwrap();
        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "participant_joined");
    }
}
