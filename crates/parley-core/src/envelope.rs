use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::chat::{ChatItem, MessageKind, Role};
use crate::errors::DecodeError;
use crate::events::ExternalAction;
use crate::ids::ParticipantId;

/// The structured payload recovered after joining all fragments and running
/// base64 → UTF-8 → JSON. Transient: projected into a [`ChatItem`] or an
/// [`ExternalAction`] and then discarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecodedEnvelope {
    /// Id of the speaking participant. Some senders emit numeric uids.
    #[serde(deserialize_with = "string_or_number")]
    pub stream_id: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub text: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub text_ts: i64,
    #[serde(default)]
    pub role: Role,
    /// `"raw"` selects the nested sub-kind parse of `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// What a completed envelope turns into.
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    Chat(ChatItem),
    Action(ExternalAction),
    /// Successfully decoded, but nothing to show (empty display text).
    Suppressed,
}

impl DecodedEnvelope {
    /// Decode the joined fragment contents. The outer base64 is decoded as a
    /// whole, never per fragment.
    pub fn decode(joined: &str) -> Result<Self, DecodeError> {
        let bytes = BASE64
            .decode(joined)
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| DecodeError::Utf8(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| DecodeError::Envelope(e.to_string()))
    }

    /// Encode for the outbound direction: JSON → UTF-8 → base64.
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        BASE64.encode(json)
    }

    /// Envelope for locally typed input: a single final user message.
    pub fn user_text(text: impl Into<String>, stream_id: &ParticipantId, text_ts: i64) -> Self {
        Self {
            stream_id: stream_id.as_str().to_owned(),
            is_final: true,
            text: text.into(),
            text_ts,
            role: Role::User,
            data_type: None,
        }
    }

    /// Turn the envelope into its consumer-visible form. `"raw"` envelopes
    /// carry a nested `{type, data}` JSON object in `text`:
    /// `image_url` and `reasoning` replace the display text, `action` with
    /// `browse_website` becomes a side-channel action and no chat item at
    /// all. Unrecognized sub-kinds render as plain text.
    pub fn project(&self) -> Result<Projection, DecodeError> {
        let mut kind = MessageKind::Text;
        let mut display = self.text.clone();

        if self.data_type.as_deref() == Some("raw") {
            let value: serde_json::Value = serde_json::from_str(&self.text)
                .map_err(|e| DecodeError::RawPayload(e.to_string()))?;
            match value.get("type").and_then(|t| t.as_str()) {
                Some("image_url") => {
                    let url = value
                        .pointer("/data/image_url")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            DecodeError::RawPayload("image_url payload missing data.image_url".into())
                        })?;
                    kind = MessageKind::Image;
                    display = url.to_owned();
                }
                Some("reasoning") => {
                    let text = value
                        .pointer("/data/text")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            DecodeError::RawPayload("reasoning payload missing data.text".into())
                        })?;
                    kind = MessageKind::Reasoning;
                    display = text.to_owned();
                }
                Some("action") => {
                    if value.pointer("/data/action").and_then(|v| v.as_str())
                        == Some("browse_website")
                    {
                        let url = value
                            .pointer("/data/data/url")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| {
                                DecodeError::RawPayload("browse_website action missing url".into())
                            })?;
                        return Ok(Projection::Action(ExternalAction::BrowseWebsite {
                            url: url.to_owned(),
                        }));
                    }
                    // Unrecognized actions fall through as plain text.
                }
                _ => {}
            }
        }

        if display.trim().is_empty() {
            return Ok(Projection::Suppressed);
        }

        Ok(Projection::Chat(ChatItem {
            participant: ParticipantId::from_raw(self.stream_id.clone()),
            role: self.role,
            kind,
            text: display,
            is_final: self.is_final,
            time: self.text_ts,
        }))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "stream_id must be a string or number, got {other}"
        ))),
    }
}
