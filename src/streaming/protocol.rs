//! Flow conversation protocol types
//!
//! JSON control messages exchanged with the Flow service over WebSocket.
//! Audio travels as binary frames in both directions and has no JSON
//! envelope.
//!
//! # Protocol Overview
//!
//! 1. Connect to `wss://flow.api.speechmatics.com/v1/flow?jwt=<token>&assistant=<template>`
//! 2. Send `StartConversation` describing the outbound audio format
//! 3. Stream microphone audio as binary PCM16LE frames
//! 4. Receive assistant speech as binary PCM16LE frames, and `prompt`,
//!    `ResponseCompleted` and friends as JSON

use serde::{Deserialize, Deserializer, Serialize};

use crate::audio::SAMPLE_RATE;

/// Default Flow endpoint (query parameters are appended per session)
pub const FLOW_API_URL: &str = "wss://flow.api.speechmatics.com/v1/flow";

/// Default assistant template
pub const DEFAULT_TEMPLATE_ID: &str = "3668c60a-1c08-4670-81e9-97e12e5a4149:latest";

/// Audio format announced in `StartConversation`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            format_type: "raw".to_string(),
            encoding: "pcm_s16le".to_string(),
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub template_id: String,
}

// ============================================================================
// Client Messages (sent TO Flow)
// ============================================================================

/// Messages sent from client to the Flow service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "message")]
pub enum ClientMessage {
    /// Opens the conversation; must be the first message on the connection
    StartConversation {
        audio_format: AudioFormat,
        conversation_config: ConversationConfig,
    },
}

impl ClientMessage {
    pub fn start_conversation(template_id: &str) -> Self {
        Self::StartConversation {
            audio_format: AudioFormat::default(),
            conversation_config: ConversationConfig {
                template_id: template_id.to_string(),
            },
        }
    }
}

// ============================================================================
// Server Messages (received FROM Flow)
// ============================================================================

/// Reads an explicit JSON `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Prompt body of a `prompt` message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PromptInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub response: String,
}

/// Transcript metadata attached to transcript messages
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default)]
    pub transcript: String,

    #[serde(default)]
    pub start_time: f64,

    #[serde(default)]
    pub end_time: f64,
}

/// Messages received from the Flow service
///
/// Every field is optional on the wire; missing or `null` fields decode as
/// empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message")]
pub enum ServerMessage {
    /// The user's recognised utterance that the assistant is responding to
    #[serde(rename = "prompt")]
    Prompt {
        #[serde(default, deserialize_with = "null_as_default")]
        prompt: PromptInfo,
    },

    /// Full text of the assistant's finished response
    ResponseCompleted {
        #[serde(default, deserialize_with = "null_as_default")]
        content: String,
    },

    ConversationStarted {
        #[serde(default)]
        id: Option<String>,
    },

    AddPartialTranscript {
        #[serde(default)]
        metadata: TranscriptMetadata,
    },

    AddTranscript {
        #[serde(default)]
        metadata: TranscriptMetadata,
    },

    ResponseStarted {
        #[serde(default)]
        content: String,
    },

    ResponseInterrupted {
        #[serde(default)]
        content: String,
    },

    /// Acknowledges an outbound audio frame
    AudioAdded {
        #[serde(default)]
        seq_no: u64,
    },

    ConversationEnding,

    ConversationEnded,

    Info {
        #[serde(rename = "type", default)]
        info_type: String,
        #[serde(default)]
        reason: String,
    },

    Warning {
        #[serde(rename = "type", default)]
        warning_type: String,
        #[serde(default)]
        reason: String,
    },

    Error {
        #[serde(rename = "type", default)]
        error_type: String,
        #[serde(default)]
        reason: String,
    },

    /// Any tag this client does not know
    #[serde(other)]
    Unknown,
}

/// A structured inbound message: the raw JSON plus its typed reading
#[derive(Debug, Clone, PartialEq)]
pub struct InboundText {
    pub raw: serde_json::Value,
    pub message: ServerMessage,
}

impl InboundText {
    /// The `message` tag, if present
    pub fn tag(&self) -> Option<&str> {
        self.raw.get("message").and_then(|m| m.as_str())
    }
}

/// Decode an inbound text frame.
///
/// Fails only when the text is not JSON at all. JSON that does not match a
/// known message shape decodes as [`ServerMessage::Unknown`] with the raw
/// value preserved.
pub fn decode_text(text: &str) -> Result<InboundText, serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let message = ServerMessage::deserialize(&raw).unwrap_or(ServerMessage::Unknown);
    Ok(InboundText { raw, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_conversation_serialization() {
        let msg = ClientMessage::start_conversation("abc:latest");
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["message"], "StartConversation");
        assert_eq!(json["audio_format"]["type"], "raw");
        assert_eq!(json["audio_format"]["encoding"], "pcm_s16le");
        assert_eq!(json["audio_format"]["sample_rate"], 16000);
        assert_eq!(json["conversation_config"]["template_id"], "abc:latest");
    }

    #[test]
    fn test_prompt_deserialization() {
        let inbound =
            decode_text(r#"{"message":"prompt","prompt":{"prompt":"What time is it?","id":3}}"#)
                .unwrap();

        assert_eq!(inbound.tag(), Some("prompt"));
        match inbound.message {
            ServerMessage::Prompt { prompt } => assert_eq!(prompt.prompt, "What time is it?"),
            other => panic!("Expected Prompt, got {:?}", other),
        }
    }

    #[test]
    fn test_prompt_missing_body_decodes_empty() {
        let inbound = decode_text(r#"{"message":"prompt"}"#).unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::Prompt {
                prompt: PromptInfo::default()
            }
        );
    }

    #[test]
    fn test_null_fields_decode_empty() {
        let inbound = decode_text(r#"{"message":"prompt","prompt":null}"#).unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::Prompt {
                prompt: PromptInfo::default()
            }
        );

        let inbound = decode_text(r#"{"message":"prompt","prompt":{"prompt":null}}"#).unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::Prompt {
                prompt: PromptInfo::default()
            }
        );

        let inbound = decode_text(r#"{"message":"ResponseCompleted","content":null}"#).unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::ResponseCompleted {
                content: String::new()
            }
        );
    }

    #[test]
    fn test_response_completed_deserialization() {
        let inbound =
            decode_text(r#"{"message":"ResponseCompleted","content":"It is noon."}"#).unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::ResponseCompleted {
                content: "It is noon.".to_string()
            }
        );
    }

    #[test]
    fn test_transcript_deserialization() {
        let inbound = decode_text(
            r#"{"message":"AddTranscript","metadata":{"transcript":"hello","start_time":0.5,"end_time":1.0},"results":[]}"#,
        )
        .unwrap();
        match inbound.message {
            ServerMessage::AddTranscript { metadata } => {
                assert_eq!(metadata.transcript, "hello");
                assert_eq!(metadata.end_time, 1.0);
            }
            other => panic!("Expected AddTranscript, got {:?}", other),
        }
    }

    #[test]
    fn test_error_deserialization() {
        let inbound =
            decode_text(r#"{"message":"Error","type":"invalid_model","reason":"bad template"}"#)
                .unwrap();
        assert_eq!(
            inbound.message,
            ServerMessage::Error {
                error_type: "invalid_model".to_string(),
                reason: "bad template".to_string(),
            }
        );
    }

    #[test]
    fn test_unit_variants() {
        let inbound = decode_text(r#"{"message":"ConversationEnded"}"#).unwrap();
        assert_eq!(inbound.message, ServerMessage::ConversationEnded);
    }

    #[test]
    fn test_unknown_tag_keeps_raw() {
        let inbound = decode_text(r#"{"message":"SomethingNew","x":1}"#).unwrap();
        assert_eq!(inbound.message, ServerMessage::Unknown);
        assert_eq!(inbound.raw["x"], 1);
        assert_eq!(inbound.tag(), Some("SomethingNew"));
    }

    #[test]
    fn test_untagged_json_is_unknown() {
        let inbound = decode_text(r#"{"hello":"world"}"#).unwrap();
        assert_eq!(inbound.message, ServerMessage::Unknown);
        assert_eq!(inbound.tag(), None);
    }

    #[test]
    fn test_malformed_field_type_is_unknown() {
        let inbound = decode_text(r#"{"message":"ResponseCompleted","content":42}"#).unwrap();
        assert_eq!(inbound.message, ServerMessage::Unknown);
    }

    #[test]
    fn test_non_json_fails() {
        assert!(decode_text("not json {").is_err());
        assert!(decode_text("").is_err());
    }
}
