//! Wire protocol for the duplex WebSocket endpoint.
//!
//! All structured frames are JSON objects with a `type` tag and an optional
//! `payload`. Binary frames carry audio in both directions and bypass this
//! module entirely.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::history::ChatTurn;

/// Messages sent from the gateway to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected { payload: ConnectedPayload },
    Ready,
    Status { payload: StatusPayload },
    RecognitionStarted,
    RecognitionStopped,
    PartialTranscription { payload: String },
    Transcription { payload: String },
    LlmResponse { payload: String },
    Interrupted,
    ConversationCleared,
    ConversationHistory { payload: Vec<ChatTurn> },
    Error { payload: ErrorPayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub id: String,
    pub timestamp: String,
}

impl ConnectedPayload {
    pub fn now(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub app: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

/// Messages received from the client over text frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping,
    ClearConversation,
    GetConversation,
    TextInput(String),
    StartRecognition,
    StopRecognition,
    /// Unrecognized type tag, logged and ignored.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Parse a text frame into a [`ClientMessage`].
///
/// A frame that is not a JSON object with a string `type` is a protocol
/// error; a frame with an unknown `type` is tolerated as `Unknown`.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| format!("malformed message: {e}"))?;
    let msg = match envelope.kind.as_str() {
        "ping" => ClientMessage::Ping,
        "clearConversation" => ClientMessage::ClearConversation,
        "getConversation" => ClientMessage::GetConversation,
        "textInput" => {
            let text = envelope
                .payload
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| "textInput requires a string payload".to_string())?;
            ClientMessage::TextInput(text.to_string())
        }
        "startRecognition" => ClientMessage::StartRecognition,
        "stopRecognition" => ClientMessage::StopRecognition,
        other => ClientMessage::Unknown(other.to_string()),
    };
    Ok(msg)
}

/// Frames queued for the socket writer task.
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    Audio(Vec<u8>),
    Ping,
    Pong(Vec<u8>),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_messages_tag_camel_case() {
        let json = serde_json::to_string(&ServerMessage::PartialTranscription {
            payload: "hel".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"partialTranscription","payload":"hel"}"#);

        let json = serde_json::to_string(&ServerMessage::Interrupted).unwrap();
        assert_eq!(json, r#"{"type":"interrupted"}"#);
    }

    #[test]
    fn error_payload_omits_missing_details() {
        let json = serde_json::to_string(&ServerMessage::Error {
            payload: ErrorPayload::new("generation failed"),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","payload":{"message":"generation failed"}}"#
        );
    }

    #[test]
    fn parses_known_client_messages() {
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#),
            Ok(ClientMessage::Ping)
        );
        assert_eq!(
            parse_client_message(r#"{"type":"textInput","payload":"hello"}"#),
            Ok(ClientMessage::TextInput("hello".into()))
        );
        assert_eq!(
            parse_client_message(r#"{"type":"startRecognition"}"#),
            Ok(ClientMessage::StartRecognition)
        );
    }

    #[test]
    fn unknown_type_is_tolerated() {
        assert_eq!(
            parse_client_message(r#"{"type":"telemetry","payload":{}}"#),
            Ok(ClientMessage::Unknown("telemetry".into()))
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(parse_client_message("not json").is_err());
        assert!(parse_client_message(r#"{"type":"textInput"}"#).is_err());
    }
}
