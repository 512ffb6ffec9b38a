//! Envelope definitions for the chat socket.
//!
//! Outbound frames are flat objects tagged by `type`:
//! `{"type":"init","user_id":"..","session_id":null}`.
//! Inbound frames carry their payload under `data`:
//! `{"type":"session","data":{"session_id":"abc123"}}`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;
use crate::models::{ActivityNotice, ContentMessage, SessionInfo, ToolCall, ToolResult};

pub const TAG_SESSION: &str = "session";
pub const TAG_MESSAGE: &str = "message";
pub const TAG_ACTIVITY: &str = "activity";
pub const TAG_TOOL_CALL: &str = "tool_call";
pub const TAG_TOOL_RESULT: &str = "tool_result";

/// Frames the client writes to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake. Always the first frame on a fresh connection.
    Init {
        user_id: String,
        session_id: Option<String>,
    },
    Message {
        content: String,
    },
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Session(SessionInfo),
    Message(ContentMessage),
    Activity(ActivityNotice),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
    /// A well-formed envelope with a tag this client does not model.
    Other { tag: String, data: Value },
}

impl ServerEvent {
    /// The wire tag of this event.
    pub fn tag(&self) -> &str {
        match self {
            ServerEvent::Session(_) => TAG_SESSION,
            ServerEvent::Message(_) => TAG_MESSAGE,
            ServerEvent::Activity(_) => TAG_ACTIVITY,
            ServerEvent::ToolCall(_) => TAG_TOOL_CALL,
            ServerEvent::ToolResult(_) => TAG_TOOL_RESULT,
            ServerEvent::Other { tag, .. } => tag,
        }
    }

    /// The session token carried by a `session` event, if any.
    pub fn session_token(&self) -> Option<&str> {
        match self {
            ServerEvent::Session(info) => info.session_id.as_deref(),
            _ => None,
        }
    }

    /// Re-encode as a `{"type":..,"data":..}` envelope.
    pub fn to_frame(&self) -> Value {
        let data = match self {
            ServerEvent::Session(p) => serde_json::to_value(p),
            ServerEvent::Message(p) => serde_json::to_value(p),
            ServerEvent::Activity(p) => serde_json::to_value(p),
            ServerEvent::ToolCall(p) => serde_json::to_value(p),
            ServerEvent::ToolResult(p) => serde_json::to_value(p),
            ServerEvent::Other { data, .. } => Ok(data.clone()),
        }
        .unwrap_or_default();

        let mut frame = Map::new();
        frame.insert("type".to_string(), Value::String(self.tag().to_string()));
        frame.insert("data".to_string(), data);
        Value::Object(frame)
    }
}

/// Parse one inbound text frame.
///
/// Unknown tags are accepted as [`ServerEvent::Other`]; a known tag whose
/// payload does not fit its type is rejected.
pub fn parse_server_frame(text: &str) -> Result<ServerEvent, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(FrameError::Json)?;
    let Value::Object(mut frame) = value else {
        return Err(FrameError::NotAnObject);
    };

    let tag = match frame.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(FrameError::MissingTag),
    };
    let data = match frame.remove("data") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(data) => data,
    };

    let event = match tag.as_str() {
        TAG_SESSION => ServerEvent::Session(decode(&tag, data)?),
        TAG_MESSAGE => ServerEvent::Message(decode(&tag, data)?),
        TAG_ACTIVITY => ServerEvent::Activity(decode(&tag, data)?),
        TAG_TOOL_CALL => ServerEvent::ToolCall(decode(&tag, data)?),
        TAG_TOOL_RESULT => ServerEvent::ToolResult(decode(&tag, data)?),
        _ => ServerEvent::Other { tag, data },
    };
    Ok(event)
}

fn decode<T: DeserializeOwned>(tag: &str, data: Value) -> Result<T, FrameError> {
    serde_json::from_value(data).map_err(|source| FrameError::Payload {
        tag: tag.to_string(),
        source,
    })
}
