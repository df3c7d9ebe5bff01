//! Wire messages
//!
//! JSON text frames exchanged with the game server, tagged by `eventType`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::session::{ClientDescriptor, SessionSnapshot, UserProfile};

/// Incremental turn payload of a `tick` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub turn: u64,
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub command_responses: Option<Vec<Value>>,
}

/// Frames received from the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Explicit resync response
    Download { state: SessionSnapshot },
    AddClient {
        state: SessionSnapshot,
        data: ClientDescriptor,
    },
    CloseClient {
        state: SessionSnapshot,
        data: ClientDescriptor,
    },
    JoinUser {
        state: SessionSnapshot,
        #[serde(default)]
        data: Option<UserProfile>,
    },
    /// Without a state this only flips the described participant to ready
    ReadyUser {
        #[serde(default)]
        state: Option<SessionSnapshot>,
        data: UserProfile,
    },
    Ready { state: SessionSnapshot },
    Unready { state: SessionSnapshot },
    Start { state: SessionSnapshot },
    Pause { state: SessionSnapshot },
    Unpause { state: SessionSnapshot },
    Forfeit {
        state: SessionSnapshot,
        #[serde(default)]
        data: Option<UserProfile>,
    },
    Tick { data: TickPayload },
    End { state: SessionSnapshot },
    /// Any tag this client does not know
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decode a text frame
    ///
    /// Unknown tags come back as [`ProtocolError::UnknownEvent`] so callers can log the tag.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = match value.get("eventType") {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(ProtocolError::MissingEventType),
        };
        match ServerMessage::deserialize(value)? {
            ServerMessage::Unknown => Err(ProtocolError::UnknownEvent(tag)),
            message => Ok(message),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ServerMessage::Download { .. } => "download",
            ServerMessage::AddClient { .. } => "addclient",
            ServerMessage::CloseClient { .. } => "closeclient",
            ServerMessage::JoinUser { .. } => "joinuser",
            ServerMessage::ReadyUser { .. } => "readyuser",
            ServerMessage::Ready { .. } => "ready",
            ServerMessage::Unready { .. } => "unready",
            ServerMessage::Start { .. } => "start",
            ServerMessage::Pause { .. } => "pause",
            ServerMessage::Unpause { .. } => "unpause",
            ServerMessage::Forfeit { .. } => "forfeit",
            ServerMessage::Tick { .. } => "tick",
            ServerMessage::End { .. } => "end",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// `data` payload of a `commands` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsPayload {
    pub commands: Vec<Value>,
}

/// Frames sent to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum ClientMessage {
    Join,
    Ready,
    Unready,
    /// Ask for a full snapshot
    Download,
    Commands { data: CommandsPayload },
}

impl ClientMessage {
    /// Build a `commands` frame from already-serialized commands
    pub fn commands(commands: Vec<Value>) -> Self {
        ClientMessage::Commands {
            data: CommandsPayload { commands },
        }
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("JSON encoding failed")
    }
}
