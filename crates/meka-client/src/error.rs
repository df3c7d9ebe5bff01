//! Error types
//!
//! One error enum per concern. Only [`TransportError`] and [`AuthError`] (plus the
//! connect timeout) ever reach callers as failures; protocol anomalies and desyncs are
//! handled inside the synchronization engine and surface as notifications.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// `open` was called on a transport that was already opened once
    #[error("Transport was already opened; a transport instance can only be opened once")]
    AlreadyOpened,

    /// Attempted to send before the connection was open
    #[error("Cannot send: transport is not open yet")]
    NotOpen,

    /// Attempted to send after the connection was closed
    #[error("Cannot send: transport is closed")]
    Closed,

    /// Failed to establish the WebSocket connection
    #[error("Failed to connect to '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// Socket failure after the connection was established
    #[error("WebSocket error: {0}")]
    Socket(String),

    /// Server closed the connection before the session was synchronized
    #[error("Server closed the connection during handshake (code {code:?}): {reason}")]
    ClosedDuringHandshake { code: Option<u16>, reason: String },
}

impl TransportError {
    /// Whether a fresh connect attempt (on a new transport) may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. }
                | TransportError::Socket(_)
                | TransportError::ClosedDuringHandshake { .. }
        )
    }
}

/// Inbound frames that could not be dispatched
///
/// These are never returned to callers: the router logs them, counts them and moves on.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match the shape for its tag
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame carried an `eventType` this client does not know
    #[error("Unknown event type '{0}'")]
    UnknownEvent(String),

    /// Frame had no `eventType` at all
    #[error("Frame has no eventType")]
    MissingEventType,
}

/// Errors reported by the simulation engine collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// A game, action or command response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// No decoder is registered for a command discriminator
    #[error("Unknown command kind '{0}'")]
    UnknownCommand(String),

    /// The engine failed to apply a turn
    #[error("Failed to apply turn: {0}")]
    Apply(String),

    /// A command could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Errors from the auth/API collaborator
#[derive(Error, Debug)]
pub enum AuthError {
    /// HTTP request failed
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API answered with GraphQL errors
    #[error("GraphQL error: {}", messages.join(", "))]
    GraphQl { messages: Vec<String> },

    /// The JWT used for the request has expired
    #[error("API token expired. Authenticate again.")]
    TokenExpired,

    /// An operation needed credentials but none were configured
    #[error("Not authenticated: configure an API key and secret or a JWT")]
    NotAuthenticated,

    /// Response did not contain the expected field
    #[error("API response is missing '{0}'")]
    MissingData(&'static str),
}

/// Errors returned by [`crate::SessionClient`] operations
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// The session was not synchronized within the connect timeout
    #[error("Connection timed out after {0:?} waiting for the session state")]
    ConnectTimeout(Duration),

    /// Operation requires a connected session
    #[error("Not connected to a session")]
    NotConnected,
}

/// Result alias used by the client API
pub type Result<T, E = ClientError> = std::result::Result<T, E>;
