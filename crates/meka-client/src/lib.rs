//! Meka session client
//!
//! Keeps a local mirror of a remote turn-based game session synchronized over a
//! persistent WebSocket connection.
//!
//! # Architecture
//!
//! - **Transport**: owns the WebSocket, hands inbound frames to a single consumer
//! - **Router**: decodes frames and dispatches them in receipt order
//! - **Sync controller**: the only writer of the [`SessionMirror`]; full imports and
//!   contiguous incremental ticks, with a download request on any gap
//! - **Clock**: local presentation tick counter, resynced from server snapshots
//!
//! Game rules live behind the [`Simulation`] trait; the client never interprets game
//! state itself.
//!
//! # Quick Start
//!
//! ```text
//! let config = ClientConfig::load()?;
//! let mut client = SessionClient::new("session-id", config, RawSimulation);
//! let mut events = client.subscribe();
//!
//! client.connect().await?;
//! client.join()?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! # Modules
//!
//! - `client`: connect handshake and outbound commands (main entry point)
//! - `session`: session mirror and wire data model
//! - `sync`: synchronization controller
//! - `router`: inbound frame dispatch
//! - `transport`: WebSocket and loopback transports
//! - `message`: wire messages
//! - `clock`: local tick clock
//! - `notify`: notification bus
//! - `simulation`: game engine collaborator
//! - `auth`: GraphQL API collaborator
//! - `config`: client configuration

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod notify;
pub mod router;
pub mod session;
pub mod simulation;
pub mod sync;
pub mod transport;

pub use auth::{ApiClient, Authenticator};
pub use client::SessionClient;
pub use clock::{Clock, ClockParams, ClockSettings};
pub use config::{ClientConfig, ClockConfig};
pub use error::{AuthError, ClientError, ProtocolError, SimulationError, TransportError};
pub use message::{ClientMessage, ServerMessage};
pub use notify::{Notification, NotificationBus, NotificationKind, SessionNotification};
pub use session::{
    ClientDescriptor, Participant, SessionMirror, SessionSnapshot, SessionStatus, UserProfile,
};
pub use simulation::{CommandRegistry, RawCommand, RawGame, RawSimulation, Simulation};
pub use sync::SyncController;
pub use transport::{Inbound, LoopbackPeer, Outbound, Transport, NORMAL_CLOSURE};
