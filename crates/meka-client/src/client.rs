//! Session client
//!
//! Ties the pieces together: authenticate, open the transport, hand inbound frames to the
//! router and wait until the first session state has been imported.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{ApiClient, Authenticator};
use crate::config::ClientConfig;
use crate::error::{AuthError, ClientError, Result, TransportError};
use crate::message::ClientMessage;
use crate::notify::{Notification, NotificationBus, SessionNotification};
use crate::router;
use crate::session::{SessionMirror, UserProfile};
use crate::simulation::Simulation;
use crate::sync::SyncController;
use crate::transport::{Inbound, Transport, NORMAL_CLOSURE};

/// Close reason for a client-initiated disconnect
pub const DISCONNECT_REASON: &str = "Client disconnected";

/// Client for one game session
pub struct SessionClient<S: Simulation, A: Authenticator = ApiClient> {
    session_id: String,
    config: ClientConfig,
    auth: A,
    simulation: Arc<S>,
    transport: Transport,
    controller: Arc<Mutex<SyncController<S>>>,
    bus: Arc<NotificationBus<SessionNotification<S>>>,
    router: Option<JoinHandle<()>>,
}

impl<S: Simulation> SessionClient<S, ApiClient> {
    pub fn new(session_id: impl Into<String>, config: ClientConfig, simulation: S) -> Self {
        let auth = ApiClient::from_config(&config);
        Self::with_auth(session_id, config, simulation, auth)
    }
}

impl<S: Simulation, A: Authenticator> SessionClient<S, A> {
    pub fn with_auth(
        session_id: impl Into<String>,
        config: ClientConfig,
        simulation: S,
        auth: A,
    ) -> Self {
        let session_id = session_id.into();
        let simulation = Arc::new(simulation);
        let transport = Transport::new();
        let bus = Arc::new(NotificationBus::new());
        let controller = SyncController::new(
            session_id.clone(),
            Arc::clone(&simulation),
            transport.clone(),
            Arc::clone(&bus),
            config.clock.settings(),
        );

        Self {
            session_id,
            config,
            auth,
            simulation,
            transport,
            controller: Arc::new(Mutex::new(controller)),
            bus,
            router: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    /// Register observers here, before connecting, to see `Connected`
    pub fn notifications(&self) -> &NotificationBus<SessionNotification<S>> {
        &self.bus
    }

    /// Shorthand for `notifications().subscribe()`
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionNotification<S>> {
        self.bus.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    /// Read the mirror under the controller lock
    pub async fn with_mirror<R>(&self, f: impl FnOnce(&SessionMirror<S>) -> R) -> R {
        let controller = self.controller.lock().await;
        f(controller.mirror())
    }

    /// Exchange configured credentials for a JWT unless one is already held
    pub async fn require_auth(&mut self) -> Result<()> {
        if self.auth.is_authenticated() {
            return Ok(());
        }
        match (&self.config.api_key, &self.config.api_secret) {
            (Some(key), Some(secret)) => {
                debug!("Authenticating with API key");
                self.auth.authenticate(key, secret).await?;
                Ok(())
            }
            _ => Err(AuthError::NotAuthenticated.into()),
        }
    }

    /// Profile of the authenticated user
    pub async fn me(&mut self) -> Result<Option<UserProfile>> {
        self.require_auth().await?;
        Ok(self.auth.current_user().await?)
    }

    /// Connect and wait for the first full session state
    ///
    /// Resolves once the mirror holds a session status. Fails on auth or transport errors,
    /// when the server closes the connection first, or after the connect timeout. A
    /// timeout leaves the connection open; call [`SessionClient::disconnect`] to drop it.
    pub async fn connect(&mut self) -> Result<()> {
        self.require_auth().await?;
        let token = self.auth.handshake_token().await?;
        let url = Transport::session_url(&self.config.websocket_url, &self.session_id, Some(&token));

        info!("Connecting to session {}", self.session_id);
        let inbound = self.transport.open(&url).await?;
        self.start(inbound).await
    }

    /// Run the session over an already-open transport
    ///
    /// Same handshake semantics as [`SessionClient::connect`], minus auth. Used with
    /// [`Transport::loopback`].
    pub async fn attach(
        &mut self,
        transport: Transport,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<()> {
        self.transport = transport.clone();
        self.controller.lock().await.set_transport(transport);
        self.start(inbound).await
    }

    async fn start(&mut self, inbound: mpsc::UnboundedReceiver<Inbound>) -> Result<()> {
        // Subscribe before the router runs so the first import cannot be missed
        let mut events = self.bus.subscribe();
        self.router = Some(tokio::spawn(router::run(
            Arc::clone(&self.controller),
            inbound,
        )));

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, wait_for_sync::<S>(&mut events)).await {
            Ok(Ok(())) => {
                info!("Connected to session {}", self.session_id);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("No session state within {:?}", timeout);
                Err(ClientError::ConnectTimeout(timeout))
            }
        }
    }

    /// Close the connection and stop the clock
    pub async fn disconnect(&mut self) {
        info!("Disconnecting from session {}", self.session_id);
        self.transport.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        self.controller.lock().await.stop_clock();
    }

    /// Wait until the router stops, i.e. the connection is gone
    pub async fn closed(&mut self) {
        if let Some(router) = self.router.take() {
            if let Err(e) = router.await {
                warn!("Router task failed: {}", e);
            }
        }
    }

    pub fn join(&self) -> Result<()> {
        self.send(&ClientMessage::Join)
    }

    pub fn ready(&self) -> Result<()> {
        self.send(&ClientMessage::Ready)
    }

    pub fn unready(&self) -> Result<()> {
        self.send(&ClientMessage::Unready)
    }

    /// Ask the server for a full snapshot
    pub fn request_download(&self) -> Result<()> {
        self.send(&ClientMessage::Download)
    }

    /// Encode commands through the engine and send them as one frame
    pub fn send_commands(&self, commands: &[S::Command]) -> Result<()> {
        let encoded = commands
            .iter()
            .map(|command| self.simulation.encode_command(command))
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        self.send(&ClientMessage::commands(encoded))
    }

    pub fn send_command(&self, command: &S::Command) -> Result<()> {
        self.send_commands(std::slice::from_ref(command))
    }

    /// Decode a serialized command against the current game
    pub async fn decode_command(&self, json: &Value) -> Result<S::Command> {
        let controller = self.controller.lock().await;
        let game = controller.mirror().game().ok_or(ClientError::NotConnected)?;
        Ok(self.simulation.decode_tagged_command(game, json)?)
    }

    fn send(&self, message: &ClientMessage) -> Result<()> {
        debug!("Sending {:?}", message);
        self.transport.send_message(message).map_err(|e| match e {
            TransportError::NotOpen => ClientError::NotConnected,
            other => other.into(),
        })
    }
}

impl<S: Simulation, A: Authenticator> Drop for SessionClient<S, A> {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

async fn wait_for_sync<S: Simulation>(
    events: &mut mpsc::UnboundedReceiver<SessionNotification<S>>,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            Notification::Connected => return Ok(()),
            Notification::Disconnected { code, reason } => {
                return Err(TransportError::ClosedDuringHandshake { code, reason }.into());
            }
            _ => {}
        }
    }
    Err(ClientError::NotConnected)
}

impl<S: Simulation, A: Authenticator> std::fmt::Debug for SessionClient<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("session_id", &self.session_id)
            .field("transport", &self.transport)
            .finish()
    }
}
