//! Message router
//!
//! The sole consumer of inbound frames. Each frame is decoded, dispatched on its
//! `eventType` and fully handled before the next one is looked at.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::message::ServerMessage;
use crate::notify::Notification;
use crate::simulation::Simulation;
use crate::sync::SyncController;
use crate::transport::Inbound;

/// Drain inbound frames into the controller until the connection goes away
pub async fn run<S: Simulation>(
    controller: Arc<Mutex<SyncController<S>>>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Frame(text) => {
                let mut controller = controller.lock().await;
                route_frame(&mut controller, &text).await;
            }
            Inbound::Closed { code, reason } => {
                info!("Connection closed ({:?}): {}", code, reason);
                controller.lock().await.connection_lost(code, reason);
                return;
            }
            Inbound::Error(e) => {
                warn!("Connection failed: {}", e);
                controller.lock().await.connection_lost(None, e.to_string());
                return;
            }
        }
    }
    debug!("Inbound channel closed");
}

/// Decode and dispatch one text frame
pub async fn route_frame<S: Simulation>(controller: &mut SyncController<S>, text: &str) {
    match ServerMessage::decode(text) {
        Ok(message) => dispatch(controller, message).await,
        Err(ProtocolError::UnknownEvent(tag)) => {
            debug!("Ignoring unknown event type '{}'", tag);
            controller.drop_frame(format!("unknown event type '{tag}'"));
        }
        Err(e) => {
            warn!("Dropping frame: {}", e);
            controller.drop_frame(e.to_string());
        }
    }
}

/// Apply one decoded message
///
/// Nothing is applied once the session has ended. An `end` frame closes the
/// connection even when its snapshot is rejected or reports another status.
pub async fn dispatch<S: Simulation>(controller: &mut SyncController<S>, message: ServerMessage) {
    if controller.is_finished() {
        debug!("Session ended; dropping '{}'", message.event_type());
        controller.drop_frame(format!("'{}' after session end", message.event_type()));
        return;
    }

    match message {
        ServerMessage::Download { state } => {
            controller.import_and_notify(state, Notification::Download)
        }
        ServerMessage::AddClient { state, data } => {
            controller.import_and_notify(state, Notification::ClientAdded { client: data })
        }
        ServerMessage::CloseClient { state, data } => {
            controller.import_and_notify(state, Notification::ClientClosed { client: data })
        }
        ServerMessage::JoinUser { state, data } => {
            controller.import_and_notify(state, Notification::UserJoined { user: data })
        }
        ServerMessage::ReadyUser {
            state: Some(state),
            data,
        } => controller.import_and_notify(state, Notification::UserReady { user: data }),
        ServerMessage::ReadyUser { state: None, data } => controller.mark_ready(data),
        ServerMessage::Ready { state } => controller.import_and_notify(state, Notification::Ready),
        ServerMessage::Unready { state } => {
            controller.import_and_notify(state, Notification::Unready)
        }
        ServerMessage::Start { state } => controller.import_and_notify(state, Notification::Start),
        ServerMessage::Pause { state } => controller.import_and_notify(state, Notification::Pause),
        ServerMessage::Unpause { state } => {
            controller.import_and_notify(state, Notification::Unpause)
        }
        ServerMessage::Forfeit { state, data } => {
            controller.import_and_notify(state, Notification::Forfeit { user: data })
        }
        ServerMessage::Tick { data } => {
            controller
                .apply_tick(data.turn, data.actions, data.command_responses)
                .await
        }
        ServerMessage::End { state } => {
            controller.import_and_notify(state, Notification::End);
            controller.end_session();
        }
        ServerMessage::Unknown => controller.drop_frame("unknown event type".to_string()),
    }

    controller.finish_if_ended();
}
