//! Watch command handler
//!
//! Connects to a session and prints notifications until the connection closes or the
//! user interrupts.

use anyhow::{Context, Result};
use tracing::info;

use meka_client::{ClientConfig, Notification, RawSimulation, SessionClient};

use crate::output::Output;

/// What to do once connected
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Send `join` after connecting
    pub join: bool,
    /// Send `ready` after connecting
    pub ready: bool,
}

pub async fn watch(
    config: ClientConfig,
    session_id: String,
    options: WatchOptions,
    output: &Output,
) -> Result<()> {
    let mut client = SessionClient::new(session_id.clone(), config, RawSimulation);
    let mut events = client.subscribe();

    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to session {}", session_id))?;

    if options.join {
        client.join().context("Failed to send join")?;
    }
    if options.ready {
        client.ready().context("Failed to send ready")?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; closing session connection");
                client.disconnect().await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                output.print_notification(&event);
                if matches!(event, Notification::Disconnected { .. }) {
                    break;
                }
            }
        }
    }

    client
        .with_mirror(|mirror| output.print_summary(mirror))
        .await;
    Ok(())
}
