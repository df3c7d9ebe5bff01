//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag), one object per line for notifications
//! - Quiet mode for scripting (--quiet flag)

use meka_client::{
    ClientConfig, Notification, RawSimulation, SessionMirror, SessionNotification, UserProfile,
};

/// Notifications as seen by the CLI, which keeps game data as JSON
pub type WatchNotification = SessionNotification<RawSimulation>;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print one session notification
    pub fn print_notification(&self, notification: &WatchNotification) {
        match self.format {
            OutputFormat::Human => {
                if let Some(line) = describe(notification) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => match notification {
                Notification::Tick {
                    turn,
                    actions,
                    command_responses,
                } => println!(
                    "{}",
                    serde_json::json!({
                        "kind": "tick",
                        "turn": turn,
                        "actions": actions,
                        "command_responses": command_responses,
                    })
                ),
                other => match serde_json::to_string(other) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Could not encode notification: {}", e),
                },
            },
            OutputFormat::Quiet => {
                if let Notification::Tick { turn, .. } = notification {
                    println!("{}", turn);
                }
            }
        }
    }

    /// Print the final state of a watched session
    pub fn print_summary(&self, mirror: &SessionMirror<RawSimulation>) {
        let status = mirror.status().map(|s| s.as_str()).unwrap_or("unknown");
        let turn = mirror.game().map(|game| game.turn);
        match self.format {
            OutputFormat::Human => {
                println!();
                println!("Session:  {}", mirror.session_id());
                println!("Status:   {}", status);
                if let Some(turn) = turn {
                    println!("Turn:     {}", turn);
                }
                println!("Players:  {}", mirror.user_list().len());
                if let Some(winner) = mirror.winner_id() {
                    let name = mirror
                        .participant(winner)
                        .map(|p| p.user.display_name())
                        .unwrap_or(winner);
                    println!("Winner:   {}", name);
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "kind": "summary",
                        "session_id": mirror.session_id(),
                        "status": status,
                        "turn": turn,
                        "players": mirror.user_list().len(),
                        "winner_id": mirror.winner_id(),
                    })
                );
            }
            OutputFormat::Quiet => {
                println!("{}", status);
            }
        }
    }

    /// Print a user profile
    pub fn print_profile(&self, profile: Option<&UserProfile>) {
        match self.format {
            OutputFormat::Human => match profile {
                Some(profile) => {
                    println!("UID:      {}", profile.uid);
                    println!("Username: {}", profile.username.as_deref().unwrap_or("(not set)"));
                    if let Some(ref email) = profile.email {
                        println!("Email:    {}", email);
                    }
                    if let Some(elo) = profile.elo {
                        println!("Elo:      {:.0}", elo);
                    }
                }
                None => println!("No user profile for this token."),
            },
            OutputFormat::Json => {
                println!("{}", serde_json::json!(profile));
            }
            OutputFormat::Quiet => {
                if let Some(profile) = profile {
                    println!("{}", profile.uid);
                }
            }
        }
    }

    /// Print configuration with secrets masked
    pub fn print_config(&self, config: &ClientConfig, path: &std::path::Path) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "api_url": config.api_url,
                        "websocket_url": config.websocket_url,
                        "api_key": config.api_key,
                        "api_secret": config.api_secret.as_ref().map(|_| "********"),
                        "jwt": config.jwt.as_ref().map(|_| "********"),
                        "connect_timeout_secs": config.connect_timeout_secs,
                        "clock": config.clock,
                        "log_level": config.log_level,
                        "config_file": path,
                    })
                );
            }
            OutputFormat::Quiet => {
                println!("{}", config.websocket_url);
            }
            OutputFormat::Human => {
                println!("Configuration:");
                println!("  api_url:              {}", config.api_url);
                println!("  websocket_url:        {}", config.websocket_url);
                println!(
                    "  api_key:              {}",
                    config.api_key.as_deref().unwrap_or("(not set)")
                );
                println!("  api_secret:           {}", mask(config.api_secret.as_deref()));
                println!("  jwt:                  {}", mask(config.jwt.as_deref()));
                println!("  connect_timeout_secs: {}", config.connect_timeout_secs);
                println!("  clock.tick_time_ms:   {}", config.clock.tick_time_ms);
                println!("  clock.tick_count:     {}", config.clock.tick_count);
                println!("  clock.auto_start:     {}", config.clock.auto_start);
                println!("  log_level:            {}", config.log_level);
                println!();
                println!("Config file: {}", path.display());
            }
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// One human-readable line per notification; local clock ticks are not shown
fn describe(notification: &WatchNotification) -> Option<String> {
    let line = match notification {
        Notification::Connected => "Connected".to_string(),
        Notification::LocalTick { .. } => return None,
        Notification::Download => "State downloaded".to_string(),
        Notification::ClientAdded { client } => {
            format!("Client {} connected ({})", client.id, client.user_id)
        }
        Notification::ClientClosed { client } => {
            format!("Client {} disconnected ({})", client.id, client.user_id)
        }
        Notification::UserJoined { user } => format!("{} joined", name(user.as_ref())),
        Notification::UserReady { user } => format!("{} is ready", user.display_name()),
        Notification::Ready => "All players ready".to_string(),
        Notification::Unready => "Players no longer ready".to_string(),
        Notification::Start => "Game started".to_string(),
        Notification::Pause => "Game paused".to_string(),
        Notification::Unpause => "Game resumed".to_string(),
        Notification::Forfeit { user } => format!("{} forfeited", name(user.as_ref())),
        Notification::End => "Game ended".to_string(),
        Notification::Tick {
            turn,
            actions,
            command_responses,
        } => {
            if command_responses.is_empty() {
                format!("Turn {}: {} action(s)", turn, actions.len())
            } else {
                format!(
                    "Turn {}: {} action(s), {} command response(s)",
                    turn,
                    actions.len(),
                    command_responses.len()
                )
            }
        }
        Notification::Desync {
            local_turn,
            server_turn,
        } => format!(
            "Out of sync (local turn {}, server turn {}); resynchronizing",
            local_turn, server_turn
        ),
        Notification::FrameDropped { reason } => format!("Ignored frame: {}", reason),
        Notification::Disconnected { code, reason } => match code {
            Some(code) => format!("Disconnected ({}): {}", code, reason),
            None => format!("Disconnected: {}", reason),
        },
    };
    Some(line)
}

fn name(user: Option<&UserProfile>) -> &str {
    user.map(UserProfile::display_name).unwrap_or("A player")
}

fn mask(secret: Option<&str>) -> &'static str {
    match secret {
        Some(_) => "********",
        None => "(not set)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meka_client::ClientDescriptor;
    use serde_json::json;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_describe_lifecycle() {
        assert_eq!(describe(&Notification::Start).as_deref(), Some("Game started"));
        assert_eq!(describe(&Notification::LocalTick { count: 4 }), None);
        assert_eq!(
            describe(&Notification::UserJoined { user: None }).as_deref(),
            Some("A player joined")
        );

        let mut ada = UserProfile::new("u1");
        ada.username = Some("ada".to_string());
        assert_eq!(
            describe(&Notification::Forfeit { user: Some(ada) }).as_deref(),
            Some("ada forfeited")
        );
    }

    #[test]
    fn test_describe_tick() {
        let tick = Notification::Tick {
            turn: 3,
            actions: vec![json!({"a": 1}), json!({"a": 2})],
            command_responses: vec![],
        };
        assert_eq!(describe(&tick).as_deref(), Some("Turn 3: 2 action(s)"));

        let tick = Notification::Tick {
            turn: 4,
            actions: vec![],
            command_responses: vec![json!({"ok": true})],
        };
        assert_eq!(
            describe(&tick).as_deref(),
            Some("Turn 4: 0 action(s), 1 command response(s)")
        );
    }

    #[test]
    fn test_describe_connections() {
        let client = ClientDescriptor {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
        };
        assert_eq!(
            describe(&Notification::ClientAdded { client }).as_deref(),
            Some("Client c1 connected (u1)")
        );
        assert_eq!(
            describe(&Notification::Disconnected {
                code: Some(1000),
                reason: "Game ended".to_string()
            })
            .as_deref(),
            Some("Disconnected (1000): Game ended")
        );
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(Some("secret")), "********");
        assert_eq!(mask(None), "(not set)");
    }
}
