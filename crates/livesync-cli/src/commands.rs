//! Command handlers for the chat CLI

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use livesync_runtime::{LiveQuery, QuerySnapshot, QueryState, SyncClient, SyncError};

use crate::cli::Commands;
use crate::config::validate_username;
use crate::error::{CliError, Result};
use crate::message::{display_order, list_args, optimistic_echo, send_args, LIST_MESSAGES, SEND_MESSAGE};

/// Marker printed when the message list may be outdated
pub const STALE_MARKER: &str = "-- offline, messages may be outdated --";

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against a connected client
    pub async fn execute(command: Commands, client: SyncClient, username: String) -> Result<()> {
        match command {
            Commands::Watch => Self::handle_watch_command(client).await,
            Commands::Send { body } => Self::handle_send_command(client, username, body).await,
            Commands::Chat => Self::handle_chat_command(client, username).await,
        }
    }

    async fn handle_watch_command(client: SyncClient) -> Result<()> {
        let query = client.watch(LIST_MESSAGES, list_args()).await?;
        tokio::select! {
            result = Self::print_updates(query) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                Ok(())
            }
        }
    }

    async fn handle_send_command(client: SyncClient, username: String, body: String) -> Result<()> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CliError::MessageFormat("message body is empty".to_string()));
        }
        let id = Self::send(&client, &username, body).await?;
        println!("Sent as {username} ({id})");
        Ok(())
    }

    async fn handle_chat_command(client: SyncClient, mut username: String) -> Result<()> {
        info!(username = %username, "Starting interactive chat");
        println!("Chatting as {username}. Type /name <new name> to rename, /quit to leave.");

        let query = client.watch(LIST_MESSAGES, list_args()).await?;
        let printer = tokio::spawn(Self::print_updates(query));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };

            match ChatInput::parse(&line) {
                ChatInput::Empty => {}
                ChatInput::Quit => break,
                ChatInput::Rename(name) => match validate_username(&name) {
                    Ok(name) => {
                        println!("Now chatting as {name}");
                        username = name;
                    }
                    Err(e) => println!("{e}"),
                },
                ChatInput::Message(body) => {
                    let client = client.clone();
                    let author = username.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::send(&client, &author, &body).await {
                            warn!(error = %e, "Message not delivered");
                            println!("Failed to send \"{body}\": {e}");
                        }
                    });
                }
            }
        }

        printer.abort();
        Ok(())
    }

    /// Send one message with an optimistic echo and return the backend's document id
    async fn send(client: &SyncClient, author: &str, body: &str) -> Result<String> {
        let result = client
            .call_with_optimistic_update(
                SEND_MESSAGE,
                send_args(author, body),
                optimistic_echo(author, body),
            )
            .await?;
        debug!(result = ?result, "sendMessage acknowledged");
        Ok(result.as_str().map(String::from).unwrap_or_else(|| result.to_canonical_json()))
    }

    /// Print the message list on every change until the subscription ends
    async fn print_updates(mut query: LiveQuery) -> Result<()> {
        let mut was_stale = false;
        loop {
            let snapshot = match query.changed().await {
                Ok(snapshot) => snapshot,
                Err(SyncError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if let Some(error) = snapshot.error.clone() {
                return match error {
                    SyncError::Closed => Ok(()),
                    other => Err(other.into()),
                };
            }
            if snapshot.stale != was_stale {
                was_stale = snapshot.stale;
                if was_stale {
                    println!("{STALE_MARKER}");
                }
            }
            for line in render_snapshot(&snapshot)? {
                println!("{line}");
            }
        }
    }
}

/// One line typed in interactive mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Empty,
    Quit,
    Rename(String),
    Message(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ChatInput::Empty;
        }
        if trimmed == "/quit" {
            return ChatInput::Quit;
        }
        if let Some(name) = trimmed.strip_prefix("/name") {
            if name.is_empty() || name.starts_with(char::is_whitespace) {
                return ChatInput::Rename(name.to_string());
            }
        }
        ChatInput::Message(trimmed.to_string())
    }
}

/// Lines to print for a snapshot; empty while the list is still loading
pub fn render_snapshot(snapshot: &QuerySnapshot) -> Result<Vec<String>> {
    match &snapshot.state {
        QueryState::Loading => Ok(Vec::new()),
        QueryState::Failed(message) => Ok(vec![format!("listMessages failed: {message}")]),
        QueryState::Loaded(value) => {
            let messages = display_order(value)?;
            let mut lines = Vec::with_capacity(messages.len() + 1);
            lines.push(format!("== {} messages ==", messages.len()));
            lines.extend(messages.iter().map(ToString::to_string));
            Ok(lines)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use livesync_runtime::{Value, Version};

    #[test]
    fn test_chat_input_parsing() {
        assert_eq!(ChatInput::parse("   "), ChatInput::Empty);
        assert_eq!(ChatInput::parse("/quit"), ChatInput::Quit);
        assert_eq!(ChatInput::parse("/name Ada"), ChatInput::Rename(" Ada".into()));
        assert_eq!(ChatInput::parse("/names"), ChatInput::Message("/names".into()));
        assert_eq!(ChatInput::parse("  hi there "), ChatInput::Message("hi there".into()));
    }

    #[test]
    fn test_rename_to_blank_rejected() {
        let ChatInput::Rename(name) = ChatInput::parse("/name    ") else {
            panic!("Expected rename");
        };
        assert!(validate_username(&name).is_err());
    }

    #[test]
    fn test_render_loaded_snapshot() {
        let snapshot = QuerySnapshot {
            state: QueryState::Loaded(Value::Array(vec![
                ChatMessage::pending_value("Ada", "new"),
                ChatMessage::pending_value("Bob", "old"),
            ])),
            version: Version::new(3, 1),
            stale: false,
            error: None,
        };
        assert_eq!(
            render_snapshot(&snapshot).unwrap(),
            vec![
                "== 2 messages ==".to_string(),
                "Bob: old (sending)".to_string(),
                "Ada: new (sending)".to_string(),
            ]
        );
    }

    #[test]
    fn test_render_loading_and_failed() {
        assert!(render_snapshot(&QuerySnapshot::default()).unwrap().is_empty());

        let failed = QuerySnapshot {
            state: QueryState::Failed("boom".into()),
            ..QuerySnapshot::default()
        };
        assert_eq!(
            render_snapshot(&failed).unwrap(),
            vec!["listMessages failed: boom".to_string()]
        );
    }
}
