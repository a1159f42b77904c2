//! Telegram Bot API integration: status messages out, operator commands in

use crate::stats::{StatsReporter, StatusChannel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.telegram.org";

/// Seconds a `getUpdates` call may block server-side
const LONG_POLL_SECS: u64 = 30;

/// Back-off after a failed poll
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const UNAUTHORIZED_REPLY: &str = "Unauthorized access. This incident will be reported.";
const STARTED_REPLY: &str = "OKX Racer Bot started. You will receive updates here.";
const STOPPED_REPLY: &str = "OKX Racer Bot stopped. You will no longer receive updates.";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

/// Minimal Bot API client
#[derive(Clone)]
pub struct TelegramBot {
    client: Client,
    base_url: String,
}

impl TelegramBot {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(api_base: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 30))
            .build()
            .context("Failed to create Telegram HTTP client")?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Telegram {} returned an unreadable body ({})", method, status))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram {} failed: {}",
                method,
                body.description.unwrap_or_else(|| status.to_string())
            );
        }
        body.result
            .with_context(|| format!("Telegram {} returned no result", method))
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl StatusChannel for TelegramBot {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64> {
        let message: Message = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_notification": true,
                }),
            )
            .await?;
        Ok(message.message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        // Returns the edited Message, or `true` for inline messages
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_notification": true,
                }),
            )
            .await?;
        Ok(())
    }
}

/// Operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
}

/// `/start`, `/stop` and `/status`, case-insensitive, optionally addressed as
/// `/cmd@botname`
pub fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let word = word.split('@').next().unwrap_or(word).to_lowercase();
    match word.as_str() {
        "/start" => Some(Command::Start),
        "/stop" => Some(Command::Stop),
        "/status" => Some(Command::Status),
        _ => None,
    }
}

/// Applies operator commands to the shared reporter
pub struct CommandListener {
    replies: Arc<dyn StatusChannel>,
    reporter: StatsReporter,
    authorized: HashSet<i64>,
}

impl CommandListener {
    pub fn new(replies: Arc<dyn StatusChannel>, reporter: StatsReporter, authorized: &[i64]) -> Self {
        Self {
            replies,
            reporter,
            authorized: authorized.iter().copied().collect(),
        }
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized.contains(&user_id)
    }

    /// React to one incoming message. Returns the command that was applied.
    pub async fn handle(&self, message: &Message) -> Result<Option<Command>> {
        let chat_id = message.chat.id;
        let Some(user_id) = message.from.as_ref().map(|u| u.id) else {
            debug!("Ignoring message without sender in chat {}", chat_id);
            return Ok(None);
        };

        if !self.is_authorized(user_id) {
            warn!("Unauthorized access attempt from user id {}", user_id);
            self.replies.send_message(chat_id, UNAUTHORIZED_REPLY).await?;
            return Ok(None);
        }

        let Some(command) = message.text.as_deref().and_then(parse_command) else {
            return Ok(None);
        };

        match command {
            Command::Start => {
                self.reporter.start(chat_id).await;
                self.replies.send_message(chat_id, STARTED_REPLY).await?;
            }
            Command::Stop => {
                self.reporter.stop().await;
                self.replies.send_message(chat_id, STOPPED_REPLY).await?;
            }
            Command::Status => self.reporter.push_status().await,
        }
        Ok(Some(command))
    }

    /// Poll the bot for commands until the task is dropped
    pub async fn run(self, bot: Arc<TelegramBot>) {
        info!("Listening for Telegram commands");
        let mut offset = 0;

        loop {
            let updates = match bot.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Telegram poll failed: {:#}", e);
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                if let Err(e) = self.handle(&message).await {
                    warn!("Failed to handle Telegram command: {:#}", e);
                }
            }
        }
    }
}
