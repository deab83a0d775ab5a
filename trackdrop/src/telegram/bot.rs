//! Long-polling bot: routes chat messages to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{TelegramClient, escape_html};
use super::types::Message;
use crate::engine::{Dispatcher, messages};
use crate::{Error, Result};

/// Bot behaviour knobs.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// User allowed to run `/analytics`.
    pub admin_id: Option<i64>,
    pub poll_timeout_secs: u64,
    /// Lifetime of the "send a link" hint.
    pub notice_ttl: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            admin_id: None,
            poll_timeout_secs: 30,
            notice_ttl: Duration::from_secs(10),
        }
    }
}

/// Parsed chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Analytics,
    /// Anything else: a potential media request.
    Request(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let head = trimmed.split_whitespace().next().unwrap_or_default();
        // "/cancel@SomeBot" addresses this bot in group chats
        let name = head.split('@').next().unwrap_or_default();
        match name {
            "/start" | "/help" => Self::Start,
            "/cancel" => Self::Cancel,
            "/analytics" => Self::Analytics,
            _ => Self::Request(trimmed.to_string()),
        }
    }
}

pub struct Bot {
    client: Arc<TelegramClient>,
    dispatcher: Arc<Dispatcher>,
    config: BotConfig,
}

impl Bot {
    pub fn new(client: Arc<TelegramClient>, dispatcher: Arc<Dispatcher>, config: BotConfig) -> Self {
        Self {
            client,
            dispatcher,
            config,
        }
    }

    /// Poll for updates until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!("Bot started polling");
        let mut offset = 0;

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.client.get_updates(offset, self.config.poll_timeout_secs) => res,
            };

            match polled {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(message) = update.message {
                            let bot = self.clone();
                            tokio::spawn(async move { bot.handle_message(message).await });
                        }
                    }
                }
                Err(e) => {
                    warn!("getUpdates failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }

        info!("Bot stopped polling");
        Ok(())
    }

    async fn handle_message(&self, message: Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let chat_id = message.chat.id;

        match Command::parse(text) {
            Command::Start => {
                if let Err(e) = self.client.send_message(chat_id, &escape_html(messages::START)).await {
                    debug!("Could not answer /start: {}", e);
                }
            }
            Command::Cancel => {
                let cancelled = self.dispatcher.cancel_all(chat_id);
                let (reply, ttl) = if cancelled == 0 {
                    (messages::NOTHING_TO_CANCEL, Duration::from_secs(3))
                } else {
                    (messages::CANCELLED_ALL, Duration::from_secs(5))
                };
                self.reply_transient(chat_id, reply, ttl).await;
                self.client
                    .delete_later(chat_id, message.message_id, Duration::ZERO);
            }
            Command::Analytics => {
                let sender = message.from.as_ref().map(|user| user.id);
                if sender.is_some() && sender == self.config.admin_id {
                    match self.dispatcher.usage().await {
                        Ok(stats) => {
                            self.reply_transient(
                                chat_id,
                                &messages::usage(stats.total_uses, stats.distinct_users),
                                Duration::from_secs(5),
                            )
                            .await;
                        }
                        Err(e) => warn!("Could not read usage: {}", e),
                    }
                }
                self.client
                    .delete_later(chat_id, message.message_id, Duration::ZERO);
            }
            Command::Request(text) => match self.dispatcher.submit(chat_id, &text).await {
                Ok(handle) => {
                    debug!(job_id = %handle.job_id, "Request accepted");
                    self.client
                        .delete_later(chat_id, message.message_id, Duration::ZERO);
                }
                Err(Error::Validation(_)) => {
                    self.reply_transient(chat_id, messages::UNRECOGNIZED, self.config.notice_ttl)
                        .await;
                }
                Err(e) => warn!(chat_id, "Could not start request: {}", e),
            },
        }
    }

    async fn reply_transient(&self, chat_id: i64, text: &str, ttl: Duration) {
        match self.client.send_message(chat_id, &escape_html(text)).await {
            Ok(reply) => self.client.delete_later(chat_id, reply.message_id, ttl),
            Err(e) => debug!("Could not send reply: {}", e),
        }
    }
}
