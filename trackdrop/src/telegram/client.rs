//! Telegram Bot API client.
//!
//! Implements the engine's status and delivery surfaces on top of
//! `sendMessage`/`editMessageText`/`deleteMessage` and `sendAudio`. Handles 429 rate
//! limits by respecting the `parameters.retry_after` field returned in the JSON
//! response body.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::error::TelegramError;
use super::types::{ApiResponse, Message, Update};
use crate::engine::{
    Activity, CachedDelivery, DeliverySurface, OwnerId, StatusContext, StatusError,
    StatusSurface, Upload,
};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

pub struct TelegramClient {
    token: String,
    api_base: String,
    client: Client,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Client against a self-hosted Bot API server.
    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Send a request built by `build`, retrying on rate limits.
    async fn execute<T, F>(&self, method: &str, build: F) -> Result<T, TelegramError>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder, TelegramError>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = build()?.send().await?;
            let status = response.status();
            let body: ApiResponse<T> = response.json().await?;

            if body.ok {
                return body
                    .result
                    .ok_or_else(|| TelegramError::Malformed(format!("{method} returned no result")));
            }

            let code = body.error_code.unwrap_or(i64::from(status.as_u16()));
            if code == 429 {
                let retry_after = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(TelegramError::RateLimited(MAX_RATE_LIMIT_RETRIES));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            return Err(TelegramError::Api {
                code,
                description: body.description.unwrap_or_default(),
            });
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
    ) -> Result<T, TelegramError> {
        let url = self.method_url(method);
        self.execute(method, || Ok(self.client.post(&url).json(payload)))
            .await
    }

    pub async fn send_message(&self, chat_id: i64, html: &str) -> Result<Message, TelegramError> {
        self.call(
            "sendMessage",
            &json!({
                "chat_id": chat_id,
                "text": truncate_message(html, TELEGRAM_MESSAGE_LIMIT),
                "parse_mode": "HTML",
                "link_preview_options": { "is_disabled": true },
            }),
        )
        .await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
    ) -> Result<(), TelegramError> {
        let _: Value = self
            .call(
                "editMessageText",
                &json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": truncate_message(html, TELEGRAM_MESSAGE_LIMIT),
                    "parse_mode": "HTML",
                    "link_preview_options": { "is_disabled": true },
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let _: Value = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), TelegramError> {
        let _: Value = self
            .call(
                "sendChatAction",
                &json!({ "chat_id": chat_id, "action": action }),
            )
            .await?;
        Ok(())
    }

    /// Upload a local audio file.
    pub async fn send_audio_file(
        &self,
        chat_id: i64,
        path: &Path,
        title: &str,
        performer: &str,
        thumbnail: Option<&[u8]>,
    ) -> Result<Message, TelegramError> {
        let audio = tokio::fs::read(path).await?;
        let file_name = format!("{}.mp3", sanitize_file_name(title));
        let url = self.method_url("sendAudio");

        self.execute("sendAudio", || {
            let mut form = Form::new()
                .text("chat_id", chat_id.to_string())
                .text("title", title.to_string())
                .text("performer", performer.to_string())
                .part(
                    "audio",
                    Part::bytes(audio.clone())
                        .file_name(file_name.clone())
                        .mime_str("audio/mpeg")?,
                );
            if let Some(thumbnail) = thumbnail {
                form = form.part(
                    "thumbnail",
                    Part::bytes(thumbnail.to_vec())
                        .file_name("cover.jpg")
                        .mime_str("image/jpeg")?,
                );
            }
            Ok(self.client.post(&url).multipart(form))
        })
        .await
    }

    /// Re-send an already uploaded audio by its file id.
    pub async fn send_audio_by_id(
        &self,
        chat_id: i64,
        file_id: &str,
    ) -> Result<Message, TelegramError> {
        self.call("sendAudio", &json!({ "chat_id": chat_id, "audio": file_id }))
            .await
    }

    /// Long-poll for updates.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Delete a message after `delay`, in the background.
    pub fn delete_later(self: &std::sync::Arc<Self>, chat_id: i64, message_id: i64, delay: Duration) {
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = client.delete_message(chat_id, message_id).await {
                debug!("Could not delete message {}: {}", message_id, e);
            }
        });
    }
}

fn chat_action(activity: Activity) -> &'static str {
    match activity {
        Activity::Preparing => "typing",
        Activity::Downloading => "record_video",
        Activity::Processing => "upload_photo",
        Activity::Uploading => "upload_voice",
    }
}

fn parse_handle(ctx: &StatusContext) -> Result<i64, StatusError> {
    ctx.handle
        .parse()
        .map_err(|_| StatusError::Transport(format!("invalid message handle '{}'", ctx.handle)))
}

fn to_status_error(e: TelegramError) -> StatusError {
    if e.is_gone() {
        StatusError::Gone
    } else {
        StatusError::Transport(e.to_string())
    }
}

#[async_trait]
impl StatusSurface for TelegramClient {
    async fn open(&self, owner_id: OwnerId, text: &str) -> Result<StatusContext, StatusError> {
        let message = self
            .send_message(owner_id, &render_status(text))
            .await
            .map_err(to_status_error)?;
        Ok(StatusContext {
            owner_id,
            handle: message.message_id.to_string(),
        })
    }

    async fn emit_status(
        &self,
        ctx: &StatusContext,
        text: &str,
        activity: Activity,
    ) -> Result<(), StatusError> {
        let message_id = parse_handle(ctx)?;
        if let Err(e) = self.send_chat_action(ctx.owner_id, chat_action(activity)).await {
            debug!("sendChatAction failed: {}", e);
        }
        match self
            .edit_message_text(ctx.owner_id, message_id, &render_status(text))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_modified() => Ok(()),
            Err(e) => Err(to_status_error(e)),
        }
    }

    async fn close(&self, ctx: &StatusContext) -> Result<(), StatusError> {
        let message_id = parse_handle(ctx)?;
        self.delete_message(ctx.owner_id, message_id)
            .await
            .map_err(to_status_error)
    }

    async fn notify(&self, owner_id: OwnerId, text: &str) -> Result<StatusContext, StatusError> {
        let message = self
            .send_message(owner_id, &escape_html(text))
            .await
            .map_err(to_status_error)?;
        Ok(StatusContext {
            owner_id,
            handle: message.message_id.to_string(),
        })
    }
}

#[async_trait]
impl DeliverySurface for TelegramClient {
    async fn deliver(&self, owner_id: OwnerId, upload: Upload<'_>) -> crate::Result<String> {
        let message = self
            .send_audio_file(
                owner_id,
                upload.path,
                upload.title,
                upload.attribution,
                upload.cover,
            )
            .await?;
        message
            .audio
            .map(|audio| audio.file_id)
            .ok_or_else(|| TelegramError::Malformed("sendAudio returned no audio".into()).into())
    }

    async fn deliver_cached(
        &self,
        owner_id: OwnerId,
        delivery_ref: &str,
    ) -> crate::Result<CachedDelivery> {
        match self.send_audio_by_id(owner_id, delivery_ref).await {
            Ok(_) => Ok(CachedDelivery::Delivered),
            Err(e) if e.is_rejection() => {
                debug!("Cached file id rejected: {}", e);
                Ok(CachedDelivery::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Escape text for `parse_mode=HTML`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Status layout: the first line (the request) is quoted, the rest follows.
pub fn render_status(text: &str) -> String {
    match text.split_once('\n') {
        Some((first, rest)) => format!(
            "<blockquote>{}</blockquote>\n{}",
            escape_html(first),
            escape_html(rest)
        ),
        None => escape_html(text),
    }
}

fn sanitize_file_name(title: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(100)
        .collect();
    let name = name.trim();
    if name.is_empty() {
        "audio".to_string()
    } else {
        name.to_string()
    }
}

/// Truncate a message to fit within the Telegram character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
