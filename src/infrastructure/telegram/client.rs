//! Telegram Bot API client.
//!
//! Every call goes through [`TelegramClient::send_with_retry`], which honours
//! the `parameters.retry_after` hint on HTTP 429 before giving up.

use super::types::{ApiEnvelope, File, InlineKeyboardMarkup, Message};
use crate::pipeline::ports::{Delivery, TransferError};
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Upper bound for a single `retry_after` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Bound on ordinary Bot API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// File downloads and video uploads get longer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// `sendMessage` / `editMessageText` text limit (characters).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Captions are limited separately.
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

enum Payload<'a> {
    Json(&'a serde_json::Value),
    Video(&'a Delivery<'a>),
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TransferError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        if let Some(message_id) = reply_to {
            payload["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        if let Some(markup) = markup {
            payload["reply_markup"] = serde_json::to_value(markup).unwrap_or_default();
        }
        self.send_with_retry("sendMessage", Payload::Json(&payload))
            .await
    }

    /// Replaces the text (and keyboard) of an existing message. Passing `None`
    /// as `markup` removes any keyboard.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransferError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = serde_json::to_value(markup).unwrap_or_default();
        }
        match self
            .send_with_retry::<serde_json::Value>("editMessageText", Payload::Json(&payload))
            .await
        {
            Ok(_) => Ok(()),
            Err(TransferError::Api { description, .. })
                if description.contains("message is not modified") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransferError> {
        let mut payload = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.send_with_retry::<bool>("answerCallbackQuery", Payload::Json(&payload))
            .await
            .map(|_| ())
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<(), TransferError> {
        let payload = json!({
            "url": url,
            "secret_token": secret,
            "allowed_updates": ["message", "callback_query"],
        });
        self.send_with_retry::<bool>("setWebhook", Payload::Json(&payload))
            .await?;
        info!(url, "📡 Webhook registered");
        Ok(())
    }

    /// Resolves `file_id` and streams its content into `dest`.
    pub async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, TransferError> {
        let payload = json!({ "file_id": file_id });
        let file: File = self
            .send_with_retry("getFile", Payload::Json(&payload))
            .await?;
        let file_path = file.file_path.ok_or_else(|| TransferError::Api {
            method: "getFile".to_string(),
            description: format!("no download path for {}", file.file_id),
        })?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Api {
                method: "download".to_string(),
                description: status.to_string(),
            });
        }

        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        debug!(file_id, bytes = written, dest = %dest.display(), "File downloaded");
        Ok(written)
    }

    pub async fn send_video(&self, delivery: &Delivery<'_>) -> Result<Message, TransferError> {
        self.send_with_retry("sendVideo", Payload::Video(delivery))
            .await
    }

    async fn video_form(delivery: &Delivery<'_>) -> Result<Form, TransferError> {
        let file = tokio::fs::File::open(delivery.video).await?;
        let length = file.metadata().await?.len();
        let mime = mime_guess::from_path(delivery.file_name).first_or_octet_stream();
        let video = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(delivery.file_name.to_string())
            .mime_str(mime.essence_str())?;

        let mut form = Form::new()
            .text("chat_id", delivery.chat_id.to_string())
            .text(
                "reply_parameters",
                json!({
                    "message_id": delivery.reply_to,
                    "allow_sending_without_reply": true,
                })
                .to_string(),
            )
            .text(
                "caption",
                truncate_message(&delivery.caption, TELEGRAM_CAPTION_LIMIT),
            )
            .text("supports_streaming", "true")
            .part("video", video);

        let media = delivery.media;
        if media.has_duration() {
            form = form.text("duration", (media.duration_seconds.round() as u64).to_string());
        }
        if media.width > 0 && media.height > 0 {
            form = form
                .text("width", media.width.to_string())
                .text("height", media.height.to_string());
        }
        if let Some(thumbnail) = delivery.thumbnail {
            let bytes = tokio::fs::read(thumbnail).await?;
            form = form.part(
                "thumbnail",
                Part::bytes(bytes)
                    .file_name("thumb.jpg")
                    .mime_str("image/jpeg")?,
            );
        }
        Ok(form)
    }

    /// Send request with rate limit handling.
    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Payload<'_>,
    ) -> Result<T, TransferError> {
        let url = self.method_url(method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let request = match &payload {
                Payload::Json(body) => self.client.post(&url).json(body),
                Payload::Video(delivery) => self
                    .client
                    .post(&url)
                    .timeout(TRANSFER_TIMEOUT)
                    .multipart(Self::video_form(delivery).await?),
            };
            let response = request.send().await?;
            let status = response.status();
            let envelope: ApiEnvelope<T> = response.json().await?;

            if envelope.ok {
                return envelope.result.ok_or_else(|| TransferError::Api {
                    method: method.to_string(),
                    description: "response carried no result".to_string(),
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = envelope
                    .parameters
                    .as_ref()
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs);

                if attempts > MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        method,
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES,
                        retry_after
                    );
                    return Err(TransferError::RateLimited(method.to_string()));
                }

                let wait = retry_after
                    .unwrap_or(Duration::from_secs(1))
                    .min(MAX_RETRY_AFTER);
                debug!(
                    method,
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait,
                    attempts,
                    MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let description = envelope
                .description
                .unwrap_or_else(|| status.to_string());
            return Err(TransferError::Api {
                method: method.to_string(),
                description,
            });
        }
    }
}

/// Truncate a message to fit within the Telegram character limit.
pub fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit.saturating_sub(1)).collect();
    format!("{truncated}…")
}
