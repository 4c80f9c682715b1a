use super::dto::{BotCommand, CallbackAction};
use crate::infrastructure::telegram::types::{CallbackQuery, InlineKeyboardMarkup, Message, Update};
use crate::modules::settings::repository::SettingsError;
use crate::pipeline::bridge::IngestError;
use crate::pipeline::job::JobId;
use crate::pipeline::profile::Quality;
use crate::state::AppState;
use anyhow::Result;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

const USAGE: &str = "🎬 Video Encoder\n\n\
Send a video (or a video file) and it will be re-encoded to H.264/AAC MP4 \
at your chosen quality and sent back.\n\n\
Commands:\n\
/settings - show current settings\n\
/quality <720p|480p|360p> - set output quality\n\
/name <text> - name output files <text>_<quality>.mp4 (/name alone clears it)\n\
/setthumb - reply to a photo to use it as thumbnail\n\
/delthumb - remove the thumbnail\n\
/cancel <job id> - stop a running job";

const ACCESS_DENIED: &str = "⛔ Access denied. You are not authorized to use this bot.";

pub struct BotService;

impl BotService {
    /// Handles a command or button press. Errors are logged, never surfaced
    /// to the webhook.
    pub async fn handle(state: AppState, update: Update) {
        let update_id = update.update_id;
        let result = if let Some(query) = update.callback_query {
            Self::on_callback(&state, query).await
        } else if let Some(message) = update.message {
            Self::on_message(&state, message).await
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!(update_id, "Failed to handle update: {:#}", e);
        }
    }

    pub async fn reply(state: &AppState, chat_id: i64, reply_to: i64, text: &str) {
        if let Err(e) = state
            .telegram
            .send_message(chat_id, text, Some(reply_to), None)
            .await
        {
            warn!(chat_id, "Failed to send reply: {}", e);
        }
    }

    pub async fn deny(state: &AppState, chat_id: i64, reply_to: i64) {
        Self::reply(state, chat_id, reply_to, ACCESS_DENIED).await;
    }

    pub async fn notify_startup(state: &AppState) {
        let started = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
            ))
            .unwrap_or_default();
        let text = format!(
            "🚀 Bot started\n\nTime: {}\nDefault quality: {}\n\nSend a video to begin.",
            started,
            Quality::default()
        );
        for user in &state.config.authorized_users {
            match state.telegram.send_message(*user, &text, None, None).await {
                Ok(_) => debug!(user, "Startup notification sent"),
                Err(e) => warn!(user, "Could not send startup notification: {}", e),
            }
        }
    }

    async fn on_message(state: &AppState, message: Message) -> Result<()> {
        let Some(user) = message.sender_id() else {
            return Ok(());
        };
        let chat_id = message.chat.id;
        if state.bridge.authorize(user).is_err() {
            Self::deny(state, chat_id, message.message_id).await;
            return Ok(());
        }
        let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
            return Ok(());
        };
        info!(user, ?command, "Command received");

        let reply = match command {
            BotCommand::Start | BotCommand::Help => USAGE.to_string(),
            BotCommand::Settings => {
                let (text, keyboard) = Self::settings_view(state, user).await?;
                state
                    .telegram
                    .send_message(chat_id, &text, Some(message.message_id), Some(&keyboard))
                    .await?;
                return Ok(());
            }
            BotCommand::Quality(arg) => match arg.parse::<Quality>() {
                Ok(quality) => {
                    state.settings.set_quality(user, quality).await?;
                    format!("✅ Quality set to {}", quality)
                }
                Err(_) => "Usage: /quality <720p|480p|360p>".to_string(),
            },
            BotCommand::Name(name) => {
                let cleared = name.is_none();
                match state.settings.set_custom_name(user, name).await {
                    Ok(()) if cleared => "✅ Custom name cleared.".to_string(),
                    Ok(()) => {
                        let view = state.settings.get(user).await?;
                        format!(
                            "✅ Output files will be named {}_<quality>.mp4",
                            view.custom_name.unwrap_or_default()
                        )
                    }
                    Err(SettingsError::Invalid(reason)) => format!("❌ {}", reason),
                    Err(e) => return Err(e.into()),
                }
            }
            BotCommand::SetThumb => {
                let photo = message
                    .reply_to_message
                    .as_deref()
                    .and_then(Message::largest_photo);
                match photo {
                    Some(photo) => {
                        state
                            .settings
                            .set_thumbnail(user, Some(photo.file_id.clone()))
                            .await?;
                        "✅ Thumbnail saved.".to_string()
                    }
                    None => "Reply to a photo with /setthumb to use it as thumbnail.".to_string(),
                }
            }
            BotCommand::DelThumb => {
                state.settings.set_thumbnail(user, None).await?;
                "✅ Thumbnail removed.".to_string()
            }
            BotCommand::Cancel(arg) => match JobId::parse(&arg) {
                Some(job_id) => Self::request_cancel(state, job_id, user),
                None => "Usage: /cancel <job id>".to_string(),
            },
            BotCommand::Unknown(_) => "Unknown command. Send /help for usage.".to_string(),
        };

        state
            .telegram
            .send_message(chat_id, &reply, Some(message.message_id), None)
            .await?;
        Ok(())
    }

    async fn on_callback(state: &AppState, query: CallbackQuery) -> Result<()> {
        let user = query.from.id;
        if state.bridge.authorize(user).is_err() {
            state
                .telegram
                .answer_callback_query(&query.id, Some(ACCESS_DENIED))
                .await?;
            return Ok(());
        }

        let action = query.data.as_deref().and_then(CallbackAction::parse);
        debug!(user, ?action, "Callback received");

        let notice = match action {
            Some(CallbackAction::Quality(quality)) => {
                state.settings.set_quality(user, quality).await?;
                Self::refresh_settings(state, &query, user).await?;
                format!("Quality set to {}", quality)
            }
            Some(CallbackAction::ClearThumbnail) => {
                state.settings.set_thumbnail(user, None).await?;
                Self::refresh_settings(state, &query, user).await?;
                "Thumbnail removed".to_string()
            }
            Some(CallbackAction::Cancel(job_id)) => Self::request_cancel(state, job_id, user),
            None => "Unknown action".to_string(),
        };

        state
            .telegram
            .answer_callback_query(&query.id, Some(&notice))
            .await?;
        Ok(())
    }

    /// The worker checks ownership; here we only hand the request over.
    fn request_cancel(state: &AppState, job_id: JobId, user: i64) -> String {
        match state.bridge.cancel(job_id.clone(), user) {
            Ok(()) => format!("Cancelling {}…", job_id),
            Err(IngestError::Backpressure) => "Busy right now, try again in a moment.".to_string(),
            Err(e) => e.to_string(),
        }
    }

    async fn settings_view(state: &AppState, user: i64) -> Result<(String, InlineKeyboardMarkup)> {
        let view = state.settings.get(user).await?;
        let keyboard = CallbackAction::settings_keyboard(view.quality);
        Ok((view.render(), keyboard))
    }

    async fn refresh_settings(state: &AppState, query: &CallbackQuery, user: i64) -> Result<()> {
        let Some(message) = query.message.as_ref() else {
            return Ok(());
        };
        let (text, keyboard) = Self::settings_view(state, user).await?;
        state
            .telegram
            .edit_message_text(message.chat.id, message.message_id, &text, Some(&keyboard))
            .await?;
        Ok(())
    }
}
