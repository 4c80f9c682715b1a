use crate::infrastructure::telegram::types::InlineKeyboardMarkup;
use crate::pipeline::bridge::Ack;
use crate::pipeline::job::JobId;
use crate::pipeline::profile::Quality;
use crate::pipeline::tally::JobCounts;
use serde::Serialize;
use utoipa::ToSchema;

/// Body returned to the messaging service for every consumed update.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub accepted: bool,
    pub job_id: Option<String>,
    pub pipeline_ready: Option<bool>,
}

impl WebhookAck {
    pub fn job(ack: &Ack) -> Self {
        Self {
            accepted: true,
            job_id: Some(ack.job_id.to_string()),
            pipeline_ready: Some(ack.pipeline_ready),
        }
    }

    pub fn consumed(accepted: bool) -> Self {
        Self {
            accepted,
            job_id: None,
            pipeline_ready: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub pipeline_ready: bool,
    pub redis: bool,
    pub jobs: JobCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Settings,
    Quality(String),
    /// `None` clears the override.
    Name(Option<String>),
    SetThumb,
    DelThumb,
    Cancel(String),
    Unknown(String),
}

impl BotCommand {
    /// `None` for plain text. Accepts the `/cmd@botname` form.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let arg = (!args.is_empty()).then(|| args.to_string());

        Some(match name.as_str() {
            "start" => BotCommand::Start,
            "help" => BotCommand::Help,
            "settings" => BotCommand::Settings,
            "quality" => BotCommand::Quality(arg.unwrap_or_default()),
            "name" => BotCommand::Name(arg),
            "setthumb" => BotCommand::SetThumb,
            "delthumb" => BotCommand::DelThumb,
            "cancel" => BotCommand::Cancel(arg.unwrap_or_default()),
            _ => BotCommand::Unknown(name),
        })
    }
}

/// Payload carried by inline keyboard buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Quality(Quality),
    ClearThumbnail,
    Cancel(JobId),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (kind, value) = data.split_once(':')?;
        match kind {
            "quality" => value.parse().ok().map(CallbackAction::Quality),
            "thumb" if value == "clear" => Some(CallbackAction::ClearThumbnail),
            "cancel" => JobId::parse(value).map(CallbackAction::Cancel),
            _ => None,
        }
    }

    pub fn data(&self) -> String {
        match self {
            CallbackAction::Quality(q) => format!("quality:{}", q.label()),
            CallbackAction::ClearThumbnail => "thumb:clear".to_string(),
            CallbackAction::Cancel(id) => format!("cancel:{}", id),
        }
    }

    pub fn cancel_keyboard(job_id: &JobId) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::row([(
            "✖ Cancel".to_string(),
            CallbackAction::Cancel(job_id.clone()).data(),
        )])
    }

    pub fn settings_keyboard(current: Quality) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::row(Quality::ALL.iter().map(|q| {
            let text = if *q == current {
                format!("• {}", q)
            } else {
                q.to_string()
            };
            (text, CallbackAction::Quality(*q).data())
        }))
        .push_row([(
            "Remove thumbnail".to_string(),
            CallbackAction::ClearThumbnail.data(),
        )])
    }
}
