use crate::infrastructure::telegram::types::{Message, Update};
use crate::pipeline::job::{AssetRef, IngestRequest, SourceAsset};

const FALLBACK_FILE_NAME: &str = "video.mp4";

/// What the webhook does with an update.
#[derive(Debug)]
pub enum InboundUpdate {
    /// A video to encode, submitted to the pipeline inline.
    Asset(IngestRequest),
    /// Commands and button presses, handled off the request path.
    Interaction(Update),
    Ignored,
}

impl InboundUpdate {
    pub fn classify(update: Update) -> Self {
        if update.callback_query.is_some() {
            return InboundUpdate::Interaction(update);
        }
        let Some(message) = update.message.as_ref() else {
            return InboundUpdate::Ignored;
        };
        if let Some(request) = ingest_request(message) {
            return InboundUpdate::Asset(request);
        }
        if message.text.as_deref().is_some_and(|t| t.starts_with('/')) {
            return InboundUpdate::Interaction(update);
        }
        InboundUpdate::Ignored
    }
}

/// A message qualifies if it carries a video, or a document with a video MIME type.
pub fn ingest_request(message: &Message) -> Option<IngestRequest> {
    let owner = message.sender_id()?;
    let source = if let Some(video) = &message.video {
        SourceAsset {
            file_ref: AssetRef(video.file_id.clone()),
            file_name: video
                .file_name
                .clone()
                .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
            size: video.file_size,
        }
    } else {
        let document = message.document.as_ref()?;
        let is_video = document
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("video/"));
        if !is_video {
            return None;
        }
        SourceAsset {
            file_ref: AssetRef(document.file_id.clone()),
            file_name: document
                .file_name
                .clone()
                .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string()),
            size: document.file_size,
        }
    };

    Some(IngestRequest {
        owner,
        chat_id: message.chat.id,
        message_id: message.message_id,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(message: serde_json::Value) -> Update {
        serde_json::from_value(json!({"update_id": 1, "message": message})).unwrap()
    }

    #[test]
    fn video_messages_become_ingest_requests() {
        let classified = InboundUpdate::classify(update(json!({
            "message_id": 9,
            "from": {"id": 42, "first_name": "A"},
            "chat": {"id": 42},
            "video": {"file_id": "VID", "file_size": 10}
        })));
        match classified {
            InboundUpdate::Asset(request) => {
                assert_eq!(request.owner, 42);
                assert_eq!(request.message_id, 9);
                assert_eq!(request.source.file_ref, AssetRef("VID".into()));
                assert_eq!(request.source.file_name, "video.mp4");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn only_video_documents_qualify() {
        let video_doc = update(json!({
            "message_id": 1,
            "from": {"id": 1},
            "chat": {"id": 1},
            "document": {"file_id": "D", "file_name": "movie.mkv", "mime_type": "video/x-matroska"}
        }));
        assert!(matches!(
            InboundUpdate::classify(video_doc),
            InboundUpdate::Asset(r) if r.source.file_name == "movie.mkv"
        ));

        let pdf = update(json!({
            "message_id": 2,
            "from": {"id": 1},
            "chat": {"id": 1},
            "document": {"file_id": "P", "file_name": "notes.pdf", "mime_type": "application/pdf"}
        }));
        assert!(matches!(InboundUpdate::classify(pdf), InboundUpdate::Ignored));
    }

    #[test]
    fn commands_and_callbacks_are_interactions() {
        let command = update(json!({
            "message_id": 3,
            "from": {"id": 1},
            "chat": {"id": 1},
            "text": "/settings"
        }));
        assert!(matches!(
            InboundUpdate::classify(command),
            InboundUpdate::Interaction(_)
        ));

        let callback: Update = serde_json::from_value(json!({
            "update_id": 2,
            "callback_query": {"id": "cb", "from": {"id": 1}, "data": "thumb:clear"}
        }))
        .unwrap();
        assert!(matches!(
            InboundUpdate::classify(callback),
            InboundUpdate::Interaction(_)
        ));

        let chatter = update(json!({
            "message_id": 4,
            "from": {"id": 1},
            "chat": {"id": 1},
            "text": "hello"
        }));
        assert!(matches!(InboundUpdate::classify(chatter), InboundUpdate::Ignored));
    }

    #[test]
    fn anonymous_posts_are_not_submitted() {
        let channel_post = update(json!({
            "message_id": 5,
            "chat": {"id": -100},
            "video": {"file_id": "V"}
        }));
        assert!(matches!(
            InboundUpdate::classify(channel_post),
            InboundUpdate::Ignored
        ));
    }
}
