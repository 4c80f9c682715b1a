//! The Bot API client seen through the pipeline's collaborator traits.

use super::client::TelegramClient;
use crate::modules::bot::dto::CallbackAction;
use crate::pipeline::job::{AssetRef, JobId};
use crate::pipeline::ports::{
    AssetTransfer, Delivery, StatusRef, StatusSink, StatusTarget, TransferError,
};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
impl AssetTransfer for TelegramClient {
    async fn fetch(&self, asset: &AssetRef, dest: &Path) -> Result<u64, TransferError> {
        self.download_file(&asset.0, dest).await
    }

    async fn deliver(&self, delivery: Delivery<'_>) -> Result<(), TransferError> {
        self.send_video(&delivery).await.map(|_| ())
    }
}

#[async_trait]
impl StatusSink for TelegramClient {
    async fn post(
        &self,
        target: StatusTarget,
        text: &str,
        cancel: Option<&JobId>,
    ) -> Result<StatusRef, TransferError> {
        let markup = cancel.map(CallbackAction::cancel_keyboard);
        let message = self
            .send_message(target.chat_id, text, Some(target.reply_to), markup.as_ref())
            .await?;
        Ok(StatusRef {
            chat_id: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn edit(
        &self,
        status: StatusRef,
        text: &str,
        cancel: Option<&JobId>,
    ) -> Result<(), TransferError> {
        let markup = cancel.map(CallbackAction::cancel_keyboard);
        self.edit_message_text(status.chat_id, status.message_id, text, markup.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn status_messages_carry_the_cancel_button_until_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": 42,
                "reply_markup": {"inline_keyboard": [[{"callback_data": "cancel:42-5"}]]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 100, "chat": {"id": 42}}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botT/editMessageText"))
            .and(body_partial_json(json!({"message_id": 100, "text": "Cancelled."})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"message_id": 100, "chat": {"id": 42}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TelegramClient::new(&server.uri(), "T").unwrap();
        let job_id = JobId::from_message(42, 5);
        let status = client
            .post(
                StatusTarget {
                    chat_id: 42,
                    reply_to: 5,
                },
                "Downloading…",
                Some(&job_id),
            )
            .await
            .unwrap();
        assert_eq!(status.message_id, 100);

        client.edit(status, "Cancelled.", None).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let edit: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert!(edit.get("reply_markup").is_none());
    }
}
