use async_trait::async_trait;

use crate::{
    domain::ChatId,
    messaging::types::{ChatAction, Reply},
    Result,
};

/// Outbound side of a messenger.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_reply(&self, chat_id: ChatId, reply: &Reply) -> Result<()>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;
}
