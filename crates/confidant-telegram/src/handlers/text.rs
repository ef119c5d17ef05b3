use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use confidant_core::domain::{ChatId, InboundMessage, UserId};

use crate::router::AppState;

pub(super) fn inbound(msg: &Message) -> Option<InboundMessage> {
    let user = msg.from()?;
    Some(InboundMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        display_name: user.first_name.clone(),
        text: msg.text().unwrap_or_default().to_string(),
    })
}

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(inbound) = inbound(&msg) else {
        return Ok(());
    };

    let Some(reply) = state
        .pipeline
        .handle(&inbound, state.messenger.as_ref())
        .await
    else {
        return Ok(());
    };

    if let Err(e) = state.messenger.send_reply(inbound.chat_id, &reply).await {
        warn!(user_id = %inbound.user_id, "failed to deliver reply: {e}");
    }
    Ok(())
}
