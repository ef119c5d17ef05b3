//! Telegram update handlers.
//!
//! Each handler converts a teloxide `Message` into a core call and sends the
//! resulting reply through the messaging port. Failures never escape a handler.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AppState;

mod commands;
mod text;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        // Non-text updates carry nothing for the pipeline.
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(msg, state).await;
    }

    text::handle_text(msg, state).await
}
