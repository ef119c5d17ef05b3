//! Telegram adapter (teloxide).
//!
//! This crate implements the `confidant-core` MessagingPort over the Telegram
//! Bot API and routes updates into the pipeline.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use confidant_core::{
    domain::ChatId,
    errors::Error,
    formatting::split_plain_chunks,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Reply, ReplyFormat},
    },
    Result,
};

const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_reply(&self, chat_id: ChatId, reply: &Reply) -> Result<()> {
        match reply.format {
            // Our HTML templates are well under the limit.
            ReplyFormat::Html => {
                self.with_retry(|| {
                    self.bot
                        .send_message(Self::tg_chat(chat_id), reply.text.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await?;
            }
            // Model output can be long; split on the plain-text path.
            ReplyFormat::Plain => {
                for chunk in split_plain_chunks(&reply.text, TELEGRAM_MESSAGE_LIMIT) {
                    self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), chunk.clone()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }
}
