use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use confidant_core::{messaging::types::Reply, pipeline::failure_reply, replies};

use crate::router::AppState;

use super::text::{handle_text, inbound};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Start { referral: Option<String> },
    Ref,
    Buy,
    Help,
    /// Anything else goes through the text pipeline.
    Other,
}

fn parse_command(text: &str) -> Command {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    match cmd.as_str() {
        "start" => Command::Start {
            referral: rest
                .split_whitespace()
                .next()
                .map(|s| s.to_string()),
        },
        "ref" => Command::Ref,
        "buy" => Command::Buy,
        "help" => Command::Help,
        _ => Command::Other,
    }
}

fn referral_link(bot_username: &str, code: &str) -> String {
    format!("https://t.me/{bot_username}?start={code}")
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(inbound) = inbound(&msg) else {
        return Ok(());
    };

    let reply: Reply = match parse_command(&inbound.text) {
        Command::Start { referral } => {
            match state
                .pipeline
                .start(inbound.user_id, &inbound.display_name, referral.as_deref())
                .await
            {
                Ok(welcome) => {
                    info!(
                        user_id = %inbound.user_id,
                        created = welcome.created,
                        "start handled"
                    );
                    welcome.reply
                }
                Err(e) => failure_reply(inbound.user_id, &e),
            }
        }
        Command::Ref => match state.pipeline.referral_code(inbound.user_id).await {
            Ok(code) => replies::referral(
                &referral_link(&state.bot_username, &code),
                state.cfg.referral_bonus,
            ),
            Err(e) => failure_reply(inbound.user_id, &e),
        },
        Command::Buy => replies::buy(&state.cfg),
        Command::Help => replies::help(&state.cfg),
        Command::Other => return handle_text(msg, state).await,
    };

    if let Err(e) = state.messenger.send_reply(inbound.chat_id, &reply).await {
        warn!(user_id = %inbound.user_id, "failed to deliver reply: {e}");
    }
    Ok(())
}
