use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{BotCommand, Me},
};
use tracing::{info, warn};

use confidant_core::{config::Config, messaging::port::MessagingPort, pipeline::Pipeline};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub messenger: Arc<dyn MessagingPort>,
    /// Bot username, for referral links.
    pub bot_username: String,
}

/// Command menu shown by Telegram clients.
pub fn menu_commands(cfg: &Config) -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Начать общение"),
        BotCommand::new(
            "ref",
            format!("Пригласить друга (+{})", cfg.referral_bonus.referrer),
        ),
        BotCommand::new("buy", "Купить PRO"),
        BotCommand::new("help", "Помощь"),
    ]
}

pub async fn run_polling(cfg: Arc<Config>, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let me: Me = bot.get_me().await?;
    let bot_username = me.username().to_string();
    info!("bot started: @{bot_username}");

    // Best-effort; the bot works without a menu.
    match bot.set_my_commands(menu_commands(&cfg)).await {
        Ok(_) => info!("command menu registered"),
        Err(e) => warn!("failed to register command menu: {e}"),
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));

    let state = Arc::new(AppState {
        cfg,
        pipeline,
        messenger,
        bot_username,
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
