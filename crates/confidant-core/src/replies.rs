//! User-facing texts. Everything here is Telegram HTML unless noted.

use crate::{
    config::Config, domain::Account, formatting::escape_html, messaging::types::Reply,
    quota::QuotaPolicy, referral::ReferralBonus,
};

pub fn service_unavailable() -> Reply {
    Reply::plain("⚠️ Сервис временно недоступен. Попробуйте позже.")
}

pub fn unexpected_error() -> Reply {
    Reply::plain("⚠️ Произошла непредвиденная ошибка. Попробуйте позже.")
}

pub fn start_first() -> Reply {
    Reply::plain("⚠️ Сначала напишите /start")
}

pub fn crisis() -> Reply {
    Reply::html(
        "Я очень ценю, что ты делишься со мной своими переживаниями. \
Твоя безопасность и благополучие очень важны.\n\n\
К сожалению, я не могу обсуждать такие темы — это может быть опасно. \
Пожалуйста, немедленно обратись к специалисту:\n\n\
• <b>8-800-2000-122</b> - Кризисная линия доверия\n\
• <b>112</b> - Экстренная служба\n\
• @qlindrovalobot - Профессиональная помощь\n\n\
Ты не одинок, и есть люди, которые готовы помочь 💙",
    )
}

pub fn limit_reached(allowance: i64, bonus: ReferralBonus) -> Reply {
    Reply::html(format!(
        "❌ <b>Лимит сообщений исчерпан</b> ({allowance} в день)\n\n\
Перейдите на PRO-версию чтобы снять ограничения:\n\
/buy - получить подписку\n\n\
Или пригласи друга по /ref и получи +{} сообщений!",
        bonus.referrer
    ))
}

/// Welcome for `/start`, reflecting the account after referral and expiry handling.
pub fn welcome(
    display_name: &str,
    account: &Account,
    created: bool,
    quota: &QuotaPolicy,
    trial_days: i64,
) -> Reply {
    let mut text = format!(
        "Привет, {}! 👋\n\n\
Я твой AI-психолог. Со мной можно говорить о чем угодно — я всегда выслушаю и поддержу.\n\n",
        escape_html(display_name)
    );

    if created && account.is_pro {
        text.push_str(&format!(
            "🎁 <b>Тебе доступен пробный PRO-период на {}!</b>\nПиши без ограничений!\n\n",
            days_ru(trial_days)
        ));
    } else {
        match quota.remaining(account) {
            None => text.push_str("💎 <b>У тебя PRO-аккаунт! Безлимитное общение!</b>\n\n"),
            Some(left) => text.push_str(&format!(
                "• Бесплатно: {left}/{} сообщений сегодня\n",
                quota.allowance
            )),
        }
    }

    text.push_str(
        "• /ref - пригласить друга и получить бонус\n\
• /buy - оформить подписку PRO\n\
• /help - помощь\n\n\
Просто напиши мне о том, что тебя беспокоит...",
    );
    Reply::html(text)
}

pub fn referral(link: &str, bonus: ReferralBonus) -> Reply {
    Reply::html(format!(
        "🎯 <b>Пригласи друзей и получи бонусы!</b>\n\n\
Твоя реферальная ссылка:\n<code>{}</code>\n\n\
За каждого друга:\n\
• Ты получаешь +{} бесплатных сообщений\n\
• Друг получает +{} сообщения\n\n\
Просто отправь эту ссылку друзьям!",
        escape_html(link),
        bonus.referrer,
        bonus.referee
    ))
}

pub fn help(cfg: &Config) -> Reply {
    Reply::html(format!(
        "🤖 <b>Помощь по боту</b>\n\n\
• Просто напиши мне о том, что беспокоит\n\
• Бесплатно: {} сообщений в день\n\
• PRO: безлимитное общение\n\n\
<b>Команды:</b>\n\
• /start - начать общение\n\
• /ref - пригласить друга (+{} сообщения)\n\
• /buy - оформить PRO\n\
• /help - эта справка\n\n\
<i>⚠️ Это не замена терапии. Если нужна профессиональная помощь — обратись к специалисту.</i>",
        cfg.free_message_limit, cfg.referral_bonus.referee
    ))
}

pub fn buy(cfg: &Config) -> Reply {
    Reply::html(format!(
        "🚀 <b>PRO-подписка</b>\n\n\
• Безлимитные сообщения\n\
• Приоритетная поддержка\n\
• Доступ к новым функциям\n\n\
💵 <b>Стоимость: {}</b>\n\n\
Для оплаты напиши {}\n\
или перейди по ссылке: {}\n\n\
<i>После оплаты доступ активируется в течение 5-15 минут</i>",
        escape_html(&cfg.pro_price),
        escape_html(&cfg.purchase_contact),
        escape_html(&cfg.purchase_url)
    ))
}

fn days_ru(n: i64) -> String {
    let word = match (n % 10, n % 100) {
        (1, r) if r != 11 => "день",
        (2..=4, r) if !(12..=14).contains(&r) => "дня",
        _ => "дней",
    };
    format!("{n} {word}")
}
