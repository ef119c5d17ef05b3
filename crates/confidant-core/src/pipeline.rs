//! Per-message decision pipeline.
//!
//! `Created → AccountResolved → (SafetyBlocked | QuotaExceeded | Eligible) → Completed`
//!
//! Every message re-reads entitlement state from the store; nothing is cached
//! between messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    completion::CompletionProxy,
    config::Config,
    domain::{Account, InboundMessage, Turn, UserId, BLOCKED_TURN_MARKER},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Reply},
    },
    ports::{ConversationLog, EntitlementStore},
    quota::QuotaPolicy,
    referral::{ReferralBonus, ReferralCode, ReferralOutcome},
    replies,
    safety::SafetyClassifier,
    Result,
};

/// Terminal state of one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    SafetyBlocked(Reply),
    QuotaExceeded(Reply),
    Completed { reply: Reply, fallback: bool },
}

impl Outcome {
    pub fn reply(&self) -> &Reply {
        match self {
            Outcome::SafetyBlocked(r) | Outcome::QuotaExceeded(r) => r,
            Outcome::Completed { reply, .. } => reply,
        }
    }
}

/// What `/start` produced.
#[derive(Clone, Debug)]
pub struct Welcome {
    pub account: Account,
    pub created: bool,
    pub referral: Option<ReferralOutcome>,
    pub reply: Reply,
}

/// Clock seam so tests can pin "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct Pipeline {
    store: Arc<dyn EntitlementStore>,
    log: Arc<dyn ConversationLog>,
    safety: Arc<dyn SafetyClassifier>,
    completion: CompletionProxy,
    quota: QuotaPolicy,
    trial: chrono::Duration,
    trial_days: i64,
    bonus: ReferralBonus,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn EntitlementStore>,
        log: Arc<dyn ConversationLog>,
        safety: Arc<dyn SafetyClassifier>,
        completion: CompletionProxy,
    ) -> Self {
        Self {
            store,
            log,
            safety,
            completion,
            quota: QuotaPolicy::new(cfg.free_message_limit),
            trial: cfg.trial_duration(),
            trial_days: cfg.trial_days,
            bonus: cfg.referral_bonus,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the pipeline and turn every failure into a user-facing reply.
    ///
    /// `None` means the message is silently dropped.
    pub async fn handle(
        &self,
        msg: &InboundMessage,
        messenger: &dyn MessagingPort,
    ) -> Option<Reply> {
        match self.process(msg, messenger).await {
            Ok(outcome) => Some(outcome.reply().clone()),
            Err(Error::MalformedInput(reason)) => {
                debug!(user_id = %msg.user_id, "dropping message: {reason}");
                None
            }
            Err(e) => Some(failure_reply(msg.user_id, &e)),
        }
    }

    /// Run the pipeline for one text message.
    pub async fn process(
        &self,
        msg: &InboundMessage,
        messenger: &dyn MessagingPort,
    ) -> Result<Outcome> {
        let text = msg.text.trim();
        if text.is_empty() {
            return Err(Error::MalformedInput("empty text".to_string()));
        }

        // Created → AccountResolved
        let now = self.clock.now();
        let resolved = self.store.resolve(msg.user_id, now, self.trial).await?;
        if resolved.created {
            info!(user_id = %msg.user_id, "account created on first message");
        }
        let mut account = resolved.account;
        if self.store.correct_expiry(&mut account, now).await? {
            info!(user_id = %msg.user_id, "elevated access expired");
        }

        // → SafetyBlocked
        if self.safety.classify(text).flagged {
            warn!(user_id = %msg.user_id, "crisis phrase intercepted");
            self.record(Turn {
                user_id: msg.user_id,
                inbound: msg.text.clone(),
                outbound: BLOCKED_TURN_MARKER.to_string(),
            })
            .await;
            return Ok(Outcome::SafetyBlocked(replies::crisis()));
        }

        // → QuotaExceeded (turn intentionally not logged)
        if !self.quota.allow(&account) {
            info!(
                user_id = %msg.user_id,
                usage = account.usage_count,
                allowance = self.quota.allowance,
                "free allowance exhausted"
            );
            return Ok(Outcome::QuotaExceeded(replies::limit_reached(
                self.quota.allowance,
                self.bonus,
            )));
        }

        // → Eligible → Completed
        if !account.is_pro {
            self.store.increment_usage(msg.user_id).await?;
            info!(
                user_id = %msg.user_id,
                usage = account.usage_count + 1,
                allowance = self.quota.allowance,
                "free message counted"
            );
        }

        if let Err(e) = messenger
            .send_chat_action(msg.chat_id, ChatAction::Typing)
            .await
        {
            debug!(user_id = %msg.user_id, "typing indicator failed: {e}");
        }

        let completion = self.completion.complete(text).await;
        self.record(Turn {
            user_id: msg.user_id,
            inbound: msg.text.clone(),
            outbound: completion.text.clone(),
        })
        .await;

        Ok(Outcome::Completed {
            reply: Reply::plain(completion.text),
            fallback: completion.fallback,
        })
    }

    /// `/start [code]`: resolve, credit a referral, correct expiry, render welcome.
    pub async fn start(
        &self,
        user_id: UserId,
        display_name: &str,
        referral_code: Option<&str>,
    ) -> Result<Welcome> {
        let now = self.clock.now();
        let resolved = self.store.resolve(user_id, now, self.trial).await?;
        if resolved.created {
            info!(%user_id, "new account with trial");
        }

        let referral = match referral_code.map(str::trim).filter(|c| !c.is_empty()) {
            None => None,
            Some(raw) => Some(match ReferralCode::parse(raw) {
                Some(code) => self.store.apply_referral(user_id, &code, self.bonus).await?,
                None => ReferralOutcome::Malformed,
            }),
        };
        if let Some(outcome) = referral {
            info!(%user_id, ?outcome, "referral processed");
        }

        // Re-read so the welcome reflects referral credit.
        let mut account = match referral {
            Some(ReferralOutcome::Credited { .. }) => self
                .store
                .find(user_id)
                .await?
                .unwrap_or(resolved.account),
            _ => resolved.account,
        };
        self.store.correct_expiry(&mut account, now).await?;

        let reply = replies::welcome(
            display_name,
            &account,
            resolved.created,
            &self.quota,
            self.trial_days,
        );
        Ok(Welcome {
            account,
            created: resolved.created,
            referral,
            reply,
        })
    }

    /// `/ref`: the user's own code. Fails with `UnknownUser` before `/start`.
    pub async fn referral_code(&self, user_id: UserId) -> Result<String> {
        self.store
            .find(user_id)
            .await?
            .map(|a| a.referral_code)
            .ok_or(Error::UnknownUser(user_id))
    }

    async fn record(&self, turn: Turn) {
        // Best-effort: the reply is already decided.
        if let Err(e) = self.log.record(&turn).await {
            error!(user_id = %turn.user_id, "failed to log turn: {e}");
        }
    }
}

/// Map a pipeline failure to what the user sees.
pub fn failure_reply(user_id: UserId, err: &Error) -> Reply {
    match err {
        Error::StoreUnavailable(_) => {
            error!(%user_id, "store unavailable: {err}");
            replies::service_unavailable()
        }
        Error::UnknownUser(_) => replies::start_first(),
        _ => {
            error!(%user_id, "unexpected failure: {err}");
            replies::unexpected_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        completion::FALLBACK_REPLY,
        domain::{ChatId, Resolved},
        ports::CompletionClient,
        safety::KeywordFilter,
    };
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeStore {
        accounts: Mutex<HashMap<i64, Account>>,
        down: AtomicBool,
        clears: AtomicUsize,
    }

    impl FakeStore {
        fn insert(&self, account: Account) {
            self.accounts
                .lock()
                .unwrap()
                .insert(account.user_id.0, account);
        }

        fn get(&self, id: i64) -> Option<Account> {
            self.accounts.lock().unwrap().get(&id).cloned()
        }

        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::StoreUnavailable("connection refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EntitlementStore for FakeStore {
        async fn resolve(
            &self,
            user_id: UserId,
            now: DateTime<Utc>,
            trial: ChronoDuration,
        ) -> Result<Resolved> {
            self.check()?;
            let mut map = self.accounts.lock().unwrap();
            if let Some(a) = map.get(&user_id.0) {
                return Ok(Resolved {
                    account: a.clone(),
                    created: false,
                });
            }
            let account = Account {
                user_id,
                is_pro: true,
                usage_count: 0,
                pro_until: Some(now + trial),
                referral_code: ReferralCode::mint(user_id).to_string(),
            };
            map.insert(user_id.0, account.clone());
            Ok(Resolved {
                account,
                created: true,
            })
        }

        async fn find(&self, user_id: UserId) -> Result<Option<Account>> {
            self.check()?;
            Ok(self.get(user_id.0))
        }

        async fn apply_referral(
            &self,
            new_user: UserId,
            code: &ReferralCode,
            bonus: ReferralBonus,
        ) -> Result<ReferralOutcome> {
            self.check()?;
            let mut map = self.accounts.lock().unwrap();
            let Some(referrer) = map
                .values()
                .find(|a| a.referral_code == code.as_str())
                .map(|a| a.user_id)
            else {
                return Ok(ReferralOutcome::UnknownCode);
            };
            if referrer == new_user {
                return Ok(ReferralOutcome::SelfReferral);
            }
            if let Some(a) = map.get_mut(&referrer.0) {
                a.usage_count -= bonus.referrer;
            }
            if let Some(a) = map.get_mut(&new_user.0) {
                a.usage_count -= bonus.referee;
            }
            Ok(ReferralOutcome::Credited { referrer })
        }

        async fn clear_elevated(&self, user_id: UserId) -> Result<()> {
            self.check()?;
            self.clears.fetch_add(1, Ordering::SeqCst);
            if let Some(a) = self.accounts.lock().unwrap().get_mut(&user_id.0) {
                a.is_pro = false;
            }
            Ok(())
        }

        async fn increment_usage(&self, user_id: UserId) -> Result<()> {
            self.check()?;
            if let Some(a) = self.accounts.lock().unwrap().get_mut(&user_id.0) {
                a.usage_count += 1;
            }
            Ok(())
        }

        async fn expire_elevated(&self, now: DateTime<Utc>) -> Result<u64> {
            self.check()?;
            let mut n = 0;
            for a in self.accounts.lock().unwrap().values_mut() {
                if a.pro_expired(now) {
                    a.is_pro = false;
                    n += 1;
                }
            }
            Ok(n)
        }

        async fn reset_usage(&self) -> Result<u64> {
            self.check()?;
            let mut n = 0;
            for a in self.accounts.lock().unwrap().values_mut() {
                a.usage_count = a.usage_count.min(0);
                n += 1;
            }
            Ok(n)
        }
    }

    #[derive(Default)]
    struct FakeLog {
        turns: Mutex<Vec<Turn>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ConversationLog for FakeLog {
        async fn record(&self, turn: &Turn) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.turns.lock().unwrap().push(turn.clone());
            Ok(())
        }
    }

    struct FakeModel {
        calls: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl CompletionClient for FakeModel {
        async fn complete(&self, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(format!("echo: {text}"))
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        actions: AtomicUsize,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_reply(&self, _chat_id: ChatId, _reply: &Reply) -> Result<()> {
            Ok(())
        }

        async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
            self.actions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        pipeline: Pipeline,
        store: Arc<FakeStore>,
        log: Arc<FakeLog>,
        model: Arc<FakeModel>,
        messenger: FakeMessenger,
    }

    fn harness_with(hang: bool) -> Harness {
        let cfg = Config::from_lookup(|k| match k {
            "BOT_TOKEN" => Some("t".to_string()),
            "DEEPSEEK_API_KEY" => Some("k".to_string()),
            _ => None,
        })
        .unwrap();
        let store = Arc::new(FakeStore::default());
        let log = Arc::new(FakeLog::default());
        let model = Arc::new(FakeModel {
            calls: AtomicUsize::new(0),
            hang,
        });
        let proxy = CompletionProxy::new(model.clone(), Duration::from_millis(50));
        let pipeline = Pipeline::new(
            &cfg,
            store.clone(),
            log.clone(),
            Arc::new(KeywordFilter::default()),
            proxy,
        )
        .with_clock(Arc::new(FixedClock(t0())));
        Harness {
            pipeline,
            store,
            log,
            model,
            messenger: FakeMessenger::default(),
        }
    }

    fn harness() -> Harness {
        harness_with(false)
    }

    fn free_account(id: i64, usage_count: i64) -> Account {
        Account {
            user_id: UserId(id),
            is_pro: false,
            usage_count,
            pro_until: None,
            referral_code: format!("REF{id}100"),
        }
    }

    fn msg(id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: ChatId(id),
            user_id: UserId(id),
            display_name: "Ann".to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn free_user_below_allowance_gets_completion() {
        let h = harness();
        h.store.insert(free_account(1, 9));

        let out = h.pipeline.process(&msg(1, "hello"), &h.messenger).await.unwrap();

        assert_eq!(
            out,
            Outcome::Completed {
                reply: Reply::plain("echo: hello"),
                fallback: false
            }
        );
        assert_eq!(h.store.get(1).unwrap().usage_count, 10);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.messenger.actions.load(Ordering::SeqCst), 1);
        let turns = h.log.turns.lock().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].outbound, "echo: hello");
    }

    #[tokio::test]
    async fn free_user_at_allowance_is_denied() {
        let h = harness();
        h.store.insert(free_account(1, 10));

        let out = h.pipeline.process(&msg(1, "hello"), &h.messenger).await.unwrap();

        assert!(matches!(out, Outcome::QuotaExceeded(_)));
        assert_eq!(h.store.get(1).unwrap().usage_count, 10);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
        assert!(h.log.turns.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_pro_is_corrected_before_quota_check() {
        let h = harness();
        h.store.insert(Account {
            is_pro: true,
            pro_until: Some(t0() - ChronoDuration::days(1)),
            ..free_account(1, 10)
        });

        let out = h.pipeline.process(&msg(1, "hello"), &h.messenger).await.unwrap();

        assert!(matches!(out, Outcome::QuotaExceeded(_)));
        let stored = h.store.get(1).unwrap();
        assert!(!stored.is_pro);
        assert_eq!(h.store.clears.load(Ordering::SeqCst), 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_pro_is_not_counted() {
        let h = harness();
        h.store.insert(Account {
            is_pro: true,
            pro_until: Some(t0() + ChronoDuration::hours(1)),
            ..free_account(1, 50)
        });

        let out = h.pipeline.process(&msg(1, "hello"), &h.messenger).await.unwrap();

        assert!(matches!(out, Outcome::Completed { .. }));
        assert_eq!(h.store.get(1).unwrap().usage_count, 50);
        assert_eq!(h.store.clears.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn crisis_text_short_circuits_regardless_of_quota() {
        for usage in [0, 10, 99] {
            let h = harness();
            h.store.insert(free_account(1, usage));

            let out = h
                .pipeline
                .process(&msg(1, "Я больше НЕ ХОЧУ ЖИТЬ"), &h.messenger)
                .await
                .unwrap();

            assert_eq!(out, Outcome::SafetyBlocked(replies::crisis()));
            assert_eq!(h.store.get(1).unwrap().usage_count, usage);
            assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
            let turns = h.log.turns.lock().unwrap();
            assert_eq!(turns.len(), 1);
            assert_eq!(turns[0].outbound, BLOCKED_TURN_MARKER);
        }
    }

    #[tokio::test]
    async fn timeout_yields_fallback_logged_and_counted() {
        let h = harness_with(true);
        h.store.insert(free_account(1, 3));

        let out = h.pipeline.process(&msg(1, "hello"), &h.messenger).await.unwrap();

        assert_eq!(
            out,
            Outcome::Completed {
                reply: Reply::plain(FALLBACK_REPLY),
                fallback: true
            }
        );
        assert_eq!(h.store.get(1).unwrap().usage_count, 4);
        assert_eq!(h.log.turns.lock().unwrap()[0].outbound, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn empty_text_is_dropped() {
        let h = harness();
        let err = h
            .pipeline
            .process(&msg(1, "   "), &h.messenger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(h.store.get(1).is_none());
        assert!(h.pipeline.handle(&msg(1, ""), &h.messenger).await.is_none());
    }

    #[tokio::test]
    async fn store_outage_yields_service_unavailable_and_nothing_else() {
        let h = harness();
        h.store.down.store(true, Ordering::SeqCst);

        let reply = h.pipeline.handle(&msg(1, "hello"), &h.messenger).await;

        assert_eq!(reply, Some(replies::service_unavailable()));
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
        assert!(h.log.turns.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_failure_does_not_block_reply() {
        let h = harness();
        h.store.insert(free_account(1, 0));
        h.log.fail.store(true, Ordering::SeqCst);

        let reply = h.pipeline.handle(&msg(1, "hello"), &h.messenger).await;

        assert_eq!(reply, Some(Reply::plain("echo: hello")));
    }

    #[tokio::test]
    async fn first_message_creates_trial_account() {
        let h = harness();
        let out = h.pipeline.process(&msg(5, "hi"), &h.messenger).await.unwrap();
        assert!(matches!(out, Outcome::Completed { .. }));
        let a = h.store.get(5).unwrap();
        assert!(a.is_pro);
        assert_eq!(a.usage_count, 0);
    }

    #[tokio::test]
    async fn start_creates_account_with_one_day_trial() {
        let h = harness();
        let w = h.pipeline.start(UserId(1), "Ann", None).await.unwrap();
        assert!(w.created);
        assert!(w.account.is_pro);
        assert_eq!(w.account.usage_count, 0);
        assert_eq!(w.account.pro_until, Some(t0() + ChronoDuration::days(1)));
        assert!(w.referral.is_none());
        assert!(w.reply.text.contains("пробный PRO-период"));
    }

    #[tokio::test]
    async fn start_with_referral_credits_both_sides() {
        let h = harness();
        h.store.insert(free_account(1, 8));

        let w = h.pipeline.start(UserId(2), "Bob", Some("REF1100")).await.unwrap();

        assert_eq!(
            w.referral,
            Some(ReferralOutcome::Credited {
                referrer: UserId(1)
            })
        );
        assert_eq!(h.store.get(1).unwrap().usage_count, 3);
        assert_eq!(h.store.get(2).unwrap().usage_count, -3);
        assert_eq!(w.account.usage_count, -3);
    }

    #[tokio::test]
    async fn self_referral_changes_nothing() {
        let h = harness();
        h.store.insert(free_account(1, 4));

        let w = h.pipeline.start(UserId(1), "Ann", Some("REF1100")).await.unwrap();

        assert_eq!(w.referral, Some(ReferralOutcome::SelfReferral));
        assert_eq!(h.store.get(1).unwrap().usage_count, 4);
        assert!(w.reply.text.contains("6/10"));
    }

    #[tokio::test]
    async fn malformed_and_unknown_codes_are_noops() {
        let h = harness();
        h.store.insert(free_account(1, 4));

        let w = h.pipeline.start(UserId(1), "Ann", Some("hello")).await.unwrap();
        assert_eq!(w.referral, Some(ReferralOutcome::Malformed));

        let w = h.pipeline.start(UserId(1), "Ann", Some("REF9999999")).await.unwrap();
        assert_eq!(w.referral, Some(ReferralOutcome::UnknownCode));
        assert_eq!(h.store.get(1).unwrap().usage_count, 4);
    }

    #[tokio::test]
    async fn start_corrects_expired_trial() {
        let h = harness();
        h.store.insert(Account {
            is_pro: true,
            pro_until: Some(t0() - ChronoDuration::minutes(1)),
            ..free_account(1, 2)
        });

        let w = h.pipeline.start(UserId(1), "Ann", None).await.unwrap();

        assert!(!w.account.is_pro);
        assert!(!h.store.get(1).unwrap().is_pro);
        assert!(w.reply.text.contains("8/10"));
    }

    #[tokio::test]
    async fn referral_code_requires_account() {
        let h = harness();
        let err = h.pipeline.referral_code(UserId(3)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownUser(UserId(3))));
        assert_eq!(failure_reply(UserId(3), &err), replies::start_first());

        h.store.insert(free_account(3, 0));
        assert_eq!(h.pipeline.referral_code(UserId(3)).await.unwrap(), "REF3100");
    }
}
