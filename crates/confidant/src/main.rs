use std::sync::Arc;

use tracing::info;

use confidant_core::{
    completion::CompletionProxy, config::Config, maintenance, pipeline::Pipeline,
    ports::EntitlementStore, safety::KeywordFilter,
};
use confidant_deepseek::DeepSeekClient;
use confidant_sqlite::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    confidant_core::logging::init("confidant")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        allowance = cfg.free_message_limit,
        trial_days = cfg.trial_days,
        model = %cfg.completion_model,
        "configuration loaded"
    );

    let store = Arc::new(SqliteStore::connect(&cfg.database_url, cfg.db_max_connections).await?);
    let client = Arc::new(DeepSeekClient::from_config(&cfg)?);

    let pipeline = Arc::new(Pipeline::new(
        &cfg,
        store.clone(),
        store.clone(),
        Arc::new(KeywordFilter::default()),
        CompletionProxy::new(client, cfg.completion_timeout),
    ));

    let sweeps = maintenance::spawn(&cfg, store as Arc<dyn EntitlementStore>);

    let result = confidant_telegram::router::run_polling(cfg, pipeline).await;

    for handle in sweeps {
        handle.abort();
    }
    result
}
