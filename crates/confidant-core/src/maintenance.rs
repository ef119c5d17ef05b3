//! Periodic sweeps: elevated-access expiry and allowance reset.
//!
//! Both are optional. The per-message expiry correction in the pipeline stays
//! in place regardless.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{config::Config, ports::EntitlementStore};

#[derive(Clone, Copy, Debug)]
enum Sweep {
    Expiry,
    UsageReset,
}

/// Spawn the sweeps enabled in `cfg`. Returns one handle per running task.
pub fn spawn(cfg: &Config, store: Arc<dyn EntitlementStore>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if let Some(every) = cfg.expiry_sweep_interval {
        handles.push(spawn_sweep(Sweep::Expiry, every, store.clone()));
    }
    if let Some(every) = cfg.usage_reset_interval {
        handles.push(spawn_sweep(Sweep::UsageReset, every, store));
    }
    if handles.is_empty() {
        info!("no maintenance sweeps configured");
    }
    handles
}

fn spawn_sweep(kind: Sweep, every: Duration, store: Arc<dyn EntitlementStore>) -> JoinHandle<()> {
    info!(?kind, interval_secs = every.as_secs(), "starting sweep");
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        // The first tick fires immediately; skip it so a restart does not reset usage.
        tick.tick().await;
        loop {
            tick.tick().await;
            run_once(kind, store.as_ref()).await;
        }
    })
}

async fn run_once(kind: Sweep, store: &dyn EntitlementStore) {
    let result = match kind {
        Sweep::Expiry => store.expire_elevated(Utc::now()).await,
        Sweep::UsageReset => store.reset_usage().await,
    };
    match result {
        Ok(n) => info!(?kind, affected = n, "sweep finished"),
        Err(e) => error!(?kind, "sweep failed: {e}"),
    }
}
