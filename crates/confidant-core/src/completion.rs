//! Bounded-time completion with a deterministic fallback.

use std::{sync::Arc, time::Duration};

use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::{errors::Error, ports::CompletionClient};

/// Sent to the user when the provider fails or times out.
pub const FALLBACK_REPLY: &str = "Извините, произошла ошибка обработки. Попробуйте позже.";

/// What the proxy produced for one eligible message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub fallback: bool,
}

/// Wraps a [`CompletionClient`] with a hard timeout. Exactly one upstream call
/// per invocation; failures are absorbed, never retried.
#[derive(Clone)]
pub struct CompletionProxy {
    client: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl CompletionProxy {
    pub fn new(client: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn complete(&self, text: &str) -> Completion {
        let started = Instant::now();
        let result = match timeout(self.timeout, self.client.complete(text)).await {
            Ok(Ok(answer)) if !answer.trim().is_empty() => Ok(answer),
            Ok(Ok(_)) => Err(Error::Upstream("empty completion".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::UpstreamTimeout(self.timeout)),
        };

        match result {
            Ok(answer) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "completion ok");
                Completion {
                    text: answer,
                    fallback: false,
                }
            }
            Err(e) => {
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "completion failed, using fallback: {e}"
                );
                Completion {
                    text: FALLBACK_REPLY.to_string(),
                    fallback: true,
                }
            }
        }
    }
}
